//! Persistence boundary.
//!
//! The simulation only sees the [`Store`] trait: key-addressed async reads and
//! writes of sectors, containers, players, accounts and world metadata. Every
//! unit is written independently so a failed save never corrupts units that
//! were already written.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::spatial::SectorCoord;
use futures_util::future::BoxFuture;
use protocol::{ContainerId, ContainerKind, Item, Meter, PlayerId, Tile, TilePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StoreFuture<T> = BoxFuture<'static, Result<T, StoreError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

/// Counters and partition layout of a persisted world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldMeta {
    pub next_container_id: ContainerId,
    pub next_creature_id: u32,
    pub next_player_id: PlayerId,
    #[serde(default)]
    pub epoch: u64,
    pub partitions: BTreeMap<u32, PartitionMeta>,
    #[serde(default)]
    pub player_names: BTreeMap<String, PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub items: Vec<Option<Item>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub is_admin: bool,
    pub skills: BTreeMap<u32, u64>,
    pub container_id: ContainerId,
    pub equipment_container_id: ContainerId,
    pub pos: TilePoint,
    pub life: Meter,
    pub stamina: Meter,
    pub mana: Meter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub username: String,
    pub password: String,
    pub player_ids: Vec<PlayerId>,
}

/// Async key-addressed storage. `Ok(None)` means "no such record".
pub trait Store: Send + Sync {
    fn load_meta(&self) -> StoreFuture<Option<WorldMeta>>;
    fn save_meta(&self, meta: WorldMeta) -> StoreFuture<()>;

    fn load_sector(&self, w: u32, coord: SectorCoord) -> StoreFuture<Option<Vec<Tile>>>;
    fn save_sector(&self, w: u32, coord: SectorCoord, tiles: Vec<Tile>) -> StoreFuture<()>;

    fn load_container(&self, id: ContainerId) -> StoreFuture<Option<ContainerRecord>>;
    fn save_container(&self, id: ContainerId, record: ContainerRecord) -> StoreFuture<()>;

    fn load_player(&self, id: PlayerId) -> StoreFuture<Option<PlayerRecord>>;
    fn save_player(&self, record: PlayerRecord) -> StoreFuture<()>;

    fn load_account(&self, username: &str) -> StoreFuture<Option<AccountRecord>>;
    fn save_account(&self, record: AccountRecord) -> StoreFuture<()>;
}
