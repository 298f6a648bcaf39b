//! Shared protocol crate for tileworld.
//!
//! This crate contains:
//! - World coordinates, tiles and items as they travel on the wire
//! - Inbound commands and outbound events
//! - The JSON envelope codec

mod codec;
mod error;
pub mod packets;

pub use codec::{decode_command, encode_message};
pub use error::ProtocolError;
pub use packets::*;

use serde::{Deserialize, Serialize};

/// Process-wide container identifier.
pub type ContainerId = u32;
/// Process-wide creature identifier.
pub type CreatureId = u32;
/// Persistent player identifier.
pub type PlayerId = u32;

/// A tile coordinate. `w` selects the partition (map level/instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePoint {
    pub w: u32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TilePoint {
    pub const fn new(w: u32, x: i32, y: i32, z: i32) -> Self {
        Self { w, x, y, z }
    }

    /// Same partition and level.
    pub fn same_plane(&self, other: &TilePoint) -> bool {
        self.w == other.w && self.z == other.z
    }

    /// Chebyshev distance on the plane (ignores `w` and `z`).
    pub fn chebyshev(&self, other: &TilePoint) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn offset(&self, dx: i32, dy: i32) -> TilePoint {
        TilePoint { x: self.x + dx, y: self.y + dy, ..*self }
    }
}

impl std::fmt::Display for TilePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.w, self.x, self.y, self.z)
    }
}

/// An item instance. Quantity is always > 0 while the item exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "type")]
    pub kind: u32,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warp_to: Option<TilePoint>,
}

impl Item {
    pub const fn new(kind: u32, quantity: u32) -> Self {
        Self {
            kind,
            quantity,
            container_id: None,
            growth: None,
            warp_to: None,
        }
    }
}

/// One cell of the tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tile {
    pub floor: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

impl Tile {
    pub const fn with_floor(floor: u32) -> Self {
        Self { floor, item: None }
    }
}

/// Where an item lives: embedded in a world tile, or in a container slot.
///
/// A container location without an index means "any open slot".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ItemLocation {
    World { loc: TilePoint },
    Container {
        id: ContainerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
}

impl ItemLocation {
    pub const fn world(loc: TilePoint) -> Self {
        ItemLocation::World { loc }
    }

    pub const fn container(id: ContainerId, index: Option<usize>) -> Self {
        ItemLocation::Container { id, index }
    }
}

/// Message envelope used in both directions.
///
/// `id` correlates a reply with the command that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(id: Option<u32>, data: T) -> Self {
        Self { id, data }
    }
}
