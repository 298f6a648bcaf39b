//! Error types for the simulation core.

use protocol::{ContainerId, CreatureId, TilePoint};
use thiserror::Error;

/// A failed sector load, shared between every waiter of that load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sector load failed: {0}")]
pub struct LoadError(pub String);

#[derive(Debug, Error)]
pub enum MapError {
    #[error("location {0} is out of bounds")]
    OutOfBounds(TilePoint),
    #[error("unknown partition {0}")]
    UnknownPartition(u32),
    #[error("sector has {got} tiles, expected {expected}")]
    SectorSize { expected: usize, got: usize },
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid record key {0:?}")]
    InvalidKey(String),
}

/// Why a single client command failed. Rendered into the reply's `error` field.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already in the world")]
    AlreadyInWorld,
    #[error("not allowed")]
    NotAllowed,
    #[error("out of bounds")]
    OutOfBounds,
    #[error("not walkable")]
    NotWalkable,
    #[error("no item there")]
    NoItem,
    #[error("unknown container {0}")]
    UnknownContainer(ContainerId),
    #[error("unknown creature {0}")]
    UnknownCreature(CreatureId),
    #[error("invalid slot")]
    InvalidSlot,
    #[error("no usage for those items")]
    NoUsage,
    #[error("{0}")]
    Rejected(&'static str),
    #[error("{0}")]
    Account(String),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
