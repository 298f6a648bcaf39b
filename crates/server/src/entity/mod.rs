//! World entities.
//!
//! Containers hold items, creatures walk the map, players own one creature
//! plus an inventory and an equipment container.

mod container;
mod creature;
pub mod item;
mod player;

pub use container::{Container, INVENTORY_SIZE};
pub use creature::{Creature, MONSTER_FOOD, PLAYER_FOOD};
pub use player::Player;
