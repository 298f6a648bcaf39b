//! Creature behaviour.

mod creature_state;
pub mod pathfind;

pub use creature_state::{CreatureState, Intent, Surroundings};
pub use pathfind::Goal;
