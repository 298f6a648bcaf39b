//! Tileworld server library: the world model, the tick loop and the
//! WebSocket front end.

pub mod ai;
pub mod config;
pub mod content;
pub mod entity;
pub mod error;
pub mod persistence;
pub mod scripts;
pub mod server;
pub mod spatial;
pub mod world;

pub use config::Config;
pub use server::{GameState, run};
