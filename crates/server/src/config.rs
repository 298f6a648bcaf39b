//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub creatures: CreatureConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Number of scheduler ticks covering `seconds` of wall-clock time.
    pub fn ticks_for_secs(&self, seconds: u64) -> u64 {
        (seconds * 1000 / self.server.tick_interval_ms.max(1)).max(1)
    }
}

/// Networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Log every inbound command at info level.
    #[serde(default)]
    pub verbose: bool,
    /// Root directory of the persisted world.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds between automatic world saves (0 disables autosave).
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
    /// Broadcast the periodic tick timing summary to clients.
    #[serde(default)]
    pub debug_timing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            tick_interval_ms: default_tick_interval(),
            max_connections: default_max_connections(),
            verbose: false,
            data_dir: default_data_dir(),
            autosave_secs: default_autosave_secs(),
            debug_timing: false,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9001
}
fn default_tick_interval() -> u64 {
    50
}
fn default_max_connections() -> usize {
    100
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("world")
}
fn default_autosave_secs() -> u64 {
    300
}

/// World dimensions and clock.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// Partition 0 width in tiles, used when the store has no world metadata.
    #[serde(default = "default_world_size")]
    pub width: i32,
    #[serde(default = "default_world_size")]
    pub height: i32,
    #[serde(default = "default_world_depth")]
    pub depth: i32,
    /// Real seconds per world tick (growth interval).
    #[serde(default = "default_seconds_per_world_tick")]
    pub seconds_per_world_tick: u32,
    #[serde(default = "default_ticks_per_world_day")]
    pub ticks_per_world_day: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_world_size(),
            height: default_world_size(),
            depth: default_world_depth(),
            seconds_per_world_tick: default_seconds_per_world_tick(),
            ticks_per_world_day: default_ticks_per_world_day(),
        }
    }
}

fn default_world_size() -> i32 {
    200
}
fn default_world_depth() -> i32 {
    2
}
fn default_seconds_per_world_tick() -> u32 {
    20
}
fn default_ticks_per_world_day() -> u32 {
    24 * 60 * 60 / 20 / 8
}

/// Sector load retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapConfig {
    /// Failed loads are retried this many times before the sector is left as a placeholder.
    #[serde(default = "default_load_retry_limit")]
    pub load_retry_limit: u32,
    #[serde(default = "default_load_retry_base_ticks")]
    pub load_retry_base_ticks: u64,
    #[serde(default = "default_load_retry_max_ticks")]
    pub load_retry_max_ticks: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            load_retry_limit: default_load_retry_limit(),
            load_retry_base_ticks: default_load_retry_base_ticks(),
            load_retry_max_ticks: default_load_retry_max_ticks(),
        }
    }
}

fn default_load_retry_limit() -> u32 {
    5
}
fn default_load_retry_base_ticks() -> u64 {
    10
}
fn default_load_retry_max_ticks() -> u64 {
    400
}

/// Creature behaviour and visibility.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatureConfig {
    /// Clients receive creature updates within this many tiles.
    #[serde(default = "default_subscription_radius")]
    pub subscription_radius: f32,
    #[serde(default = "default_animation_radius")]
    pub animation_radius: f32,
    /// A* search window half-size.
    #[serde(default = "default_path_search_radius")]
    pub path_search_radius: i32,
    /// Blocked steps tolerated before a destination is dropped.
    #[serde(default = "default_repath_limit")]
    pub repath_limit: u32,
    /// Ticks between steps for a creature with speed 1.
    #[serde(default = "default_move_ticks_base")]
    pub move_ticks_base: u64,
    /// Ticks between blows for attack speed 1.
    #[serde(default = "default_attack_ticks_base")]
    pub attack_ticks_base: u64,
}

impl Default for CreatureConfig {
    fn default() -> Self {
        Self {
            subscription_radius: default_subscription_radius(),
            animation_radius: default_animation_radius(),
            path_search_radius: default_path_search_radius(),
            repath_limit: default_repath_limit(),
            move_ticks_base: default_move_ticks_base(),
            attack_ticks_base: default_attack_ticks_base(),
        }
    }
}

fn default_subscription_radius() -> f32 {
    50.0
}
fn default_animation_radius() -> f32 {
    30.0
}
fn default_path_search_radius() -> i32 {
    20
}
fn default_repath_limit() -> u32 {
    5
}
fn default_move_ticks_base() -> u64 {
    8
}
fn default_attack_ticks_base() -> u64 {
    20
}

/// Game content catalog.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContentConfig {
    /// TOML catalog to load instead of the built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScriptsConfig {
    #[serde(default)]
    pub spawners: Vec<SpawnerConfig>,
}

/// Keeps `count` monsters of one template alive around `centre`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpawnerConfig {
    pub monster: String,
    pub centre: protocol::TilePoint,
    #[serde(default = "default_spawner_count")]
    pub count: usize,
    #[serde(default = "default_spawner_radius")]
    pub radius: i32,
    #[serde(default = "default_spawner_respawn")]
    pub respawn_secs: u64,
}

fn default_spawner_count() -> usize {
    3
}
fn default_spawner_radius() -> i32 {
    10
}
fn default_spawner_respawn() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 1234

            [[scripts.spawners]]
            monster = "Cow"
            centre = { w = 0, x = 10, y = 10, z = 0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.world.width, 200);
        assert_eq!(config.map.load_retry_limit, 5);
        assert_eq!(config.scripts.spawners.len(), 1);
        assert_eq!(config.scripts.spawners[0].count, 3);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.creatures.subscription_radius, 50.0);
        assert!(parsed.content.path.is_none());
    }

    #[test]
    fn test_ticks_for_secs() {
        let config = Config::default();
        assert_eq!(config.ticks_for_secs(10), 200);
        assert_eq!(config.ticks_for_secs(0), 1);
    }
}
