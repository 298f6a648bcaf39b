//! World scripts: long-lived hooks driven by the scripts tick section.

use crate::config::SpawnerConfig;
use crate::server::GameState;
use crate::spatial::SectorCoord;
use protocol::{CreatureId, PlayerId};
use rand::Rng;
use tracing::{debug, warn};

/// Something that happened during a tick that scripts may react to.
/// Delivered at the start of the next scripts section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    PlayerCreated { player_id: PlayerId },
    PlayerEntered { player_id: PlayerId, creature_id: CreatureId },
    CreatureKilled {
        creature_id: CreatureId,
        template_id: Option<u32>,
        killer: Option<CreatureId>,
    },
}

pub trait Script: Send + Sync {
    fn name(&self) -> &str;

    /// Called once, on the first scripts section.
    fn on_start(&mut self, _game: &mut GameState) {}

    fn tick(&mut self, _game: &mut GameState) {}

    fn on_player_created(&mut self, _game: &mut GameState, _player_id: PlayerId) {}

    fn on_player_entered(&mut self, _game: &mut GameState, _player_id: PlayerId, _creature_id: CreatureId) {}

    fn on_creature_killed(&mut self, _game: &mut GameState, _creature_id: CreatureId, _killer: Option<CreatureId>) {}

    fn handle_event(&mut self, game: &mut GameState, event: ScriptEvent) {
        match event {
            ScriptEvent::PlayerCreated { player_id } => self.on_player_created(game, player_id),
            ScriptEvent::PlayerEntered { player_id, creature_id } => {
                self.on_player_entered(game, player_id, creature_id)
            }
            ScriptEvent::CreatureKilled { creature_id, killer, .. } => {
                self.on_creature_killed(game, creature_id, killer)
            }
        }
    }
}

/// Scripts configured in `[[scripts.spawners]]`.
pub fn from_config(spawners: &[SpawnerConfig]) -> Vec<Box<dyn Script>> {
    spawners
        .iter()
        .map(|config| Box::new(Spawner::new(config.clone())) as Box<dyn Script>)
        .collect()
}

/// Keeps a fixed number of one monster alive around a point.
///
/// Missing monsters are placed one per tick, only into sectors that are
/// resident once `sector_load` returns; otherwise the load is left running and
/// the spawn is retried later. After a death the replacement waits `respawn_secs`.
pub struct Spawner {
    config: SpawnerConfig,
    template_id: Option<u32>,
    live: Vec<CreatureId>,
    respawn_ticks: u64,
    next_spawn: u64,
}

impl Spawner {
    pub fn new(config: SpawnerConfig) -> Self {
        Self {
            config,
            template_id: None,
            live: Vec::new(),
            respawn_ticks: 0,
            next_spawn: 0,
        }
    }

    pub fn live(&self) -> &[CreatureId] {
        &self.live
    }
}

impl Script for Spawner {
    fn name(&self) -> &str {
        "spawner"
    }

    fn on_start(&mut self, game: &mut GameState) {
        self.template_id = game.world.content.monster_by_name(&self.config.monster).map(|m| m.id);
        if self.template_id.is_none() {
            warn!("Spawner: unknown monster '{}'", self.config.monster);
        }
        self.respawn_ticks = game.config.ticks_for_secs(self.config.respawn_secs);
    }

    fn tick(&mut self, game: &mut GameState) {
        let Some(template_id) = self.template_id else {
            return;
        };

        let before = self.live.len();
        self.live.retain(|id| game.world.creatures.contains_key(id));
        if self.live.len() < before {
            self.next_spawn = self.next_spawn.max(game.tick_count + self.respawn_ticks);
        }
        if self.live.len() >= self.config.count || game.tick_count < self.next_spawn {
            return;
        }

        let radius = self.config.radius.max(0);
        let dx = game.rng.random_range(-radius..=radius);
        let dy = game.rng.random_range(-radius..=radius);
        let target = self.config.centre.offset(dx, dy);
        if !game.world.map.in_bounds(&target) {
            return;
        }

        let coord = SectorCoord::of(&target);
        match game.world.map.sector_load(target.w, coord) {
            Ok(None) => {}
            Ok(Some(_)) | Err(_) => return,
        }

        if let Some(id) = game.make_creature(template_id, target) {
            debug!("Spawner placed {} {} at {}", self.config.monster, id, target);
            self.live.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::Content;
    use crate::spatial::RetryPolicy;
    use crate::world::World;
    use protocol::TilePoint;
    use std::sync::Arc;

    fn game(spawner: SpawnerConfig) -> GameState {
        let mut config = Config::default();
        config.scripts.spawners.push(spawner);
        let content = Arc::new(Content::builtin().unwrap());
        let mut world = World::new(content, None, RetryPolicy::default());
        world.map.add_partition(0, 60, 60, 1);
        let mut game = GameState::new(config, world);
        game.seed(9);
        game
    }

    fn cows(count: usize) -> SpawnerConfig {
        SpawnerConfig {
            monster: "Cow".to_string(),
            centre: TilePoint::new(0, 20, 20, 0),
            count,
            radius: 4,
            respawn_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_spawner_fills_and_respawns_after_delay() {
        let mut game = game(cows(2));
        for _ in 0..3 {
            game.tick().await;
        }
        assert_eq!(game.world.creatures.len(), 2);
        for creature in game.world.creatures.values() {
            assert_eq!(creature.name, "Cow");
            assert!(creature.pos.chebyshev(&TilePoint::new(0, 20, 20, 0)) <= 14);
        }

        let victim = *game.world.creatures.keys().next().unwrap();
        game.remove_creature(victim);
        game.tick().await;
        game.tick().await;
        assert_eq!(game.world.creatures.len(), 1);

        let respawn = game.config.ticks_for_secs(1);
        for _ in 0..respawn {
            game.tick().await;
        }
        assert_eq!(game.world.creatures.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_monster_spawns_nothing() {
        let mut config = cows(2);
        config.monster = "Dragon".to_string();
        let mut game = game(config);
        for _ in 0..3 {
            game.tick().await;
        }
        assert!(game.world.creatures.is_empty());
    }
}
