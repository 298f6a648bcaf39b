//! Game state and main loop.

use super::broadcast::{Audience, BroadcastRouter};
use super::client::{ClientConnection, ConnectionId, Outbox, PlayerSession};
use super::sections::GrowthSweep;
use super::tick::{SectionId, TickScheduler};
use crate::config::Config;
use crate::entity::{Creature, item};
use crate::error::CommandError;
use crate::scripts::{self, Script, ScriptEvent};
use crate::world::World;
use futures_util::FutureExt;
use protocol::{ContainerId, CreatureId, CreatureView, Event, Item, ItemLocation, Meter, PlayerId, TilePoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Ring search radius for dropped and produced items.
pub const ITEM_SEARCH_RANGE: i32 = 6;
/// Ring search radius for placing creatures.
pub const SPAWN_SEARCH_RANGE: i32 = 10;

pub struct GameState {
    pub config: Config,
    pub world: World,
    pub connections: BTreeMap<ConnectionId, ClientConnection>,
    pub router: BroadcastRouter,
    pub scheduler: TickScheduler,
    pub rng: StdRng,
    pub tick_count: u64,
    pub update_time_avg: f64,
    pub(super) scripts: Vec<Box<dyn Script>>,
    pub(super) scripts_started: bool,
    pub(super) script_events: Vec<ScriptEvent>,
    pub(super) growth: Option<GrowthSweep>,
    next_connection_id: ConnectionId,
}

impl GameState {
    pub fn new(config: Config, world: World) -> Self {
        let scheduler = TickScheduler::new(&config);
        let scripts = scripts::from_config(&config.scripts.spawners);
        Self {
            config,
            world,
            connections: BTreeMap::new(),
            router: BroadcastRouter::new(),
            scheduler,
            rng: StdRng::from_os_rng(),
            tick_count: 0,
            update_time_avg: 0.0,
            scripts,
            scripts_started: false,
            script_events: Vec::new(),
            growth: None,
            next_connection_id: 1,
        }
    }

    /// Replace the random source with a seeded one.
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn add_script(&mut self, script: Box<dyn Script>) {
        self.scripts.push(script);
    }

    pub fn queue_script_event(&mut self, event: ScriptEvent) {
        self.script_events.push(event);
    }

    /// Register a new connection. `outbox` is `None` for in-process clients
    /// that read their queue directly.
    pub fn connect(&mut self, outbox: Option<Outbox>) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(id, ClientConnection::new(id, outbox));
        info!("Connection {} opened", id);
        id
    }

    pub fn push_message(&mut self, connection: ConnectionId, text: impl Into<String>) {
        if let Some(client) = self.connections.get_mut(&connection) {
            client.queue.push_inbound(text.into());
        }
    }

    /// Mark a connection closed; it is removed by the next tick.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(client) = self.connections.get_mut(&connection) {
            client.closed = true;
        }
    }

    pub fn session(&self, connection: ConnectionId) -> Result<PlayerSession, CommandError> {
        self.connections
            .get(&connection)
            .and_then(|c| c.session)
            .ok_or(CommandError::NotLoggedIn)
    }

    pub fn connection_for_player(&self, player_id: PlayerId) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| c.session.is_some_and(|s| s.player_id == player_id))
            .map(|c| c.id)
    }

    pub fn players_online(&self) -> Vec<String> {
        self.world.players.values().map(|p| p.name.clone()).collect()
    }

    /// World clock as "day N, HH:00".
    pub fn time_description(&self) -> String {
        let per_day = u64::from(self.config.world.ticks_per_world_day.max(1));
        let day = self.world.epoch / per_day + 1;
        let hour = (self.world.epoch % per_day) * 24 / per_day;
        format!("day {}, {:02}:00", day, hour)
    }

    /// Run a single tick: every due section, in order.
    pub async fn tick(&mut self) {
        self.tick_count += 1;
        let tick = self.tick_count;
        let tick_start = std::time::Instant::now();

        for section in SectionId::ORDER {
            if !self.scheduler.due(section, tick) {
                continue;
            }
            let started = std::time::Instant::now();
            let status = self.run_section(section).await;
            self.scheduler.record(section, tick, status, started.elapsed());
        }

        self.scheduler.record_tick(tick, tick_start.elapsed());
    }

    pub fn set_floor(&mut self, loc: TilePoint, floor: u32) -> Result<(), CommandError> {
        self.world.map.set_floor(&loc, floor)?;
        self.router.filtered(Audience::partition(loc.w), Event::SetFloor { loc, floor });
        Ok(())
    }

    /// Replace the item on a tile and tell the partition. Returns the old item.
    pub fn set_world_item(&mut self, loc: TilePoint, item: Option<Item>) -> Result<Option<Item>, CommandError> {
        let previous = self.world.map.set_item(&loc, item.clone())?;
        self.router.filtered(
            Audience::partition(loc.w),
            Event::SetItem {
                location: ItemLocation::world(loc),
                item,
            },
        );
        Ok(previous)
    }

    /// Replace a container slot and tell everyone with access to it.
    pub fn set_container_item(
        &mut self,
        id: ContainerId,
        index: usize,
        item: Option<Item>,
    ) -> Result<Option<Item>, CommandError> {
        let container = self
            .world
            .containers
            .get_mut(&id)
            .ok_or(CommandError::UnknownContainer(id))?;
        let slot = container.items.get_mut(index).ok_or(CommandError::InvalidSlot)?;
        let previous = std::mem::replace(slot, item.clone());
        self.router.filtered(
            Audience::container(id),
            Event::SetItem {
                location: ItemLocation::container(id, Some(index)),
                item,
            },
        );
        self.container_changed(id);
        Ok(previous)
    }

    pub fn set_item_at(&mut self, location: &ItemLocation, item: Option<Item>) -> Result<Option<Item>, CommandError> {
        match *location {
            ItemLocation::World { loc } => self.set_world_item(loc, item),
            ItemLocation::Container { id, index: Some(index) } => self.set_container_item(id, index, item),
            ItemLocation::Container { index: None, .. } => Err(CommandError::InvalidSlot),
        }
    }

    /// Equipment changes recompute the wearer's stats; inventory changes
    /// recompute their light.
    fn container_changed(&mut self, id: ContainerId) {
        let content = self.world.content.clone();
        let wearer = self.world.player_by_equipment(id).map(|p| p.creature_id);
        let carrier = self.world.player_by_inventory(id).map(|p| p.creature_id);

        if let Some(creature_id) = wearer {
            let (Some(equipment), Some(creature)) =
                (self.world.containers.get(&id), self.world.creatures.get_mut(&creature_id))
            else {
                return;
            };
            creature.apply_equipment(equipment, &content);
            let view = CreatureView {
                stats: Some(creature.stats),
                appearance: Some(creature.appearance.clone()),
                ..creature.partial()
            };
            self.router.filtered(
                Audience::subscribers(creature_id),
                Event::SetCreature {
                    partial: true,
                    creature: view,
                },
            );
        } else if let Some(creature_id) = carrier {
            let light = self.world.containers.get(&id).map(|c| c.light(&content)).unwrap_or(0);
            let Some(creature) = self.world.creatures.get_mut(&creature_id) else {
                return;
            };
            if creature.light == light {
                return;
            }
            creature.light = light;
            let view = CreatureView {
                light: Some(light),
                ..creature.partial()
            };
            self.router.filtered(
                Audience::subscribers(creature_id),
                Event::SetCreature {
                    partial: true,
                    creature: view,
                },
            );
        }
    }

    /// Drop an item on the nearest tile that is empty or holds a stack it
    /// merges into. Returns where it landed.
    pub fn add_item_near(&mut self, loc: TilePoint, item: Item) -> Option<TilePoint> {
        let content = self.world.content.clone();
        let spot = self.world.map.find_nearest(loc, ITEM_SEARCH_RANGE, true, |map, at| {
            item::fits(map.tile(&at).item.as_ref(), &item, &content)
        })?;
        let mut slot = self.world.map.item(&spot).cloned();
        item::place(&mut slot, item);
        self.set_world_item(spot, slot).ok()?;
        Some(spot)
    }

    /// Put an item into the first stack or open slot of a container.
    pub fn add_item_to_container(&mut self, id: ContainerId, item: Item) -> Result<usize, Item> {
        let content = self.world.content.clone();
        let Some(container) = self.world.containers.get(&id) else {
            return Err(item);
        };
        let Some(index) = container.slot_for(&item, &content) else {
            return Err(item);
        };
        let mut slot = container.items[index].clone();
        item::place(&mut slot, item);
        let _ = self.set_container_item(id, index, slot);
        Ok(index)
    }

    pub(super) fn creature_update(&mut self, view: CreatureView) {
        self.router.filtered(
            Audience::subscribers(view.id),
            Event::SetCreature {
                partial: true,
                creature: view,
            },
        );
    }

    /// An ordinary step. Clears the warped flag.
    pub fn move_creature(&mut self, id: CreatureId, to: TilePoint) {
        if !self.world.relocate_creature(id, to) {
            return;
        }
        if let Some(state) = self.world.states.get_mut(&id) {
            state.warped = false;
        }
        self.creature_update(CreatureView {
            id,
            pos: Some(to),
            ..CreatureView::default()
        });
    }

    /// Teleport after the destination sector has loaded. The creature is
    /// marked warped so the arrival tile does not trigger again.
    pub async fn warp_creature(&mut self, id: CreatureId, to: TilePoint) -> bool {
        if !self.world.map.in_bounds(&to) || self.world.map.ensure_loaded_for(&to).await.is_err() {
            return false;
        }
        if !self.world.relocate_creature(id, to) {
            return false;
        }
        let tick = self.tick_count;
        if let Some(state) = self.world.states.get_mut(&id) {
            state.mark_warped(tick);
        }
        self.creature_update(CreatureView {
            id,
            pos: Some(to),
            ..CreatureView::default()
        });
        true
    }

    /// Create a monster from a template on the nearest walkable tile.
    pub fn make_creature(&mut self, template_id: u32, loc: TilePoint) -> Option<CreatureId> {
        let content = self.world.content.clone();
        let template = content.monster(template_id)?;
        let spot = self.world.map.find_nearest_walkable(loc, SPAWN_SEARCH_RANGE, &content)?;
        Some(self.world.register_creature(Creature::from_template(0, template, spot)))
    }

    /// Remove a creature and tell everyone subscribed to it.
    pub fn remove_creature(&mut self, id: CreatureId) -> Option<Creature> {
        let creature = self.world.unregister_creature(id)?;
        for client in self.connections.values_mut() {
            if client.subscribed.remove(&id) {
                self.router.send(client.id, Event::RemoveCreature { id });
            }
        }
        Some(creature)
    }

    /// Apply a life change. Damage animates; death removes monsters and
    /// drops their remains, and sends players back to the spawn point.
    pub fn modify_creature_life(&mut self, actor: Option<CreatureId>, target: CreatureId, delta: i32) {
        let Some(creature) = self.world.creatures.get_mut(&target) else {
            return;
        };
        creature.life.adjust(delta);
        let (pos, life, dead) = (creature.pos, creature.life, creature.is_dead());
        let (template_id, is_player) = (creature.template_id, creature.is_player());

        self.creature_update(CreatureView {
            id: target,
            life: Some(life),
            ..CreatureView::default()
        });
        if delta < 0 {
            self.animation(pos, "Attack");
        }
        if !dead {
            return;
        }

        self.animation(pos, "diescream");
        self.queue_script_event(ScriptEvent::CreatureKilled {
            creature_id: target,
            template_id,
            killer: actor,
        });

        if is_player {
            self.respawn_player(target);
            return;
        }

        self.remove_creature(target);
        let content = self.world.content.clone();
        let Some(template) = template_id.and_then(|id| content.monster(id)) else {
            return;
        };
        if let Some(meta) = template.dead_item.as_deref().and_then(|name| content.item_by_name(name)) {
            self.add_item_near(pos, Item::new(meta.id, 1));
        }
        for entry in &template.treasure {
            let roll: f64 = self.rng.random_range(0.0..=100.0);
            if roll > entry.chance {
                continue;
            }
            if let Some(meta) = content.item_by_name(&entry.item) {
                self.add_item_near(pos, Item::new(meta.id, entry.quantity.max(1)));
            }
        }
    }

    pub fn modify_creature_stamina(&mut self, id: CreatureId, delta: i32) {
        let Some(creature) = self.world.creatures.get_mut(&id) else {
            return;
        };
        let before = creature.stamina;
        creature.stamina.adjust(delta);
        if creature.stamina == before {
            return;
        }
        let stamina = creature.stamina;
        self.creature_update(CreatureView {
            id,
            stamina: Some(stamina),
            ..CreatureView::default()
        });
    }

    /// The spawn point: centre of partition 0.
    pub fn spawn_point(&self) -> TilePoint {
        match self.world.map.partition(0) {
            Some(p) => TilePoint::new(0, p.width / 2, p.height / 2, 0),
            None => TilePoint::default(),
        }
    }

    fn respawn_player(&mut self, creature_id: CreatureId) {
        let content = self.world.content.clone();
        let spawn = self.spawn_point();
        let Some(creature) = self.world.creatures.get_mut(&creature_id) else {
            return;
        };
        creature.life = Meter::full(creature.life.max);
        let from = creature.pos;
        // The creature's own tile must not count as occupied.
        self.world.map.release(&from, creature_id);
        let to = match self.world.map.find_nearest_walkable(spawn, SPAWN_SEARCH_RANGE, &content) {
            Some(to) if self.world.relocate_creature(creature_id, to) => to,
            _ => {
                warn!("No free tile near spawn {}, creature {} stays at {}", spawn, creature_id, from);
                self.world.map.claim(from, creature_id);
                from
            }
        };
        let tick = self.tick_count;
        if let Some(state) = self.world.states.get_mut(&creature_id) {
            state.mark_warped(tick);
            state.target = None;
        }
        let life = self.world.creatures.get(&creature_id).map(|c| c.life);
        self.creature_update(CreatureView {
            id: creature_id,
            pos: Some(to),
            life,
            ..CreatureView::default()
        });
        self.animation(to, "WarpIn");
    }

    /// One blow from `attacker` to `defender`. Damage is rolled from the
    /// attacker's stats minus the defender's armor, at least 1.
    pub fn attack_creature(&mut self, attacker: CreatureId, defender: CreatureId) {
        let (Some(a), Some(d)) = (self.world.creatures.get(&attacker), self.world.creatures.get(&defender)) else {
            return;
        };
        let low = a.stats.damage_low;
        let high = a.stats.damage_high.max(low);
        let armor = d.stats.armor;
        let attacker_player = a.player_id;
        let defender_is_monster = !d.is_player();

        let roll = self.rng.random_range(low..=high);
        let damage = (roll - armor).max(1);
        debug!("Creature {} hits {} for {}", attacker, defender, damage);
        self.modify_creature_life(Some(attacker), defender, -damage);

        if defender_is_monster && self.world.creatures.contains_key(&defender) {
            if let Some(state) = self.world.states.get_mut(&defender) {
                if state.target.is_none() {
                    state.attack(attacker);
                }
            }
        }

        if let Some(player_id) = attacker_player {
            self.modify_creature_stamina(attacker, -1);
            let melee = self.world.content.skill_by_name("Melee").map(|s| s.id);
            if let Some(skill) = melee {
                self.grant_xp(player_id, skill, 1);
            }
        }
    }

    /// Add xp and send the new total to the player's connection.
    pub fn grant_xp(&mut self, player_id: PlayerId, skill: u32, xp: u64) {
        let Some(player) = self.world.players.get_mut(&player_id) else {
            return;
        };
        let total = player.grant_xp(skill, xp);
        if let Some(connection) = self.connection_for_player(player_id) {
            self.router.send(connection, Event::Xp { skill, xp: total });
        }
    }

    pub fn animation(&mut self, loc: TilePoint, key: &str) {
        let radius = self.config.creatures.animation_radius;
        self.router.filtered(
            Audience::near(loc, radius),
            Event::Animation {
                loc,
                key: key.to_string(),
            },
        );
    }

    /// Send a server message to a specific connection.
    pub fn send_server_message(&mut self, connection: ConnectionId, message: &str) {
        self.router.send(
            connection,
            Event::Chat {
                from: "SERVER".to_string(),
                to: "global".to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn broadcast_chat(&mut self, from: &str, message: &str) {
        self.router.broadcast(Event::Chat {
            from: from.to_string(),
            to: "global".to_string(),
            message: message.to_string(),
        });
    }

    /// Take a connection's player out of the world: save it, remove its
    /// creature and tell the others. The connection itself stays.
    pub async fn leave_world(&mut self, connection: ConnectionId) {
        let Some(session) = self.connections.get(&connection).and_then(|c| c.session) else {
            return;
        };

        let saved = match self.world.save_player(session.player_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save player {}: {}", session.player_id, e);
                false
            }
        };

        let name = self
            .world
            .players
            .remove(&session.player_id)
            .map(|p| p.name)
            .unwrap_or_default();
        if let Some(creature) = self.remove_creature(session.creature_id) {
            self.animation(creature.pos, "WarpOut");
        }
        if saved {
            self.world.containers.remove(&session.container_id);
            self.world.containers.remove(&session.equipment_container_id);
        }

        if let Some(client) = self.connections.get_mut(&connection) {
            client.session = None;
            client.subscribed.clear();
            client.registered_containers.clear();
            client.dialogue = None;
        }

        info!("{} left the world", name);
        self.broadcast_chat("World", &format!("{} has left the world.", name));
    }

    /// Remove a connection, taking its player out of the world first.
    pub async fn remove_client(&mut self, connection: ConnectionId) {
        self.leave_world(connection).await;
        if self.connections.remove(&connection).is_some() {
            info!("Connection {} closed", connection);
        }
    }
}

/// Run the main game loop.
pub async fn run_game_loop(state: Arc<RwLock<GameState>>, tick_interval_ms: u64) {
    let start = Instant::now() + Duration::from_millis(tick_interval_ms);
    let mut ticker = interval_at(start, Duration::from_millis(tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    {
        let game = state.read().await;
        info!(
            "Game loop started: {}ms ticks, {} scripts",
            tick_interval_ms,
            game.scripts.len()
        );
    }

    loop {
        let scheduled = ticker.tick().await;

        // Drain any backlog so the next tick runs against the current time.
        let mut skipped = 0u32;
        while ticker.tick().now_or_never().is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            debug!(
                "Skipped {} ticks to stay current (lag: {:?})",
                skipped,
                Instant::now().saturating_duration_since(scheduled)
            );
        }

        let mut game = state.write().await;
        let tick_start = std::time::Instant::now();
        game.tick().await;
        let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;

        game.update_time_avg = game.update_time_avg * 0.5 + tick_ms * 0.5;

        let tick_budget = tick_interval_ms as f64 * 0.9;
        if tick_ms > tick_budget {
            warn!(
                "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} connections, {} creatures, {} pending loads",
                game.tick_count,
                tick_ms,
                tick_budget,
                game.connections.len(),
                game.world.creatures.len(),
                game.world.map.pending_loads()
            );
        }
    }
}
