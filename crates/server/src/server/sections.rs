//! Tick section bodies, one method per [`SectionId`].

use super::broadcast::{Audience, within};
use super::client::ConnectionId;
use super::game::GameState;
use super::tick::{SectionId, SectionStatus};
use crate::ai::{Intent, Surroundings};
use crate::content::{ItemClass, TrapEffect};
use crate::spatial::{LoadFailure, SECTOR_SIZE, SectorCoord};
use futures_util::FutureExt;
use protocol::{CreatureId, Envelope, Event, Item, ItemLocation, Reply, TilePoint};
use std::collections::{BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// Tiles examined per growth invocation before yielding.
const GROWTH_BATCH_TILES: usize = 1000;
const HUNGER_DAMAGE: i32 = 10;

/// A growth pass in progress: resident sectors still to visit.
#[derive(Debug, Default)]
pub struct GrowthSweep {
    queue: VecDeque<(u32, SectorCoord)>,
}

impl GameState {
    pub(super) async fn run_section(&mut self, section: SectionId) -> SectionStatus {
        match section {
            SectionId::SyncState => self.sync_state().await,
            SectionId::Scripts => self.run_scripts(),
            SectionId::Subscriptions => self.update_subscriptions(),
            SectionId::CreatureStates => self.update_creatures(),
            SectionId::Stairs => self.check_stairs().await,
            SectionId::Growth => self.grow(),
            SectionId::Time => {
                self.router.broadcast(Event::Time { epoch: self.world.epoch });
                SectionStatus::Done
            }
            SectionId::Hunger => self.hunger(),
            SectionId::Autosave => self.autosave().await,
            SectionId::Messages => self.process_messages().await,
            SectionId::Flush => self.flush(),
            SectionId::Performance => self.report_performance(),
        }
    }

    async fn sync_state(&mut self) -> SectionStatus {
        for LoadFailure { w, failure } in self.world.map.poll_loads(self.tick_count) {
            let outcome = if failure.will_retry { "will retry" } else { "giving up" };
            warn!(
                "Sector {} of partition {} failed to load (attempt {}, {}): {}",
                failure.coord, w, failure.failures, outcome, failure.error
            );
            self.router.broadcast(Event::Log {
                msg: format!("sector {} of partition {} failed to load: {}", failure.coord, w, failure.error),
            });
        }

        let closed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.closed)
            .map(|c| c.id)
            .collect();
        for connection in closed {
            self.remove_client(connection).await;
        }

        self.world.sync_occupants();
        SectionStatus::Done
    }

    fn run_scripts(&mut self) -> SectionStatus {
        let mut scripts = std::mem::take(&mut self.scripts);
        if !self.scripts_started {
            self.scripts_started = true;
            for script in scripts.iter_mut() {
                script.on_start(self);
            }
        }

        let events = std::mem::take(&mut self.script_events);
        for event in events {
            for script in scripts.iter_mut() {
                script.handle_event(self, event);
            }
        }
        for script in scripts.iter_mut() {
            script.tick(self);
        }

        // Keep scripts added while the hooks ran.
        scripts.append(&mut self.scripts);
        self.scripts = scripts;
        SectionStatus::Done
    }

    /// A client sees the full state of a creature when it comes within
    /// range and a removal when it leaves. Its own creature is always in range.
    fn update_subscriptions(&mut self) -> SectionStatus {
        let radius = self.config.creatures.subscription_radius;
        for client in self.connections.values_mut() {
            let Some(session) = client.session else {
                continue;
            };
            let Some(centre) = self.world.creatures.get(&session.creature_id).map(|c| c.pos) else {
                continue;
            };

            let nearby: BTreeSet<CreatureId> = self
                .world
                .creatures
                .values()
                .filter(|c| c.id == session.creature_id || within(&c.pos, &centre, radius))
                .map(|c| c.id)
                .collect();

            for id in nearby.difference(&client.subscribed) {
                if let Some(creature) = self.world.creatures.get(id) {
                    self.router.send(
                        client.id,
                        Event::SetCreature {
                            partial: false,
                            creature: creature.view(),
                        },
                    );
                }
            }
            for id in client.subscribed.difference(&nearby) {
                self.router.send(client.id, Event::RemoveCreature { id: *id });
            }
            client.subscribed = nearby;
        }
        SectionStatus::Done
    }

    fn update_creatures(&mut self) -> SectionStatus {
        let tick = self.tick_count;
        let content = self.world.content.clone();
        let ids: Vec<CreatureId> = self.world.states.keys().copied().collect();

        for id in ids {
            let Some(mut state) = self.world.states.remove(&id) else {
                continue;
            };
            let intent = match self.world.creatures.get(&id) {
                Some(creature) => {
                    let mut surroundings = Surroundings {
                        map: &mut self.world.map,
                        content: &content,
                        creatures: &self.world.creatures,
                        config: &self.config.creatures,
                        tick,
                    };
                    state.update(creature, &mut surroundings, &mut self.rng)
                }
                None => Intent::Idle,
            };
            self.world.states.insert(id, state);

            match intent {
                Intent::Idle => {}
                Intent::Step(to) => {
                    if self.world.map.walkable(&to, &content) {
                        self.move_creature(id, to);
                    }
                }
                Intent::Attack(target) => self.attack_creature(id, target),
            }
        }
        SectionStatus::Done
    }

    /// Creatures standing on stairs or warp portals are moved once the
    /// destination has loaded and is walkable.
    async fn check_stairs(&mut self) -> SectionStatus {
        let content = self.world.content.clone();
        let mut moves: Vec<(CreatureId, TilePoint, TilePoint, bool)> = Vec::new();

        for (id, creature) in &self.world.creatures {
            if self.world.states.get(id).is_some_and(|s| s.warped) {
                continue;
            }
            let Some(item) = self.world.map.peek_tile(&creature.pos).and_then(|t| t.item.as_ref()) else {
                continue;
            };
            let meta = content.item(item.kind);
            let pos = creature.pos;
            match meta.class {
                ItemClass::CaveDown => moves.push((*id, pos, TilePoint { z: pos.z + 1, ..pos }, false)),
                ItemClass::CaveUp => moves.push((*id, pos, TilePoint { z: pos.z - 1, ..pos }, false)),
                _ if meta.trap_effect == Some(TrapEffect::Warp) => {
                    if let Some(to) = item.warp_to {
                        moves.push((*id, pos, to, true));
                    }
                }
                _ => {}
            }
        }

        for (id, from, to, animate) in moves {
            if !self.world.map.walkable_async(&to, &content).await {
                continue;
            }
            if !self.warp_creature(id, to).await {
                continue;
            }
            if animate {
                self.animation(from, "WarpOut");
                self.animation(to, "WarpIn");
            }
        }
        SectionStatus::Done
    }

    /// Advance growing items in resident sectors. A pass starts by advancing
    /// the world epoch and then visits a bounded batch of tiles per call.
    fn grow(&mut self) -> SectionStatus {
        if self.growth.is_none() {
            self.world.epoch += 1;
            let queue = self
                .world
                .map
                .partitions()
                .flat_map(|(w, p)| p.resident_coords().into_iter().map(move |coord| (w, coord)))
                .collect();
            self.growth = Some(GrowthSweep { queue });
        }

        let content = self.world.content.clone();
        let mut budget = GROWTH_BATCH_TILES;
        let mut changes: Vec<(TilePoint, Option<Item>)> = Vec::new();

        while budget > 0 {
            let Some((w, coord)) = self.growth.as_mut().and_then(|s| s.queue.pop_front()) else {
                break;
            };
            budget = budget.saturating_sub((SECTOR_SIZE * SECTOR_SIZE) as usize);

            let Ok(partition) = self.world.map.partition_mut(w) else {
                continue;
            };
            let grows = partition.sector(coord).is_some_and(|sector| {
                sector
                    .tiles()
                    .iter()
                    .filter_map(|t| t.item.as_ref())
                    .any(|item| content.item(item.kind).growth_delta.is_some())
            });
            if !grows {
                continue;
            }
            let Some(sector) = partition.sector_mut_for_growth(coord) else {
                continue;
            };

            let origin = coord.origin(w);
            for (index, tile) in sector.tiles_mut().iter_mut().enumerate() {
                let Some(item) = tile.item.as_mut() else {
                    continue;
                };
                let meta = content.item(item.kind);
                let Some(delta) = meta.growth_delta else {
                    continue;
                };
                let growth = item.growth.unwrap_or(0) + 1;
                if growth < delta {
                    item.growth = Some(growth);
                    continue;
                }
                tile.item = meta.growth_item.map(|kind| Item::new(kind, item.quantity));
                let index = index as i32;
                changes.push((origin.offset(index % SECTOR_SIZE, index / SECTOR_SIZE), tile.item.clone()));
            }
        }

        for (loc, item) in changes {
            self.router.filtered(
                Audience::partition(loc.w),
                Event::SetItem {
                    location: ItemLocation::world(loc),
                    item,
                },
            );
        }

        if self.growth.as_ref().is_some_and(|s| s.queue.is_empty()) {
            self.growth = None;
            SectionStatus::Done
        } else {
            SectionStatus::Yielded
        }
    }

    /// Grass eaters lose a point of food; starving ones take damage. Fed
    /// creatures recover a point of stamina.
    fn hunger(&mut self) -> SectionStatus {
        let mut starving = Vec::new();
        let mut resting = Vec::new();
        for creature in self.world.creatures.values_mut() {
            if creature.eat_grass {
                if creature.food == 0 {
                    starving.push(creature.id);
                    continue;
                }
                creature.food -= 1;
            }
            if creature.stamina.current < creature.stamina.max {
                resting.push(creature.id);
            }
        }
        for id in starving {
            self.modify_creature_life(None, id, -HUNGER_DAMAGE);
        }
        for id in resting {
            self.modify_creature_stamina(id, 1);
        }
        SectionStatus::Done
    }

    async fn autosave(&mut self) -> SectionStatus {
        match self.world.save().await {
            Ok(report) => info!(
                "Saved world: {} sectors, {} containers, {} players",
                report.sectors, report.containers, report.players
            ),
            Err(e) => warn!("World save failed: {}", e),
        }
        SectionStatus::Done
    }

    /// Every queued message of every connection, in arrival order per
    /// connection. Each message gets exactly one reply.
    async fn process_messages(&mut self) -> SectionStatus {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for connection in ids {
            let messages = match self.connections.get_mut(&connection) {
                Some(client) if !client.closed => client.queue.take_inbound(),
                _ => continue,
            };
            for text in messages {
                self.handle_message(connection, &text).await;
            }
        }
        SectionStatus::Done
    }

    async fn handle_message(&mut self, connection: ConnectionId, text: &str) {
        let Envelope { id, data: command } = match protocol::decode_command(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let id = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|value| value.get("id")?.as_u64())
                    .and_then(|id| u32::try_from(id).ok());
                debug!("Connection {} sent a malformed message: {}", connection, e);
                self.router.reply(connection, id, Reply::error(e.to_string()));
                return;
            }
        };

        let name = command.name();
        if self.config.server.verbose {
            info!("Connection {} -> {} {:?}", connection, name, command);
        } else {
            debug!("Connection {} -> {}", connection, name);
        }

        let reply = match AssertUnwindSafe(self.dispatch(connection, command)).catch_unwind().await {
            Ok(Ok(result)) => Reply::ok(result),
            Ok(Err(e)) => {
                debug!("{} from connection {} failed: {}", name, connection, e);
                Reply::error(e.to_string())
            }
            Err(_) => {
                error!("{} from connection {} panicked", name, connection);
                Reply::error("internal error")
            }
        };
        self.router.reply(connection, id, reply);
    }

    fn flush(&mut self) -> SectionStatus {
        let creatures = &self.world.creatures;
        self.router.route(&mut self.connections, |client| {
            client
                .session
                .and_then(|s| creatures.get(&s.creature_id))
                .map(|c| c.pos)
        });
        for client in self.connections.values_mut() {
            client.flush();
        }
        SectionStatus::Done
    }

    fn report_performance(&mut self) -> SectionStatus {
        let Some(summary) = self.scheduler.take_summary() else {
            return SectionStatus::Done;
        };
        if self.config.server.debug_timing {
            info!(
                "Performance: {:.1} ticks/sec, avg {:.2}ms, max {:.2}ms (tick #{})",
                summary.ticks_per_sec, summary.avg_tick_ms, summary.max_tick_ms, summary.longest_tick
            );
            if let Ok(msg) = serde_json::to_string(&summary) {
                self.router.broadcast(Event::Log { msg });
            }
        } else {
            debug!(
                "Performance: {:.1} ticks/sec, avg {:.2}ms, max {:.2}ms (tick #{})",
                summary.ticks_per_sec, summary.avg_tick_ms, summary.max_tick_ms, summary.longest_tick
            );
        }
        SectionStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::Content;
    use crate::persistence::{
        AccountRecord, ContainerRecord, MemoryStore, PlayerRecord, Store, StoreFuture, WorldMeta,
    };
    use crate::spatial::RetryPolicy;
    use crate::world::World;
    use protocol::{ContainerId, PlayerId, ServerMessage, Tile};
    use std::sync::Arc;

    /// Memory records, except that looking up the account `boom` panics
    /// while the command awaits it.
    struct ExplodingAccounts(MemoryStore);

    impl Store for ExplodingAccounts {
        fn load_meta(&self) -> StoreFuture<Option<WorldMeta>> {
            self.0.load_meta()
        }

        fn save_meta(&self, meta: WorldMeta) -> StoreFuture<()> {
            self.0.save_meta(meta)
        }

        fn load_sector(&self, w: u32, coord: SectorCoord) -> StoreFuture<Option<Vec<Tile>>> {
            self.0.load_sector(w, coord)
        }

        fn save_sector(&self, w: u32, coord: SectorCoord, tiles: Vec<Tile>) -> StoreFuture<()> {
            self.0.save_sector(w, coord, tiles)
        }

        fn load_container(&self, id: ContainerId) -> StoreFuture<Option<ContainerRecord>> {
            self.0.load_container(id)
        }

        fn save_container(&self, id: ContainerId, record: ContainerRecord) -> StoreFuture<()> {
            self.0.save_container(id, record)
        }

        fn load_player(&self, id: PlayerId) -> StoreFuture<Option<PlayerRecord>> {
            self.0.load_player(id)
        }

        fn save_player(&self, record: PlayerRecord) -> StoreFuture<()> {
            self.0.save_player(record)
        }

        fn load_account(&self, username: &str) -> StoreFuture<Option<AccountRecord>> {
            if username == "boom" {
                return async { panic!("account index corrupted") }.boxed();
            }
            self.0.load_account(username)
        }

        fn save_account(&self, record: AccountRecord) -> StoreFuture<()> {
            self.0.save_account(record)
        }
    }

    fn game_with(store: Option<Arc<dyn Store>>) -> GameState {
        let content = Arc::new(Content::builtin().unwrap());
        let mut world = World::new(content, store, RetryPolicy::default());
        world.map.add_partition(0, 60, 60, 2);
        let mut config = Config::default();
        config.world.seconds_per_world_tick = 1;
        let mut game = GameState::new(config, world);
        game.seed(3);
        game
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error_reply_with_id() {
        let mut game = game_with(None);
        let connection = game.connect(None);
        game.push_message(connection, r#"{"id":4,"data":{"type":"fly"}}"#);
        game.push_message(connection, "");
        game.tick().await;

        let replies: Vec<_> = game.connections.get_mut(&connection).unwrap().queue.take_outbound();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].id, Some(4));
        assert!(matches!(&replies[0].data, ServerMessage::Reply(r) if r.error.is_some()));
        assert_eq!(replies[1].id, None);
    }

    #[tokio::test]
    async fn test_panicking_command_gets_internal_error_and_others_run() {
        let store: Arc<dyn Store> = Arc::new(ExplodingAccounts(MemoryStore::new()));
        let mut game = game_with(Some(store));
        let ada = game.connect(None);
        let bob = game.connect(None);
        game.push_message(ada, r#"{"id":1,"data":{"type":"login","args":{"username":"boom","password":"pw"}}}"#);
        game.push_message(ada, r#"{"id":2,"data":{"type":"registerAccount","args":{"username":"ada","password":"pw"}}}"#);
        game.push_message(bob, r#"{"id":3,"data":{"type":"registerAccount","args":{"username":"bob","password":"pw"}}}"#);
        game.tick().await;

        let mut replies = Vec::new();
        for connection in [ada, bob] {
            for message in game.connections.get_mut(&connection).unwrap().queue.take_outbound() {
                if let ServerMessage::Reply(reply) = message.data {
                    replies.push((message.id, reply.error));
                }
            }
        }
        assert_eq!(
            replies,
            vec![(Some(1), Some("internal error".to_string())), (Some(2), None), (Some(3), None)]
        );
        assert_eq!(game.connections[&ada].account.as_deref(), Some("ada"));
        assert_eq!(game.connections[&bob].account.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_growth_converts_and_removes_items() {
        let mut game = game_with(None);
        let content = game.world.content.clone();
        let plant = content.item_by_name("Mana Plant").unwrap().clone();
        let ripe = plant.growth_item.unwrap();
        let remains = content.item_by_name("Decayed Remains").unwrap().clone();
        let a = TilePoint::new(0, 2, 2, 0);
        let b = TilePoint::new(0, 45, 45, 1);
        game.world.map.set_item(&a, Some(Item::new(plant.id, 1))).unwrap();
        game.world.map.set_item(&b, Some(Item::new(remains.id, 1))).unwrap();

        let period = game.scheduler.period(SectionId::Growth);
        let passes = plant.growth_delta.unwrap().max(remains.growth_delta.unwrap()) as u64;
        for _ in 0..(period * (passes + 1)) {
            game.tick().await;
        }
        assert_eq!(game.world.map.item(&a).map(|i| i.kind), Some(ripe));
        assert_eq!(game.world.map.item(&b), None);
        assert!(game.world.epoch >= passes);
    }

    #[test]
    fn test_growth_yields_over_many_sectors() {
        let mut game = game_with(None);
        for x in 0..3 {
            for y in 0..3 {
                game.world.map.tile(&TilePoint::new(0, x * SECTOR_SIZE, y * SECTOR_SIZE, 0));
            }
        }
        assert_eq!(game.grow(), SectionStatus::Yielded);
        assert_eq!(game.world.epoch, 1);
        while game.grow() == SectionStatus::Yielded {}
        assert_eq!(game.world.epoch, 1);
        assert!(game.growth.is_none());
    }

    #[tokio::test]
    async fn test_hunger_damages_starving_grass_eaters() {
        let mut game = game_with(None);
        let cow = game.world.content.monster_by_name("Cow").unwrap().id;
        let id = game.make_creature(cow, TilePoint::new(0, 10, 10, 0)).unwrap();
        game.world.creatures.get_mut(&id).unwrap().food = 1;
        let life = game.world.creatures[&id].life.current;

        game.hunger();
        assert_eq!(game.world.creatures[&id].food, 0);
        assert_eq!(game.world.creatures[&id].life.current, life);
        game.hunger();
        assert_eq!(game.world.creatures[&id].life.current, life - HUNGER_DAMAGE);
    }

    #[tokio::test]
    async fn test_stairs_move_down_and_do_not_bounce() {
        let mut game = game_with(None);
        let content = game.world.content.clone();
        let down = content.item_by_name("Cave Down").unwrap().id;
        let up = content.item_by_name("Cave Up").unwrap().id;
        let top = TilePoint::new(0, 10, 10, 0);
        let bottom = TilePoint::new(0, 10, 10, 1);
        game.world.map.set_item(&top, Some(Item::new(down, 1))).unwrap();
        game.world.map.set_item(&bottom, Some(Item::new(up, 1))).unwrap();
        let hermit = content.monster_by_name("Hermit").unwrap().id;
        let id = game.make_creature(hermit, top).unwrap();
        assert_eq!(game.world.creatures[&id].pos, top);

        game.check_stairs().await;
        assert_eq!(game.world.creatures[&id].pos, bottom);
        game.check_stairs().await;
        assert_eq!(game.world.creatures[&id].pos, bottom);
    }

    #[tokio::test]
    async fn test_failed_sector_load_is_broadcast_as_log() {
        let memory = MemoryStore::new();
        memory.fail_sector_loads(1);
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let mut game = game_with(Some(store));

        let connection = game.connect(None);
        game.connections.get_mut(&connection).unwrap().session = Some(crate::server::client::PlayerSession {
            player_id: 1,
            creature_id: 99,
            container_id: 1,
            equipment_container_id: 2,
            is_admin: false,
        });
        let coord = SectorCoord::new(1, 1, 0);
        game.world.map.sector_load(0, coord).unwrap();
        game.tick().await;

        let messages = game.connections.get_mut(&connection).unwrap().queue.take_outbound();
        assert!(
            messages
                .iter()
                .any(|m| matches!(&m.data, ServerMessage::Event(Event::Log { msg }) if msg.contains("failed to load")))
        );
        assert!(!game.world.map.partition(0).unwrap().is_resident(coord));
        assert_eq!(memory.sector_loads(), 1);
    }
}
