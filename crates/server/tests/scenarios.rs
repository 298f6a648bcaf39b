//! End-to-end scenarios driven through raw JSON messages and `tick`, the
//! way a WebSocket client would drive the server.

use protocol::{Envelope, Event, Item, ItemLocation, Reply, ReplyData, ServerMessage, TilePoint};
use serde_json::{Value, json};
use server::GameState;
use server::config::Config;
use server::content::{Content, ItemClass, MINE, MINED};
use server::persistence::{MemoryStore, Store};
use server::server::{ConnectionId, PlayerSession};
use server::spatial::RetryPolicy;
use server::world::World;
use std::sync::Arc;

const SPAWN: TilePoint = TilePoint::new(0, 40, 40, 0);

struct Harness {
    game: GameState,
    store: MemoryStore,
    next_id: u32,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new();
        let content = Arc::new(Content::builtin().unwrap());
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let mut world = World::new(content, Some(shared), RetryPolicy::default());
        world.map.add_partition(0, 80, 80, 1);
        let mut game = GameState::new(Config::default(), world);
        game.seed(3);
        Self { game, store, next_id: 1 }
    }

    /// Queue a command without ticking. Returns the envelope id.
    fn push(&mut self, connection: ConnectionId, data: Value) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.game
            .push_message(connection, json!({ "id": id, "data": data }).to_string());
        id
    }

    fn take(&mut self, connection: ConnectionId) -> Vec<Envelope<ServerMessage>> {
        self.game
            .connections
            .get_mut(&connection)
            .unwrap()
            .queue
            .take_outbound()
    }

    /// Send one command, tick, and return its reply plus every event the
    /// connection received during the tick.
    async fn call(&mut self, connection: ConnectionId, data: Value) -> (Reply, Vec<Event>) {
        let id = self.push(connection, data);
        self.game.tick().await;
        split(self.take(connection), id)
    }

    async fn login(&mut self, name: &str) -> (ConnectionId, PlayerSession) {
        let connection = self.game.connect(None);
        let username = name.to_lowercase();
        let (reply, _) = self
            .call(
                connection,
                json!({ "type": "registerAccount", "args": { "username": username, "password": "pw" } }),
            )
            .await;
        assert_eq!(reply.error, None);

        let (reply, _) = self
            .call(connection, json!({ "type": "createPlayer", "args": { "name": name } }))
            .await;
        let Some(ReplyData::PlayerCreated { player_id }) = reply.result else {
            panic!("expected a created player, got {:?}", reply);
        };

        let (reply, events) = self
            .call(connection, json!({ "type": "enterWorld", "args": { "playerId": player_id } }))
            .await;
        assert_eq!(reply.error, None);
        assert!(matches!(events.first(), Some(Event::Initialize { .. })));
        let session = self.game.connections[&connection].session.unwrap();
        (connection, session)
    }

    fn creature_pos(&self, session: &PlayerSession) -> TilePoint {
        self.game.world.creatures[&session.creature_id].pos
    }

    fn inventory_slot(&self, session: &PlayerSession, index: usize) -> Option<Item> {
        self.game.world.containers[&session.container_id].items[index].clone()
    }

    fn set_inventory_slot(&mut self, session: &PlayerSession, index: usize, item: Option<Item>) {
        self.game
            .world
            .containers
            .get_mut(&session.container_id)
            .unwrap()
            .items[index] = item;
    }

    fn world_item(&mut self, loc: TilePoint) -> Option<Item> {
        self.game.world.map.item(&loc).cloned()
    }
}

fn split(messages: Vec<Envelope<ServerMessage>>, id: u32) -> (Reply, Vec<Event>) {
    let mut reply = None;
    let mut events = Vec::new();
    for message in messages {
        match message.data {
            ServerMessage::Reply(r) if message.id == Some(id) => reply = Some(r),
            ServerMessage::Reply(_) => {}
            ServerMessage::Event(event) => events.push(event),
        }
    }
    (reply.expect("no reply for command"), events)
}

fn world(loc: TilePoint) -> Value {
    serde_json::to_value(ItemLocation::world(loc)).unwrap()
}

fn slot(id: u32, index: usize) -> Value {
    serde_json::to_value(ItemLocation::container(id, Some(index))).unwrap()
}

fn log_kind(game: &GameState) -> u32 {
    game.world.content.item_by_name("Log").unwrap().id
}

#[tokio::test]
async fn test_login_flow_and_bad_password() {
    let mut h = Harness::new();
    let (_, session) = h.login("Ada").await;
    assert_eq!(h.creature_pos(&session), SPAWN);
    assert!(h.store.player(session.player_id).is_some());

    let other = h.game.connect(None);
    let (reply, _) = h
        .call(other, json!({ "type": "login", "args": { "username": "ada", "password": "wrong" } }))
        .await;
    assert_eq!(reply.error.as_deref(), Some("invalid username or password"));

    let (reply, _) = h.call(other, json!({ "type": "move", "args": { "loc": SPAWN } })).await;
    assert_eq!(reply.error.as_deref(), Some("not logged in"));
}

#[tokio::test]
async fn test_mining_needs_a_pick() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let rock = TilePoint::new(0, 41, 40, 0);
    h.game.world.map.set_floor(&rock, MINE).unwrap();

    let pick = h.game.world.content.item_by_name("Pick").unwrap().id;
    let pick_slot = (0..h.game.world.containers[&session.container_id].items.len())
        .find(|&i| h.inventory_slot(&session, i).is_some_and(|item| item.kind == pick))
        .unwrap();
    let saved = h.inventory_slot(&session, pick_slot);
    h.set_inventory_slot(&session, pick_slot, None);

    let (reply, _) = h.call(connection, json!({ "type": "move", "args": { "loc": rock } })).await;
    assert_eq!(reply.error.as_deref(), Some("you need a pick to mine"));
    assert_eq!(h.game.world.map.tile(&rock).floor, MINE);
    assert_eq!(h.creature_pos(&session), SPAWN);

    h.set_inventory_slot(&session, pick_slot, saved);
    let (reply, events) = h.call(connection, json!({ "type": "move", "args": { "loc": rock } })).await;
    assert_eq!(reply.error, None);
    assert_eq!(h.game.world.map.tile(&rock).floor, MINED);
    assert_eq!(h.creature_pos(&session), rock);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::Animation { key, .. } if key == "MiningSound"))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::SetFloor { loc, floor } if *loc == rock && *floor == MINED))
    );

    let content = h.game.world.content.clone();
    let ore = events.iter().find_map(|e| match e {
        Event::SetItem {
            location: ItemLocation::World { loc },
            item: Some(item),
        } if content.item(item.kind).class == ItemClass::Ore => Some((*loc, item.kind)),
        _ => None,
    });
    let (ore_loc, ore_kind) = ore.expect("mining dropped no ore");
    assert!(ore_loc.chebyshev(&rock) <= 6);
    assert_eq!(h.world_item(ore_loc).map(|i| i.kind), Some(ore_kind));
}

#[tokio::test]
async fn test_bad_message_does_not_block_the_next_one() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let target = TilePoint::new(0, 40, 41, 0);

    h.game.push_message(connection, r#"{"id": 90, "data": {"type": "fly"}}"#);
    let good = h.push(connection, json!({ "type": "move", "args": { "loc": target } }));
    h.game.tick().await;

    let messages = h.take(connection);
    let (bad_reply, _) = split(messages.clone(), 90);
    assert!(bad_reply.error.is_some());
    let (good_reply, _) = split(messages, good);
    assert_eq!(good_reply.error, None);
    assert_eq!(h.creature_pos(&session), target);
}

#[tokio::test]
async fn test_failed_command_leaves_other_clients_alone() {
    let mut h = Harness::new();
    let (ada, ada_session) = h.login("Ada").await;
    let (bob, bob_session) = h.login("Bob").await;
    let empty = TilePoint::new(0, 45, 45, 0);
    let target = TilePoint::new(0, 38, 38, 0);
    let ada_pos = h.creature_pos(&ada_session);

    let bad = h.push(
        ada,
        json!({ "type": "moveItem", "args": { "from": world(empty), "to": slot(ada_session.container_id, 29) } }),
    );
    let after = h.push(ada, json!({ "type": "requestCreature", "args": { "id": bob_session.creature_id } }));
    let good = h.push(bob, json!({ "type": "move", "args": { "loc": target } }));
    h.game.tick().await;

    let messages = h.take(ada);
    let (bad_reply, _) = split(messages.clone(), bad);
    assert_eq!(bad_reply.error.as_deref(), Some("no item there"));
    let (after_reply, _) = split(messages, after);
    assert_eq!(after_reply.error, None);
    let (good_reply, _) = split(h.take(bob), good);
    assert_eq!(good_reply.error, None);

    assert_eq!(h.creature_pos(&bob_session), target);
    assert_eq!(h.creature_pos(&ada_session), ada_pos);
    assert_eq!(h.inventory_slot(&ada_session, 29), None);
}

#[tokio::test]
async fn test_walls_and_edges_block_movement() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let tree = TilePoint::new(0, 39, 40, 0);
    let pine = h.game.world.content.item_by_name("Pine Tree").unwrap().id;
    h.game.world.map.set_item(&tree, Some(Item::new(pine, 1))).unwrap();

    let (reply, _) = h.call(connection, json!({ "type": "move", "args": { "loc": tree } })).await;
    assert_eq!(reply.error.as_deref(), Some("not walkable"));
    let (reply, _) = h
        .call(connection, json!({ "type": "move", "args": { "loc": TilePoint::new(0, 80, 40, 0) } }))
        .await;
    assert_eq!(reply.error.as_deref(), Some("out of bounds"));
    assert_eq!(h.creature_pos(&session), SPAWN);

    let (reply, _) = h
        .call(
            connection,
            json!({ "type": "moveItem", "args": { "from": world(tree), "to": slot(session.container_id, 29) } }),
        )
        .await;
    assert_eq!(reply.error.as_deref(), Some("that cannot be moved"));
    assert_eq!(h.world_item(tree).map(|i| i.kind), Some(pine));
}

#[tokio::test]
async fn test_stacking_conserves_quantity() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let log = log_kind(&h.game);
    let pile = TilePoint::new(0, 42, 42, 0);
    h.game.world.map.set_item(&pile, Some(Item::new(log, 3))).unwrap();
    h.set_inventory_slot(&session, 29, Some(Item::new(log, 5)));

    let (reply, _) = h
        .call(
            connection,
            json!({ "type": "moveItem", "args": { "from": world(pile), "to": slot(session.container_id, 29) } }),
        )
        .await;
    assert_eq!(reply.error, None);
    assert_eq!(h.world_item(pile), None);
    assert_eq!(h.inventory_slot(&session, 29).map(|i| i.quantity), Some(8));

    h.game
        .world
        .map
        .set_item(&pile, Some(Item::new(log, server::content::MAX_STACK)))
        .unwrap();
    let (reply, _) = h
        .call(
            connection,
            json!({ "type": "moveItem", "args": { "from": slot(session.container_id, 29), "to": world(pile) } }),
        )
        .await;
    assert_eq!(reply.error.as_deref(), Some("stack is full"));
    assert_eq!(h.inventory_slot(&session, 29).map(|i| i.quantity), Some(8));
    assert_eq!(h.world_item(pile).map(|i| i.quantity), Some(server::content::MAX_STACK));
}

#[tokio::test]
async fn test_dropping_onto_a_box_fills_it() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let log = log_kind(&h.game);
    let box_kind = h.game.world.content.item_by_name("Wooden Box").unwrap().id;
    let spot = TilePoint::new(0, 41, 41, 0);
    h.game.world.map.set_item(&spot, Some(Item::new(box_kind, 1))).unwrap();
    h.set_inventory_slot(&session, 29, Some(Item::new(log, 4)));

    let (reply, _) = h
        .call(
            connection,
            json!({ "type": "moveItem", "args": { "from": slot(session.container_id, 29), "to": world(spot) } }),
        )
        .await;
    assert_eq!(reply.error, None);
    assert_eq!(h.inventory_slot(&session, 29), None);

    let chest = h.world_item(spot).unwrap();
    assert_eq!(chest.kind, box_kind);
    let inside = &h.game.world.containers[&chest.container_id.unwrap()];
    assert_eq!(inside.items[0], Some(Item::new(log, 4)));
}

#[tokio::test]
async fn test_moving_an_item_onto_itself_changes_nothing() {
    let mut h = Harness::new();
    let (connection, session) = h.login("Ada").await;
    let before = h.inventory_slot(&session, 0);

    let (reply, events) = h
        .call(
            connection,
            json!({ "type": "moveItem", "args": { "from": slot(session.container_id, 0), "to": slot(session.container_id, 0) } }),
        )
        .await;
    assert_eq!(reply.error, None);
    assert!(events.is_empty(), "unexpected events: {:?}", events);
    assert_eq!(h.inventory_slot(&session, 0), before);
}

#[tokio::test]
async fn test_concurrent_sector_requests_load_once() {
    let mut h = Harness::new();
    let (ada, _) = h.login("Ada").await;
    let (bob, _) = h.login("Bob").await;
    let loads = h.store.sector_loads();

    let far = TilePoint::new(0, 3, 3, 0);
    let first = h.push(ada, json!({ "type": "requestSector", "args": { "loc": far } }));
    let second = h.push(bob, json!({ "type": "requestSector", "args": { "loc": far } }));
    h.game.tick().await;

    assert_eq!(h.store.sector_loads(), loads + 1);
    for (connection, id) in [(ada, first), (bob, second)] {
        let (reply, events) = split(h.take(connection), id);
        assert_eq!(reply.error, None);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, Event::Sector { loc, .. } if *loc == far))
        );
    }

    let (reply, _) = h
        .call(ada, json!({ "type": "requestSector", "args": { "loc": TilePoint::new(0, 4, 0, 0) } }))
        .await;
    assert_eq!(reply.error.as_deref(), Some("out of bounds"));
}
