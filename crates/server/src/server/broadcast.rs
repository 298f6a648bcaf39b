//! Outbound event routing.
//!
//! Handlers never write to connections. They queue a message with an
//! [`Audience`]; the flush section resolves audiences against the live
//! connections and appends to each connection's outbound queue in the order
//! the messages were queued.

use super::client::{ClientConnection, ConnectionId};
use glam::Vec2;
use protocol::{ContainerId, CreatureId, Envelope, ServerMessage, TilePoint};
use std::collections::BTreeMap;

/// A predicate over a connection and the position of its creature.
pub type Filter = Box<dyn Fn(&ClientConnection, Option<TilePoint>) -> bool + Send + Sync>;

pub enum Audience {
    /// One connection, logged in or not.
    Connection(ConnectionId),
    /// Every connection that has entered the world.
    All,
    /// Connections in the world that pass the filter.
    Filtered(Filter),
}

impl Audience {
    /// Clients subscribed to a creature.
    pub fn subscribers(creature_id: CreatureId) -> Self {
        Audience::Filtered(Box::new(move |connection, _| connection.subscribed.contains(&creature_id)))
    }

    /// Clients whose creature stands on the same level within `radius` tiles.
    pub fn near(loc: TilePoint, radius: f32) -> Self {
        Audience::Filtered(Box::new(move |_, pos| pos.is_some_and(|pos| within(&pos, &loc, radius))))
    }

    /// Clients whose creature is in partition `w`.
    pub fn partition(w: u32) -> Self {
        Audience::Filtered(Box::new(move |_, pos| pos.is_some_and(|pos| pos.w == w)))
    }

    /// Clients that own or have opened a container.
    pub fn container(container_id: ContainerId) -> Self {
        Audience::Filtered(Box::new(move |connection, _| connection.can_access_container(container_id)))
    }
}

/// Same partition and level, planar distance at most `radius`.
pub fn within(a: &TilePoint, b: &TilePoint, radius: f32) -> bool {
    a.same_plane(b)
        && Vec2::new(a.x as f32, a.y as f32).distance(Vec2::new(b.x as f32, b.y as f32)) <= radius
}

#[derive(Default)]
pub struct BroadcastRouter {
    pending: Vec<(Audience, Envelope<ServerMessage>)>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, audience: Audience, message: Envelope<ServerMessage>) {
        self.pending.push((audience, message));
    }

    /// Reply to a command, correlated by the command's envelope id.
    pub fn reply(&mut self, connection: ConnectionId, id: Option<u32>, message: impl Into<ServerMessage>) {
        self.queue(Audience::Connection(connection), Envelope::new(id, message.into()));
    }

    /// An uncorrelated message for one connection.
    pub fn send(&mut self, connection: ConnectionId, message: impl Into<ServerMessage>) {
        self.queue(Audience::Connection(connection), Envelope::new(None, message.into()));
    }

    pub fn broadcast(&mut self, message: impl Into<ServerMessage>) {
        self.queue(Audience::All, Envelope::new(None, message.into()));
    }

    pub fn filtered(&mut self, audience: Audience, message: impl Into<ServerMessage>) {
        self.queue(audience, Envelope::new(None, message.into()));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resolve every queued message into connection queues. `position` maps
    /// a connection to the position of its creature.
    pub fn route(
        &mut self,
        connections: &mut BTreeMap<ConnectionId, ClientConnection>,
        position: impl Fn(&ClientConnection) -> Option<TilePoint>,
    ) -> usize {
        let mut delivered = 0;
        let positions: BTreeMap<ConnectionId, Option<TilePoint>> =
            connections.iter().map(|(id, connection)| (*id, position(connection))).collect();

        for (audience, message) in self.pending.drain(..) {
            match audience {
                Audience::Connection(id) => {
                    if let Some(connection) = connections.get_mut(&id) {
                        connection.queue.send(message);
                        delivered += 1;
                    }
                }
                Audience::All => {
                    for connection in connections.values_mut().filter(|c| c.in_world()) {
                        connection.queue.send(message.clone());
                        delivered += 1;
                    }
                }
                Audience::Filtered(filter) => {
                    for connection in connections.values_mut().filter(|c| c.in_world()) {
                        let pos = positions.get(&connection.id).copied().flatten();
                        if filter(connection, pos) {
                            connection.queue.send(message.clone());
                            delivered += 1;
                        }
                    }
                }
            }
        }
        delivered
    }
}
