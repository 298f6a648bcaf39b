//! Client connections.
//!
//! A connection is a pair of queues plus the session that grows on it as the
//! client logs in and enters the world. The transport only ever pushes raw
//! inbound text and drains typed outbound envelopes.

use protocol::{ContainerId, CreatureId, DialogueView, Envelope, PlayerId, ServerMessage};
use std::collections::{BTreeSet, HashSet, VecDeque};
use tokio::sync::mpsc;

pub type ConnectionId = u32;

/// Outbound side of a connection as seen by the transport.
pub type Outbox = mpsc::UnboundedSender<Envelope<ServerMessage>>;

/// Inbound and outbound buffers. Enqueue and dequeue only.
#[derive(Debug, Default)]
pub struct ConnectionQueue {
    inbound: VecDeque<String>,
    outbound: VecDeque<Envelope<ServerMessage>>,
}

impl ConnectionQueue {
    pub fn push_inbound(&mut self, text: String) {
        self.inbound.push_back(text);
    }

    pub fn has_message(&self) -> bool {
        !self.inbound.is_empty()
    }

    pub fn next_message(&mut self) -> Option<String> {
        self.inbound.pop_front()
    }

    /// Everything received so far, in arrival order.
    pub fn take_inbound(&mut self) -> Vec<String> {
        self.inbound.drain(..).collect()
    }

    pub fn send(&mut self, message: Envelope<ServerMessage>) {
        self.outbound.push_back(message);
    }

    pub fn take_outbound(&mut self) -> Vec<Envelope<ServerMessage>> {
        self.outbound.drain(..).collect()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}

/// The player a connection is playing, once it has entered the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub creature_id: CreatureId,
    pub container_id: ContainerId,
    pub equipment_container_id: ContainerId,
    pub is_admin: bool,
}

/// A conversation in progress with a creature.
#[derive(Debug, Clone)]
pub struct ActiveDialogue {
    pub dialogue: DialogueView,
    pub part: usize,
}

#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub queue: ConnectionQueue,
    outbox: Option<Outbox>,
    /// Set by the transport when the socket goes away; the connection is
    /// dropped by the next tick.
    pub closed: bool,
    /// Account name after a successful login.
    pub account: Option<String>,
    pub session: Option<PlayerSession>,
    /// Containers opened with `requestContainer`.
    pub registered_containers: HashSet<ContainerId>,
    /// Creatures this client currently receives updates for.
    pub subscribed: BTreeSet<CreatureId>,
    pub dialogue: Option<ActiveDialogue>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, outbox: Option<Outbox>) -> Self {
        Self {
            id,
            queue: ConnectionQueue::default(),
            outbox,
            closed: false,
            account: None,
            session: None,
            registered_containers: HashSet::new(),
            subscribed: BTreeSet::new(),
            dialogue: None,
        }
    }

    pub fn in_world(&self) -> bool {
        self.session.is_some()
    }

    /// Whether this client may address slots of `container_id` directly.
    pub fn can_access_container(&self, container_id: ContainerId) -> bool {
        self.session.is_some_and(|s| s.container_id == container_id || s.equipment_container_id == container_id)
            || self.registered_containers.contains(&container_id)
    }

    /// Hand queued outbound messages to the transport. Without an outbox they
    /// stay queued. A closed outbox marks the connection closed.
    pub fn flush(&mut self) -> usize {
        let Some(outbox) = &self.outbox else {
            return 0;
        };
        let mut sent = 0;
        for message in self.queue.take_outbound() {
            if outbox.send(message).is_err() {
                self.closed = true;
                break;
            }
            sent += 1;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Event, Reply};

    #[test]
    fn test_queue_preserves_order() {
        let mut queue = ConnectionQueue::default();
        queue.push_inbound("a".to_string());
        queue.push_inbound("b".to_string());
        assert!(queue.has_message());
        assert_eq!(queue.next_message().as_deref(), Some("a"));
        assert_eq!(queue.take_inbound(), vec!["b".to_string()]);
        assert!(!queue.has_message());

        queue.send(Envelope::new(Some(1), Reply::ok(None).into()));
        queue.send(Envelope::new(None, Event::Time { epoch: 3 }.into()));
        let out = queue.take_outbound();
        assert_eq!(out[0].id, Some(1));
        assert_eq!(out[1].data, ServerMessage::Event(Event::Time { epoch: 3 }));
        assert_eq!(queue.outbound_len(), 0);
    }

    #[test]
    fn test_container_access() {
        let mut connection = ClientConnection::new(1, None);
        assert!(!connection.can_access_container(5));
        connection.session = Some(PlayerSession {
            player_id: 1,
            creature_id: 2,
            container_id: 5,
            equipment_container_id: 6,
            is_admin: false,
        });
        assert!(connection.can_access_container(5));
        assert!(connection.can_access_container(6));
        assert!(!connection.can_access_container(7));
        connection.registered_containers.insert(7);
        assert!(connection.can_access_container(7));
    }

    #[test]
    fn test_flush_to_dropped_outbox_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connection = ClientConnection::new(1, Some(tx));
        connection.queue.send(Envelope::new(None, Event::Time { epoch: 1 }.into()));
        assert_eq!(connection.flush(), 1);
        drop(rx);
        connection.queue.send(Envelope::new(None, Event::Time { epoch: 2 }.into()));
        connection.flush();
        assert!(connection.closed);
    }
}
