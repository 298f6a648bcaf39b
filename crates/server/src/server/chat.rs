//! Chat lines and `/` commands.

use super::client::ConnectionId;
use super::game::GameState;
use crate::error::CommandError;
use protocol::TilePoint;
use tracing::info;

const HELP: &str = "Commands: /help, /who, /time, /warp x y [z] [w], /spawn <monster>";

impl GameState {
    pub(super) async fn handle_chat(&mut self, connection: ConnectionId, to: &str, message: &str) -> Result<(), CommandError> {
        let session = self.session(connection)?;
        if message.starts_with('/') {
            self.handle_chat_command(connection, message).await;
            return Ok(());
        }

        let name = self
            .world
            .players
            .get(&session.player_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        info!("[Chat] {}: {}", name, message);
        self.router.broadcast(protocol::Event::Chat {
            from: name,
            to: to.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Results and errors of chat commands are server chat lines, not
    /// command errors.
    async fn handle_chat_command(&mut self, connection: ConnectionId, command: &str) {
        let parts: Vec<&str> = command[1..].splitn(2, ' ').collect();
        let cmd = parts.first().map(|s| s.to_lowercase()).unwrap_or_default();
        let args = parts.get(1).copied().unwrap_or("").trim();

        let is_admin = self.session(connection).is_ok_and(|s| s.is_admin);

        match cmd.as_str() {
            "help" => self.send_server_message(connection, HELP),
            "who" => {
                let online = self.players_online();
                let message = format!("{} online: {}", online.len(), online.join(", "));
                self.send_server_message(connection, &message);
            }
            "time" => {
                let message = format!("It is {}.", self.time_description());
                self.send_server_message(connection, &message);
            }
            "warp" => {
                if !is_admin {
                    self.send_server_message(connection, "error: not allowed");
                    return;
                }
                if let Err(e) = self.handle_cmd_warp(connection, args).await {
                    self.send_server_message(connection, &format!("error: {}", e));
                }
            }
            "spawn" => {
                if !is_admin {
                    self.send_server_message(connection, "error: not allowed");
                    return;
                }
                if let Err(e) = self.handle_cmd_spawn(connection, args) {
                    self.send_server_message(connection, &format!("error: {}", e));
                }
            }
            _ => self.send_server_message(connection, &format!("unknown command: {}", command)),
        }
    }

    /// `/warp x y [z] [w]`; omitted coordinates keep the current ones.
    async fn handle_cmd_warp(&mut self, connection: ConnectionId, args: &str) -> Result<(), String> {
        let session = self.session(connection).map_err(|e| e.to_string())?;
        let usage = || "usage: /warp x y [z] [w]".to_string();
        let numbers = args
            .split_whitespace()
            .map(str::parse::<i32>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| usage())?;
        let from = self
            .world
            .creatures
            .get(&session.creature_id)
            .map(|c| c.pos)
            .ok_or_else(|| "no creature".to_string())?;

        let to = match numbers[..] {
            [x, y] => TilePoint { x, y, ..from },
            [x, y, z] => TilePoint { x, y, z, ..from },
            [x, y, z, w] => {
                let w = u32::try_from(w).map_err(|_| usage())?;
                TilePoint::new(w, x, y, z)
            }
            _ => return Err(usage()),
        };

        if !self.world.map.in_bounds(&to) {
            return Err("out of bounds".to_string());
        }
        let content = self.world.content.clone();
        if !self.world.map.walkable_async(&to, &content).await {
            return Err("not walkable".to_string());
        }
        if !self.warp_creature(session.creature_id, to).await {
            return Err("warp failed".to_string());
        }
        self.animation(from, "WarpOut");
        self.animation(to, "WarpIn");
        Ok(())
    }

    fn handle_cmd_spawn(&mut self, connection: ConnectionId, args: &str) -> Result<(), String> {
        let session = self.session(connection).map_err(|e| e.to_string())?;
        let template = self
            .world
            .content
            .monster_by_name(args)
            .map(|m| m.id)
            .ok_or_else(|| format!("unknown monster {}", args))?;
        let near = self
            .world
            .creatures
            .get(&session.creature_id)
            .map(|c| c.pos)
            .ok_or_else(|| "no creature".to_string())?;
        let id = self
            .make_creature(template, near)
            .ok_or_else(|| "no room nearby".to_string())?;
        info!("Spawned {} {} near {}", args, id, near);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::Content;
    use crate::entity::Player;
    use crate::server::client::PlayerSession;
    use crate::spatial::RetryPolicy;
    use crate::world::World;
    use protocol::{ContainerKind, Event, ServerMessage};
    use std::sync::Arc;

    fn game() -> GameState {
        let content = Arc::new(Content::builtin().unwrap());
        let mut world = World::new(content, None, RetryPolicy::default());
        world.map.add_partition(0, 60, 60, 2);
        let mut game = GameState::new(Config::default(), world);
        game.seed(11);
        game
    }

    fn player(game: &mut GameState, name: &str, pos: TilePoint, is_admin: bool) -> (ConnectionId, PlayerSession) {
        let connection = game.connect(None);
        let inventory = game.world.make_container(ContainerKind::Normal, 4);
        let equipment = game.world.make_container(ContainerKind::Equipment, 5);
        let player_id = game.world.allocate_player_id();
        let record = Player::new_record(player_id, name, pos, inventory, equipment);
        let (player, creature) = Player::from_record(record, 0);
        let creature_id = game.world.register_creature(creature);
        game.world.players.insert(player_id, Player { creature_id, ..player });
        let session = PlayerSession {
            player_id,
            creature_id,
            container_id: inventory,
            equipment_container_id: equipment,
            is_admin,
        };
        game.connections.get_mut(&connection).unwrap().session = Some(session);
        (connection, session)
    }

    fn chat_lines(game: &mut GameState, connection: ConnectionId) -> Vec<(String, String)> {
        game.router.route(&mut game.connections, |_| None);
        game.connections
            .get_mut(&connection)
            .unwrap()
            .queue
            .take_outbound()
            .into_iter()
            .filter_map(|m| match m.data {
                ServerMessage::Event(Event::Chat { from, message, .. }) => Some((from, message)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_plain_chat_reaches_everyone() {
        let mut game = game();
        let (ada, _) = player(&mut game, "Ada", TilePoint::new(0, 5, 5, 0), false);
        let (bob, _) = player(&mut game, "Bob", TilePoint::new(0, 50, 50, 0), false);
        game.handle_chat(ada, "global", "hello").await.unwrap();
        let expected = vec![("Ada".to_string(), "hello".to_string())];
        game.router.route(&mut game.connections, |_| None);
        for connection in [ada, bob] {
            let lines: Vec<_> = game.connections.get_mut(&connection).unwrap().queue.take_outbound();
            assert_eq!(lines.len(), 1);
        }
        game.handle_chat(bob, "global", "/who").await.unwrap();
        assert_eq!(chat_lines(&mut game, bob), vec![("SERVER".to_string(), "2 online: Ada, Bob".to_string())]);
        game.handle_chat(ada, "global", "hello").await.unwrap();
        assert_eq!(chat_lines(&mut game, bob), expected);
    }

    #[tokio::test]
    async fn test_help_and_unknown_command() {
        let mut game = game();
        let (ada, _) = player(&mut game, "Ada", TilePoint::new(0, 5, 5, 0), false);
        game.handle_chat(ada, "global", "/help").await.unwrap();
        game.handle_chat(ada, "global", "/dance now").await.unwrap();
        game.handle_chat(ada, "global", "/warp 1 1").await.unwrap();
        let lines = chat_lines(&mut game, ada);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|(from, _)| from == "SERVER"));
        assert_eq!(lines[0].1, HELP);
        assert_eq!(lines[1].1, "unknown command: /dance now");
        assert_eq!(lines[2].1, "error: not allowed");
    }

    #[tokio::test]
    async fn test_warp_and_spawn() {
        let mut game = game();
        let (ada, session) = player(&mut game, "Ada", TilePoint::new(0, 5, 5, 0), true);

        game.handle_chat(ada, "global", "/warp 30 31 1").await.unwrap();
        assert_eq!(game.world.creatures[&session.creature_id].pos, TilePoint::new(0, 30, 31, 1));
        game.handle_chat(ada, "global", "/warp 300 1").await.unwrap();
        assert_eq!(game.world.creatures[&session.creature_id].pos, TilePoint::new(0, 30, 31, 1));

        game.handle_chat(ada, "global", "/spawn Wolf").await.unwrap();
        let wolf = game.world.creatures.values().find(|c| c.name == "Wolf").unwrap();
        assert!(wolf.pos.chebyshev(&TilePoint::new(0, 30, 31, 1)) <= 1);
        assert_eq!(wolf.pos.z, 1);

        game.handle_chat(ada, "global", "/spawn Dragon").await.unwrap();
        let lines = chat_lines(&mut game, ada);
        assert_eq!(lines.last().unwrap().1, "error: unknown monster Dragon");
        assert!(lines.iter().any(|(_, m)| m == "error: out of bounds"));
    }

    #[tokio::test]
    async fn test_warp_rejects_numbers_outside_i32() {
        let mut game = game();
        let (ada, session) = player(&mut game, "Ada", TilePoint::new(0, 5, 5, 0), true);
        for args in ["/warp 99999999999 1", "/warp 1 1 0 -1", "/warp 1 1 0 4294967296", "/warp 1"] {
            game.handle_chat(ada, "global", args).await.unwrap();
        }
        let lines = chat_lines(&mut game, ada);
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|(_, m)| m == "error: usage: /warp x y [z] [w]"));
        assert_eq!(game.world.creatures[&session.creature_id].pos, TilePoint::new(0, 5, 5, 0));
    }
}
