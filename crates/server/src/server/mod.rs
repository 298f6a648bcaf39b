//! Game server: the WebSocket transport and the simulation it drives.

use crate::config::Config;
use crate::content::Content;
use crate::persistence::{FsStore, Store};
use crate::world::World;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub mod broadcast;
mod chat;
pub mod client;
mod commands;
pub mod game;
pub mod sections;
mod session;
pub mod tick;

pub use broadcast::{Audience, BroadcastRouter};
pub use client::{ClientConnection, ConnectionId, ConnectionQueue, PlayerSession};
pub use game::{GameState, run_game_loop};
pub use tick::{SectionId, SectionStatus, TickScheduler};

/// Open sockets, shared by the connection handlers.
#[derive(Debug, Default)]
struct ConnectionLimit {
    total: usize,
}

impl ConnectionLimit {
    /// Try to add a connection, returns true if allowed.
    fn try_add(&mut self, max_total: usize) -> bool {
        if self.total >= max_total {
            return false;
        }
        self.total += 1;
        true
    }

    fn remove(&mut self) {
        self.total = self.total.saturating_sub(1);
    }
}

/// Run the game server until ctrl-c, then save the world.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let content = Arc::new(Content::load(config.content.path.as_deref())?);
    info!("Loaded content: {} skills", content.skills().len());

    std::fs::create_dir_all(&config.server.data_dir)?;
    let store: Arc<dyn Store> = Arc::new(FsStore::new(&config.server.data_dir));
    let world = World::open(&config, content, Some(store)).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);

    let game_state = Arc::new(RwLock::new(GameState::new(config.clone(), world)));

    let game_loop_state = Arc::clone(&game_state);
    let tick_interval = config.server.tick_interval_ms;
    tokio::spawn(async move {
        game::run_game_loop(game_loop_state, tick_interval).await;
    });

    tokio::select! {
        result = accept_connections(listener, Arc::clone(&game_state), config.server.max_connections) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let mut game = game_state.write().await;
    let report = game.world.save().await?;
    info!(
        "Saved {} sectors, {} containers, {} players ({} failures)",
        report.sectors, report.containers, report.players, report.failures
    );
    Ok(())
}

async fn accept_connections(
    listener: TcpListener,
    game_state: Arc<RwLock<GameState>>,
    max_connections: usize,
) -> anyhow::Result<()> {
    let limit = Arc::new(RwLock::new(ConnectionLimit::default()));

    loop {
        let (stream, addr) = listener.accept().await?;

        if !limit.write().await.try_add(max_connections) {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let game_state = Arc::clone(&game_state);
        let limit = Arc::clone(&limit);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, game_state).await;
            limit.write().await.remove();
            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection. Inbound text goes to the game's
/// connection queue; the game hands outbound messages back through an
/// unbounded channel when it flushes.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, game_state: Arc<RwLock<GameState>>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New connection from {}", addr);

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = game_state.write().await.connect(Some(tx));

    let result = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        game_state.write().await.push_message(connection, text.as_str());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame from {}", addr);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} disconnected", addr);
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e.into()),
                    Some(Ok(_)) => {}
                }
            }
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    break Ok(());
                };
                let text = match protocol::encode_message(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode message for {}: {}", addr, e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::text(text)).await {
                    break Err(e.into());
                }
            }
        }
    };

    game_state.write().await.disconnect(connection);
    result
}
