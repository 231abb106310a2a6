//! WebSocket transport.
//!
//! One connection to the hosting service. The reader task validates every
//! inbound frame at the boundary and routes it: lobby events to the
//! supervisor, per-game events to their session channels (briefly buffered
//! when the session has not registered yet), acks to their waiting actions.
//! The writer task drains the shared outbound frame stream. Malformed
//! frames are logged and dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::HostingConfig;
use super::client::{ActionClient, ApiError, PendingAcks};
use super::protocol::{AuthResult, ClientFrame, GameEvent, LobbyEvent, ServerFrame};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lobby events queued for the supervisor.
const LOBBY_BUFFER: usize = 64;
/// Events queued per game session.
const GAME_BUFFER: usize = 32;
/// Outbound frames queued for the writer.
const OUTBOUND_BUFFER: usize = 64;
/// Events held for a game whose session has not registered yet.
const BACKLOG_CAP: usize = 8;
/// Deadline for the authentication exchange.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// A live, authenticated connection.
pub struct Connection {
    /// Our account id, as confirmed by the service.
    pub account_id: String,
    /// Lobby event stream.
    pub lobby: mpsc::Receiver<LobbyEvent>,
    /// Action handle shared by sessions and the matchmaker.
    pub client: ActionClient,
    /// Registry of per-game event channels.
    pub router: GameRouter,
}

/// Hands per-game event streams to their sessions.
#[derive(Clone, Default)]
pub struct GameRouter {
    inner: Arc<Mutex<RouterInner>>,
}

#[derive(Default)]
struct RouterInner {
    channels: BTreeMap<String, mpsc::Sender<GameEvent>>,
    /// Events that raced ahead of their session's registration.
    backlog: BTreeMap<String, Vec<GameEvent>>,
}

impl GameRouter {
    /// Register a session for a game and receive its event stream, flushing
    /// any events that arrived first.
    pub async fn subscribe(&self, game_id: &str) -> mpsc::Receiver<GameEvent> {
        let (tx, rx) = mpsc::channel(GAME_BUFFER);
        let mut inner = self.inner.lock().await;
        if let Some(backlog) = inner.backlog.remove(game_id) {
            for event in backlog {
                // Backlog is capped well below the channel size.
                let _ = tx.try_send(event);
            }
        }
        inner.channels.insert(game_id.to_string(), tx);
        rx
    }

    /// Drop a finished game's channel; its session sees the stream end.
    pub async fn unsubscribe(&self, game_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.channels.remove(game_id);
        inner.backlog.remove(game_id);
    }

    async fn route(&self, game_id: String, event: GameEvent) {
        let mut inner = self.inner.lock().await;
        match inner.channels.get(&game_id) {
            Some(tx) => {
                // Dropping is safe: every update carries the full move
                // list, so the next one that fits restores the state.
                if tx.try_send(event).is_err() {
                    warn!(game_id = %game_id, "session event queue full, dropping update");
                }
            }
            None => {
                let backlog = inner.backlog.entry(game_id.clone()).or_default();
                if backlog.len() < BACKLOG_CAP {
                    backlog.push(event);
                } else {
                    warn!(game_id = %game_id, "no session and backlog full, dropping event");
                }
            }
        }
    }
}

/// Connect, authenticate, and spawn the reader and writer tasks.
///
/// A torn connection later on broadcasts the shutdown signal: the process
/// winds down rather than playing on with a dead socket.
pub async fn connect(
    config: &HostingConfig,
    shutdown: broadcast::Sender<()>,
) -> Result<Connection, ApiError> {
    let (socket, _) = connect_async(config.url.as_str())
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();

    // Authenticate before anything else touches the socket.
    let auth = ClientFrame::Auth {
        token: config.token.clone().unwrap_or_default(),
        client_version: crate::VERSION.to_string(),
    };
    send_frame(&mut sink, &auth).await?;
    let result = tokio::time::timeout(AUTH_TIMEOUT, wait_for_auth(&mut stream))
        .await
        .map_err(|_| ApiError::Auth("no authentication response".to_string()))??;
    if !result.success {
        return Err(ApiError::Auth(
            result.error.unwrap_or_else(|| "rejected".to_string()),
        ));
    }
    let account_id = result
        .account_id
        .ok_or_else(|| ApiError::Auth("no account id in response".to_string()))?;
    info!(account_id = %account_id, "authenticated with the hosting service");

    let (client, mut outbound) = ActionClient::channel(OUTBOUND_BUFFER);
    let (lobby_tx, lobby_rx) = mpsc::channel(LOBBY_BUFFER);
    let router = GameRouter::default();

    // Writer: drain outbound frames onto the socket.
    let writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(err) = send_frame(&mut sink, &frame).await {
                error!(%err, "write failed, closing connection");
                let _ = writer_shutdown.send(());
                break;
            }
        }
    });

    // Reader: validate and route inbound frames.
    let reader = Reader {
        pending: client.pending_acks(),
        frames: client.frame_sender(),
        lobby: lobby_tx,
        router: router.clone(),
        shutdown: shutdown.clone(),
    };
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(message)) => reader.handle(message).await,
                        Some(Err(err)) => {
                            error!(%err, "read failed, closing connection");
                            break;
                        }
                        None => {
                            error!("hosting service closed the connection");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("reader stopping on shutdown");
                    return;
                }
            }
        }
        let _ = reader.shutdown.send(());
    });

    Ok(Connection {
        account_id,
        lobby: lobby_rx,
        client,
        router,
    })
}

struct Reader {
    pending: Arc<PendingAcks>,
    frames: mpsc::Sender<ClientFrame>,
    lobby: mpsc::Sender<LobbyEvent>,
    router: GameRouter,
    shutdown: broadcast::Sender<()>,
}

impl Reader {
    async fn handle(&self, message: Message) {
        let text = match message {
            Message::Text(text) => text,
            // Protocol-level ping/pong is handled by the socket itself.
            Message::Ping(_) | Message::Pong(_) => return,
            Message::Close(_) => {
                warn!("close frame from the hosting service");
                return;
            }
            other => {
                warn!(kind = ?other, "unexpected message kind ignored");
                return;
            }
        };

        let frame = match ServerFrame::from_json(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "ignoring malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::AuthResult(_) => warn!("unexpected auth result ignored"),
            ServerFrame::Event(event) => {
                if self.lobby.send(event).await.is_err() {
                    warn!("supervisor gone, lobby event dropped");
                }
            }
            ServerFrame::Game { game_id, event } => {
                self.router.route(game_id, event).await;
            }
            ServerFrame::Ack(ack) => {
                ActionClient::complete(&self.pending, ack).await;
            }
            ServerFrame::Ping { timestamp } => {
                let _ = self.frames.send(ClientFrame::Pong { timestamp }).await;
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> Result<(), ApiError> {
    let json = frame
        .to_json()
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))
}

async fn wait_for_auth(stream: &mut WsStream) -> Result<AuthResult, ApiError> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| ApiError::Transport(e.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };
        match ServerFrame::from_json(&text) {
            Ok(ServerFrame::AuthResult(result)) => return Ok(result),
            Ok(_) => warn!("frame before auth result ignored"),
            Err(err) => warn!(%err, "malformed frame during auth ignored"),
        }
    }
    Err(ApiError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{GameStateUpdate, GameStatus};

    fn state_event() -> GameEvent {
        GameEvent::State(GameStateUpdate {
            moves: "e2e4".to_string(),
            white_time: None,
            black_time: None,
            white_increment: None,
            black_increment: None,
            status: GameStatus::Started,
        })
    }

    #[tokio::test]
    async fn routed_events_reach_the_subscriber() {
        let router = GameRouter::default();
        let mut rx = router.subscribe("g1").await;
        router.route("g1".to_string(), state_event()).await;
        assert!(matches!(rx.recv().await, Some(GameEvent::State(_))));
    }

    #[tokio::test]
    async fn early_events_are_buffered_until_subscribe() {
        let router = GameRouter::default();
        router.route("g1".to_string(), state_event()).await;
        router.route("g1".to_string(), state_event()).await;

        let mut rx = router.subscribe("g1").await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn backlog_is_capped() {
        let router = GameRouter::default();
        for _ in 0..(BACKLOG_CAP + 5) {
            router.route("g1".to_string(), state_event()).await;
        }
        let mut rx = router.subscribe("g1").await;
        let mut flushed = 0;
        while rx.try_recv().is_ok() {
            flushed += 1;
        }
        assert_eq!(flushed, BACKLOG_CAP);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let router = GameRouter::default();
        let mut rx = router.subscribe("g1").await;
        router.unsubscribe("g1").await;
        assert!(rx.recv().await.is_none());

        // Later events for the finished game land in a fresh backlog, not
        // a dead channel.
        router.route("g1".to_string(), state_event()).await;
    }
}
