//! Action handle and error taxonomy.
//!
//! [`ActionClient`] is the cheaply clonable handle sessions and the
//! matchmaker use to act against the hosting service. Each action gets a
//! correlation id; the transport's reader resolves the matching ack through
//! a oneshot channel. The error taxonomy separates rate limits (never
//! retried immediately) from transient failures (bounded retry) and
//! rejections (give up).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use super::protocol::{Action, ActionAck, BotProfile, ChallengeRequest, ClientFrame, ErrorCode};

/// How long to wait for an ack before treating the action as failed.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by remote actions.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The service asked us to slow down.
    #[error("rate limited by the hosting service")]
    RateLimited {
        /// Server-suggested wait, when provided.
        retry_after: Option<Duration>,
    },

    /// Network-ish failure; a candidate for bounded retry.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service rejected the action.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Authentication failed or expired. Fatal.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No acknowledgement within the deadline.
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// The connection is gone.
    #[error("connection closed")]
    Closed,
}

impl ApiError {
    /// Errors worth a bounded immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::AckTimeout(_))
    }
}

/// Pending acks keyed by action id. Shared with the transport reader.
pub type PendingAcks = Mutex<BTreeMap<u64, oneshot::Sender<ActionAck>>>;

/// Clonable handle for issuing actions.
#[derive(Clone)]
pub struct ActionClient {
    frames: mpsc::Sender<ClientFrame>,
    pending: Arc<PendingAcks>,
    next_id: Arc<AtomicU64>,
}

impl ActionClient {
    /// Create a handle plus the outbound frame stream its actions are
    /// written to — consumed by the transport writer, or by a scripted
    /// responder in tests.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientFrame>) {
        let (frames, rx) = mpsc::channel(capacity);
        let client = Self {
            frames,
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (client, rx)
    }

    /// The pending-ack table, for the transport reader.
    pub fn pending_acks(&self) -> Arc<PendingAcks> {
        Arc::clone(&self.pending)
    }

    /// A raw frame sender, for transport-internal traffic (pongs).
    pub fn frame_sender(&self) -> mpsc::Sender<ClientFrame> {
        self.frames.clone()
    }

    /// Resolve a pending action with its ack. Called by the transport
    /// reader for every ack frame.
    pub async fn complete(pending: &PendingAcks, ack: ActionAck) {
        match pending.lock().await.remove(&ack.id) {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => warn!(id = ack.id, "ack for unknown or expired action"),
        }
    }

    async fn request(&self, action: Action) -> Result<ActionAck, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.frames.send(ClientFrame::Action { id, action }).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ApiError::Closed);
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            // The transport dropped our sender: connection torn down.
            Ok(Err(_)) => Err(ApiError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ApiError::AckTimeout(ACK_TIMEOUT))
            }
        }
    }

    async fn expect_ok(&self, action: Action) -> Result<ActionAck, ApiError> {
        let ack = self.request(action).await?;
        if ack.ok {
            return Ok(ack);
        }
        Err(match ack.error {
            Some(error) => match error.code {
                ErrorCode::RateLimited => ApiError::RateLimited {
                    retry_after: error.retry_after_secs.map(Duration::from_secs),
                },
                ErrorCode::AuthFailed => ApiError::Auth(error.message),
                _ => ApiError::Rejected(error.message),
            },
            None => ApiError::Rejected("unspecified failure".to_string()),
        })
    }

    /// Play a move.
    pub async fn submit_move(&self, game_id: &str, uci: &str) -> Result<(), ApiError> {
        self.expect_ok(Action::SubmitMove {
            game_id: game_id.to_string(),
            uci: uci.to_string(),
        })
        .await
        .map(drop)
    }

    /// Resign a game.
    pub async fn resign(&self, game_id: &str) -> Result<(), ApiError> {
        self.expect_ok(Action::Resign { game_id: game_id.to_string() })
            .await
            .map(drop)
    }

    /// Offer a draw.
    pub async fn offer_draw(&self, game_id: &str) -> Result<(), ApiError> {
        self.expect_ok(Action::OfferDraw { game_id: game_id.to_string() })
            .await
            .map(drop)
    }

    /// Accept an incoming challenge.
    pub async fn accept_challenge(&self, challenge_id: &str) -> Result<(), ApiError> {
        self.expect_ok(Action::AcceptChallenge { challenge_id: challenge_id.to_string() })
            .await
            .map(drop)
    }

    /// Decline an incoming challenge.
    pub async fn decline_challenge(&self, challenge_id: &str) -> Result<(), ApiError> {
        self.expect_ok(Action::DeclineChallenge { challenge_id: challenge_id.to_string() })
            .await
            .map(drop)
    }

    /// Challenge another bot.
    pub async fn create_challenge(&self, request: ChallengeRequest) -> Result<(), ApiError> {
        self.expect_ok(Action::CreateChallenge(request)).await.map(drop)
    }

    /// Fetch a bounded page of the online-bot directory.
    pub async fn online_bots(&self, max: u32) -> Result<Vec<BotProfile>, ApiError> {
        let ack = self.expect_ok(Action::ListBots { max }).await?;
        Ok(ack.bots.unwrap_or_default())
    }
}

/// Retry transient failures a bounded number of times with a short delay.
///
/// Rate-limit errors are returned to the caller immediately — backing off is
/// the caller's decision, at the caller's granularity.
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(attempt, %err, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
