//! Protocol messages.
//!
//! Wire format for the hosting-service connection: line-delimited JSON over
//! a single WebSocket. The service's payloads are loosely typed at the
//! source; required fields are validated here, at the boundary, and
//! converted once into the typed model. Frames that fail to parse are
//! logged and dropped by the transport, never propagated inward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::clock::RawClock;

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// Frames pushed by the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication result; first frame after connect.
    AuthResult(AuthResult),

    /// Lobby-level event.
    Event(LobbyEvent),

    /// Per-game state event.
    Game {
        /// Which game the event belongs to.
        game_id: String,
        /// The event payload.
        event: GameEvent,
    },

    /// Acknowledgement of a client action.
    Ack(ActionAck),

    /// Keepalive; answered with a pong.
    Ping {
        /// Opaque echo value.
        timestamp: u64,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Our account id when successful.
    pub account_id: Option<String>,
    /// Error message when not.
    pub error: Option<String>,
}

/// Lobby events: game lifecycle and challenge traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LobbyEvent {
    /// A game began; a session must be spawned.
    GameStart {
        /// The game that started.
        game: GameSummary,
    },

    /// A game ended (also reported on the game stream itself).
    GameFinish {
        /// The game that finished.
        game: GameSummary,
    },

    /// Someone challenged us.
    Challenge {
        /// The incoming challenge.
        challenge: ChallengeInfo,
    },

    /// An incoming challenge was withdrawn.
    ChallengeCanceled {
        /// Challenge identifier.
        id: String,
    },

    /// One of our outbound challenges was declined.
    ChallengeDeclined {
        /// Challenge identifier.
        id: String,
    },
}

/// Minimal game identification carried by lobby events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    /// Game identifier.
    pub id: String,
    /// Opponent account id, when the service includes it.
    #[serde(default)]
    pub opponent: Option<String>,
}

/// An incoming challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeInfo {
    /// Challenge identifier.
    pub id: String,
    /// Challenger account id.
    pub challenger: String,
    /// Whether the game would be rated.
    pub rated: bool,
    /// Initial clock in seconds.
    pub clock_limit_secs: u64,
    /// Increment in seconds.
    pub clock_increment_secs: u64,
    /// Variant name; absent means standard.
    #[serde(default)]
    pub variant: Option<String>,
    /// When the challenge was created.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-game events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    /// Colors and initial state; first event on a game stream.
    Full(GameFull),
    /// Incremental update carrying the full move list to date.
    State(GameStateUpdate),
}

/// The opening event of a game stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameFull {
    /// Game identifier.
    pub id: String,
    /// The white player.
    pub white: PlayerInfo,
    /// The black player.
    pub black: PlayerInfo,
    /// Initial state, identical in shape to later updates.
    pub state: GameStateUpdate,
}

/// One side of a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Account id.
    pub id: String,
    /// Rating at game start.
    #[serde(default)]
    pub rating: Option<u32>,
}

/// A game state update. The move list is authoritative: consumers rebuild
/// the position from it rather than trusting any incremental diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateUpdate {
    /// Space-separated UCI move list from the starting position.
    #[serde(default)]
    pub moves: String,
    /// White's remaining time.
    #[serde(default)]
    pub white_time: Option<RawClock>,
    /// Black's remaining time.
    #[serde(default)]
    pub black_time: Option<RawClock>,
    /// White's increment.
    #[serde(default)]
    pub white_increment: Option<RawClock>,
    /// Black's increment.
    #[serde(default)]
    pub black_increment: Option<RawClock>,
    /// Game status.
    pub status: GameStatus,
}

/// Game status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Game created, not yet started.
    Created,
    /// Game in progress.
    Started,
    /// Aborted before completion.
    Aborted,
    /// Checkmate.
    Mate,
    /// A player resigned.
    Resign,
    /// Stalemate.
    Stalemate,
    /// Draw by agreement or rule.
    Draw,
    /// Flag fell.
    OutOfTime,
    /// A player abandoned the game.
    Timeout,
    /// Neither player moved.
    NoStart,
    /// A status this client does not know. Treated as still running; the
    /// service will follow up with a recognized terminal status.
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// Whether the status ends the game and retires the slot.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::Created | GameStatus::Started | GameStatus::Unknown)
    }
}

/// Acknowledgement of one client action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAck {
    /// Id of the acknowledged action.
    pub id: u64,
    /// Whether the action was applied.
    pub ok: bool,
    /// Failure details when not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
    /// Directory payload for [`Action::ListBots`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bots: Option<Vec<BotProfile>>,
}

/// Failure details on an ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Server-suggested wait on rate limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Error codes attached to failed acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Too many requests; back off.
    RateLimited,
    /// Authentication failed or expired.
    AuthFailed,
    /// The referenced game or challenge does not exist.
    NotFound,
    /// The action is not valid right now.
    InvalidAction,
    /// The targeted opponent is gone or unavailable.
    OpponentUnavailable,
    /// Internal service error.
    InternalError,
}

/// One entry of the online-bot directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotProfile {
    /// Account id.
    pub id: String,
    /// Current rating, if established.
    #[serde(default)]
    pub rating: Option<u32>,
    /// Rated games behind the rating.
    #[serde(default)]
    pub rated_games: u32,
    /// Rating still provisional.
    #[serde(default)]
    pub provisional: bool,
    /// Account disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Account flagged for fair-play violations.
    #[serde(default)]
    pub flagged: bool,
}

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// Frames sent to the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Token authentication; must be the first frame.
    Auth {
        /// Bearer token.
        token: String,
        /// Client version for compatibility reporting.
        client_version: String,
    },

    /// An action expecting an ack with the same id.
    Action {
        /// Correlation id, unique per connection.
        id: u64,
        /// The action payload.
        action: Action,
    },

    /// Answer to a server ping.
    Pong {
        /// Echoed value.
        timestamp: u64,
    },
}

/// Actions against the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    /// Play a move in a game.
    SubmitMove {
        /// Game identifier.
        game_id: String,
        /// Move in UCI notation.
        #[serde(rename = "move")]
        uci: String,
    },

    /// Resign a game.
    Resign {
        /// Game identifier.
        game_id: String,
    },

    /// Offer a draw in a game.
    OfferDraw {
        /// Game identifier.
        game_id: String,
    },

    /// Accept an incoming challenge.
    AcceptChallenge {
        /// Challenge identifier.
        challenge_id: String,
    },

    /// Decline an incoming challenge.
    DeclineChallenge {
        /// Challenge identifier.
        challenge_id: String,
    },

    /// Challenge another bot.
    CreateChallenge(ChallengeRequest),

    /// Fetch a bounded page of the online-bot directory.
    ListBots {
        /// Maximum entries to return.
        max: u32,
    },
}

/// Outbound challenge parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    /// Opponent account id.
    pub opponent: String,
    /// Rated game.
    pub rated: bool,
    /// Initial clock in seconds.
    pub clock_limit_secs: u64,
    /// Increment in seconds.
    pub clock_increment_secs: u64,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ServerFrame {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ClientFrame {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
