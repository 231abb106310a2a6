//! Network layer.
//!
//! Everything that touches the hosting service: the typed wire protocol,
//! the action handle with its error taxonomy, and the WebSocket transport
//! that routes inbound events to the sessions. All timing and game logic
//! live outside this layer.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ActionClient, ApiError};
pub use protocol::{
    ClientFrame, GameEvent, GameStateUpdate, GameStatus, LobbyEvent, ServerFrame,
};
pub use transport::{Connection, GameRouter};
