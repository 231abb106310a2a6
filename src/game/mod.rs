//! Per-game state and session lifecycle.
//!
//! Each live game is owned by exactly one session task. `state` carries the
//! slot and rebuilds the board from the authoritative move list, `session`
//! drives the state machine, `adjudication` watches the evaluation window
//! for resignations and draw offers, and `registry` is the shared admission
//! count read by the matchmaker.

pub mod adjudication;
pub mod registry;
pub mod session;
pub mod state;

pub use registry::GameRegistry;
pub use session::{GameSession, SessionContext};
pub use state::{GameId, GameSlot, SlotPhase};
