//! # Tempo Bot
//!
//! Automated chess player for real-time arena servers: it keeps several
//! games running at once, budgets think time from the ticking clocks,
//! multiplexes a fixed pool of external engine processes across the games,
//! and feeds its slots through an outbound matchmaking loop that respects
//! the service's rate limits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TEMPO BOT                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  time/           - Clock math (pure)                         │
//! │  ├── clock.rs    - Wire values to canonical seconds          │
//! │  └── allocator.rs- Per-move think-time budgets               │
//! │                                                              │
//! │  engine/         - External move search                      │
//! │  ├── uci.rs      - UCI child-process adapter                 │
//! │  ├── pool.rs     - Fixed unit pool, scoped checkout          │
//! │  └── probe.rs    - Book/tablebase lookups before search      │
//! │                                                              │
//! │  game/           - One session task per live game            │
//! │  ├── state.rs    - Slot, board rebuild, position phase       │
//! │  ├── session.rs  - Turn loop, submission retry               │
//! │  ├── adjudication.rs - Resign/draw from the eval window      │
//! │  └── registry.rs - Shared admission count                    │
//! │                                                              │
//! │  network/        - Hosting-service boundary                  │
//! │  ├── protocol.rs - Tagged wire events, validated here        │
//! │  ├── client.rs   - Action handle, error taxonomy             │
//! │  └── transport.rs- WebSocket read/write/route tasks          │
//! │                                                              │
//! │  matchmaking.rs  - Challenge loop, exclusions, backoff       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Isolation guarantees
//!
//! Shared state is limited to three injected objects: the engine pool, the
//! game registry, and the exclusion table. Game sessions never touch each
//! other; one game's failure is confined to its own task. The service
//! pushes state — nothing in here polls for its own turn.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod game;
pub mod matchmaking;
pub mod network;
pub mod time;

// Re-export commonly used types
pub use engine::pool::EnginePool;
pub use game::registry::GameRegistry;
pub use game::state::{GameSlot, SlotPhase};
pub use time::allocator::{PositionPhase, TimeAllocator};
pub use time::clock::{ClockReading, RawClock};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
