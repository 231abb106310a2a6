//! External move-search processes.
//!
//! Sessions and the pool depend only on the [`MoveSearch`] interface; the
//! concrete implementation in [`uci`] spawns engine binaries and speaks the
//! UCI line protocol with them. [`pool`] serializes sessions onto a fixed
//! set of units, [`probe`] covers pre-search lookups.

pub mod pool;
pub mod probe;
pub mod uci;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Result of one bounded search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Best move in UCI notation.
    pub best_move: String,
    /// Engine evaluation in centipawns from our point of view, if reported.
    pub evaluation: Option<i32>,
}

/// Failures of a move-search unit.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be started.
    #[error("failed to spawn engine process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading from or writing to the process failed.
    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The process is gone. The unit is lost; it is never recreated.
    #[error("engine process exited")]
    ProcessExited,

    /// No answer within the budget plus grace.
    #[error("engine did not answer within the budget")]
    Unresponsive,

    /// The process broke the line protocol.
    #[error("engine protocol violation: {0}")]
    Protocol(String),

    /// The engine reported that it has no move.
    #[error("engine returned no move")]
    NoMove,
}

/// A black-box move-search unit.
///
/// Units are configured once at creation and exclusively owned by at most
/// one in-flight computation at a time; the pool enforces the ownership.
pub trait MoveSearch: Send + 'static {
    /// Apply named options. Called once, right after creation.
    fn configure(
        &mut self,
        options: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Search the position reached by `moves` (UCI tokens from the starting
    /// position) under `budget`. Implementations must give up shortly after
    /// the budget plus a small grace window.
    fn search(
        &mut self,
        moves: &str,
        budget: Duration,
    ) -> impl Future<Output = Result<SearchOutcome, EngineError>> + Send;

    /// Whether the underlying process is still believed to be alive.
    fn is_alive(&self) -> bool;

    /// Terminate the unit.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic in-process stand-in for an engine unit.
    pub(crate) struct ScriptedEngine {
        pub best: String,
        pub evaluation: Option<i32>,
        pub delay: Duration,
        pub fail: bool,
        pub alive: bool,
    }

    impl ScriptedEngine {
        pub fn returning(best: &str) -> Self {
            Self {
                best: best.to_string(),
                evaluation: Some(25),
                delay: Duration::ZERO,
                fail: false,
                alive: true,
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::returning("0000")
            }
        }
    }

    impl MoveSearch for ScriptedEngine {
        async fn configure(&mut self, _options: &BTreeMap<String, String>) -> Result<(), EngineError> {
            Ok(())
        }

        async fn search(
            &mut self,
            _moves: &str,
            _budget: Duration,
        ) -> Result<SearchOutcome, EngineError> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                self.alive = false;
                return Err(EngineError::Unresponsive);
            }
            Ok(SearchOutcome {
                best_move: self.best.clone(),
                evaluation: self.evaluation,
            })
        }

        fn is_alive(&self) -> bool {
            self.alive
        }

        async fn shutdown(&mut self) {
            self.alive = false;
        }
    }
}
