//! Per-game session tasks.
//!
//! One task per live game, spawned on the game-start notification and
//! retired on terminal status. The session consumes its event stream,
//! rebuilds the board from every update, and on its turn runs the decision
//! path: adjudication, probe, budget, pool checkout, search, submission
//! with bounded retry. A failure anywhere is confined to this game.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use shakmaty::Color;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::engine::pool::{EnginePool, PoolError};
use crate::engine::probe::PositionProbe;
use crate::engine::{EngineError, MoveSearch, SearchOutcome};
use crate::game::adjudication::{AdjudicationConfig, EvalHistory};
use crate::game::registry::GameRegistry;
use crate::game::state::{GameSlot, SlotPhase};
use crate::network::client::{ActionClient, ApiError};
use crate::network::protocol::{GameEvent, GameStateUpdate};
use crate::time::allocator::{PositionPhase, TimeAllocator};
use crate::time::clock::ClockReading;

/// Submission retry policy.
const SUBMIT_ATTEMPTS: u32 = 3;
/// Delay between retries after a transient failure.
const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Per-attempt backoff base after a rate-limit signal. Session-local: only
/// this game's submission slows down.
const SUBMIT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(2);

/// Shared handles a session needs, cloned per game.
pub struct SessionContext<E: MoveSearch> {
    /// Action handle.
    pub client: ActionClient,
    /// Engine pool.
    pub pool: Arc<EnginePool<E>>,
    /// Admission registry.
    pub registry: Arc<GameRegistry>,
    /// Pre-search probe.
    pub probe: Arc<dyn PositionProbe>,
    /// Think-time allocator.
    pub allocator: TimeAllocator,
    /// Adjudication tunables.
    pub adjudication: AdjudicationConfig,
    /// Our account id, for color detection.
    pub my_id: String,
}

impl<E: MoveSearch> Clone for SessionContext<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            pool: Arc::clone(&self.pool),
            registry: Arc::clone(&self.registry),
            probe: Arc::clone(&self.probe),
            allocator: self.allocator.clone(),
            adjudication: self.adjudication.clone(),
            my_id: self.my_id.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SearchFailure {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The state machine for one game.
pub struct GameSession<E: MoveSearch> {
    slot: GameSlot,
    events: mpsc::Receiver<GameEvent>,
    context: SessionContext<E>,
    history: EvalHistory,
    shutdown: broadcast::Receiver<()>,
    /// Ply of the last successfully submitted decision; duplicated updates
    /// for an already-answered position are skipped.
    answered_ply: Option<usize>,
    resignation_requested: bool,
}

impl<E: MoveSearch> GameSession<E> {
    /// Build a session for a freshly started game. The color is corrected
    /// once the full game event arrives.
    pub fn new(
        game_id: String,
        events: mpsc::Receiver<GameEvent>,
        context: SessionContext<E>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let history = EvalHistory::new(context.adjudication.clone());
        Self {
            slot: GameSlot::new(game_id, Color::White),
            events,
            context,
            history,
            shutdown,
            answered_ply: None,
            resignation_requested: false,
        }
    }

    /// Drive the session until the game ends, the stream closes, or
    /// shutdown is requested. An in-flight move attempt always completes
    /// before shutdown is honored.
    pub async fn run(mut self) {
        info!(game_id = %self.slot.game_id, "session started");
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!(game_id = %self.slot.game_id, "event stream closed");
                        break;
                    }
                },
                _ = self.shutdown.recv() => {
                    info!(game_id = %self.slot.game_id, "session stopping on shutdown");
                    break;
                }
            }
        }
        self.retire();
    }

    /// Release the slot. The registry decrement is exactly-once no matter
    /// how the session ends.
    fn retire(&mut self) {
        self.slot.phase = SlotPhase::Terminal;
        if self.context.registry.retire(&self.slot.game_id) {
            info!(
                game_id = %self.slot.game_id,
                active = self.context.registry.active_games(),
                "slot retired"
            );
        }
    }

    async fn handle_event(&mut self, event: GameEvent) -> ControlFlow<()> {
        match event {
            GameEvent::Full(full) => {
                self.slot.color = if full.white.id == self.context.my_id {
                    Color::White
                } else {
                    Color::Black
                };
                let opponent = match self.slot.color {
                    Color::White => &full.black.id,
                    Color::Black => &full.white.id,
                };
                info!(
                    game_id = %self.slot.game_id,
                    color = ?self.slot.color,
                    opponent = %opponent,
                    "game initialized"
                );
                self.handle_state(full.state).await
            }
            GameEvent::State(state) => self.handle_state(state).await,
        }
    }

    async fn handle_state(&mut self, state: GameStateUpdate) -> ControlFlow<()> {
        if let Err(err) = self.slot.apply_moves(&state.moves) {
            warn!(game_id = %self.slot.game_id, %err, "ignoring malformed state update");
            return ControlFlow::Continue(());
        }
        self.slot.last_clock = self.my_clock(&state);

        if state.status.is_terminal() {
            info!(game_id = %self.slot.game_id, status = ?state.status, "game over");
            return ControlFlow::Break(());
        }

        if self.slot.is_my_turn() && self.answered_ply != Some(self.slot.ply()) {
            self.slot.phase = SlotPhase::MyTurn;
            self.take_turn().await;
        } else {
            self.slot.phase = SlotPhase::WaitingOpponent;
        }
        ControlFlow::Continue(())
    }

    fn my_clock(&self, state: &GameStateUpdate) -> ClockReading {
        match self.slot.color {
            Color::White => ClockReading::from_raw(state.white_time, state.white_increment),
            Color::Black => ClockReading::from_raw(state.black_time, state.black_increment),
        }
    }

    async fn take_turn(&mut self) {
        let phase = self.slot.position_phase();

        if self.history.should_resign() {
            if !self.resignation_requested {
                self.resignation_requested = true;
                info!(game_id = %self.slot.game_id, "sustained lost evaluation, resigning");
                if let Err(err) = self.context.client.resign(&self.slot.game_id).await {
                    warn!(game_id = %self.slot.game_id, %err, "resignation not delivered");
                }
            }
            return;
        }

        if self.history.should_offer_draw(phase.piece_count) {
            debug!(game_id = %self.slot.game_id, "drawish window, offering draw");
            if let Err(err) = self.context.client.offer_draw(&self.slot.game_id).await {
                debug!(game_id = %self.slot.game_id, %err, "draw offer not delivered");
            }
            // The offer is a side channel; the move still gets played.
        }

        let decided_ply = self.slot.ply();
        let Some(uci) = self.choose_move(&phase).await else {
            // Only possible with no legal moves; the service adjudicates.
            warn!(game_id = %self.slot.game_id, "no move available");
            return;
        };
        if self.submit(&uci).await {
            self.answered_ply = Some(decided_ply);
        }
    }

    async fn choose_move(&mut self, phase: &PositionPhase) -> Option<String> {
        if let Some(found) = self.context.probe.lookup(&self.slot.position) {
            debug!(game_id = %self.slot.game_id, uci = %found, "probe hit");
            return Some(found);
        }

        self.slot.phase = SlotPhase::Computing;
        let budget =
            self.context
                .allocator
                .allocate(&self.slot.last_clock, phase, self.history.outlook());
        debug!(
            game_id = %self.slot.game_id,
            budget_ms = budget.as_millis() as u64,
            remaining_ms = self.slot.last_clock.remaining.as_millis() as u64,
            legal_moves = phase.legal_moves,
            "think budget"
        );

        match self.search(budget).await {
            Ok(outcome) => {
                if let Some(cp) = outcome.evaluation {
                    self.history.push(cp);
                }
                Some(outcome.best_move)
            }
            Err(err) => {
                // Submitting anything legal beats losing on time.
                error!(
                    game_id = %self.slot.game_id,
                    %err,
                    "search failed, falling back to first legal move"
                );
                self.slot.fallback_move()
            }
        }
    }

    async fn search(&mut self, budget: Duration) -> Result<SearchOutcome, SearchFailure> {
        let mut unit = self.context.pool.acquire().await?;
        let outcome = unit.search(&self.slot.moves, budget).await?;
        Ok(outcome)
    }

    /// Submit with bounded retry. Returns true once the service accepted
    /// the move; exhausted retries are a hard failure for this move only.
    async fn submit(&mut self, uci: &str) -> bool {
        self.slot.phase = SlotPhase::Submitting;
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.context.client.submit_move(&self.slot.game_id, uci).await {
                Ok(()) => {
                    info!(game_id = %self.slot.game_id, uci = %uci, "move submitted");
                    self.slot.phase = SlotPhase::WaitingOpponent;
                    return true;
                }
                Err(ApiError::RateLimited { retry_after }) if attempt < SUBMIT_ATTEMPTS => {
                    let wait = retry_after.unwrap_or(SUBMIT_RATE_LIMIT_DELAY * attempt);
                    warn!(
                        game_id = %self.slot.game_id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "submission rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) if err.is_transient() && attempt < SUBMIT_ATTEMPTS => {
                    warn!(
                        game_id = %self.slot.game_id,
                        attempt,
                        %err,
                        "submission failed, retrying"
                    );
                    tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
                }
                Err(err) => {
                    error!(
                        game_id = %self.slot.game_id,
                        uci = %uci,
                        %err,
                        "move not submitted; the service arbitrates from here"
                    );
                    self.slot.phase = SlotPhase::WaitingOpponent;
                    return false;
                }
            }
        }
        false
    }
}
