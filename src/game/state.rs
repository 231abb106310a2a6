//! Game slots and board reconstruction.

use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, Position};

use crate::time::allocator::PositionPhase;
use crate::time::clock::ClockReading;

/// Game identifier assigned by the hosting service.
pub type GameId = String;

/// Lifecycle of one game slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Waiting for the opponent (or for the first event).
    WaitingOpponent,
    /// Our move; a decision is due.
    MyTurn,
    /// A search is in flight.
    Computing,
    /// The chosen move is being submitted.
    Submitting,
    /// The game ended; the slot is retired.
    Terminal,
}

/// Board-rebuild failures. Events carrying these are ignored.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// A token in the move list is not UCI notation.
    #[error("unparsable move token {0:?}")]
    BadToken(String),
    /// A syntactically valid move is illegal in its position.
    #[error("illegal move {0:?} in move list")]
    IllegalMove(String),
}

/// One active game, owned exclusively by its session task.
#[derive(Debug)]
pub struct GameSlot {
    /// Identifier assigned by the hosting service.
    pub game_id: GameId,
    /// Our color. Known once the full game event arrives.
    pub color: Color,
    /// Current position, rebuilt from the move list on every update.
    pub position: Chess,
    /// Authoritative UCI move list as last received.
    pub moves: String,
    /// Our clock as of the last update.
    pub last_clock: ClockReading,
    /// Where the slot is in its lifecycle.
    pub phase: SlotPhase,
}

impl GameSlot {
    /// Fresh slot at the starting position.
    pub fn new(game_id: GameId, color: Color) -> Self {
        Self {
            game_id,
            color,
            position: Chess::default(),
            moves: String::new(),
            last_clock: ClockReading::default(),
            phase: SlotPhase::WaitingOpponent,
        }
    }

    /// Apply an authoritative move list, rebuilding the board from scratch.
    ///
    /// Rebuilding rather than diffing means duplicated or out-of-order
    /// updates cannot corrupt the position.
    pub fn apply_moves(&mut self, moves: &str) -> Result<(), BoardError> {
        self.position = rebuild_position(moves)?;
        self.moves = moves.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(())
    }

    /// Half-moves played so far.
    pub fn ply(&self) -> usize {
        if self.moves.is_empty() {
            0
        } else {
            self.moves.split(' ').count()
        }
    }

    /// Whether the position is ours to move and the game is still running.
    pub fn is_my_turn(&self) -> bool {
        self.position.turn() == self.color && !self.position.is_game_over()
    }

    /// Coarse descriptors for the time allocator.
    pub fn position_phase(&self) -> PositionPhase {
        PositionPhase {
            legal_moves: self.position.legal_moves().len(),
            piece_count: self.position.board().occupied().count() as u32,
            move_number: self.position.fullmoves().get(),
        }
    }

    /// Deterministic fallback when search fails: the first legal move in
    /// UCI order. `None` only when the game is over.
    pub fn fallback_move(&self) -> Option<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .min()
    }
}

/// Replay a UCI move list from the starting position.
pub fn rebuild_position(moves: &str) -> Result<Chess, BoardError> {
    let mut position = Chess::default();
    for token in moves.split_whitespace() {
        let uci = UciMove::from_ascii(token.as_bytes())
            .map_err(|_| BoardError::BadToken(token.to_string()))?;
        let mv = uci
            .to_move(&position)
            .map_err(|_| BoardError::IllegalMove(token.to_string()))?;
        position = position
            .play(&mv)
            .map_err(|_| BoardError::IllegalMove(token.to_string()))?;
    }
    Ok(position)
}
