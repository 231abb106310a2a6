//! Pre-search position probes.
//!
//! A probe is consulted before the engine: opening books and endgame
//! tablebases answer instantly and without burning a pool unit. A miss or a
//! probe error always falls through to the search, never aborts the turn.

use std::path::Path;

use shakmaty::{CastlingMode, Chess, Position};
use shakmaty_syzygy::Tablebase;
use tracing::{debug, warn};

/// A lookup consulted before move search.
pub trait PositionProbe: Send + Sync {
    /// Best known move for the position, in UCI notation.
    fn lookup(&self, position: &Chess) -> Option<String>;
}

/// Probe that never hits; used when nothing is configured.
pub struct NoProbe;

impl PositionProbe for NoProbe {
    fn lookup(&self, _position: &Chess) -> Option<String> {
        None
    }
}

/// Syzygy endgame tablebase probe.
pub struct EndgameProbe {
    tablebase: Tablebase<Chess>,
    max_pieces: usize,
}

impl EndgameProbe {
    /// Load tables from a directory. Returns `None` when the directory is
    /// missing or holds no usable tables.
    pub fn new(path: &Path, max_pieces: usize) -> Option<Self> {
        if !path.is_dir() {
            return None;
        }
        let mut tablebase = Tablebase::new();
        match tablebase.add_directory(path) {
            Ok(0) | Err(_) => None,
            Ok(tables) => {
                debug!(tables, path = %path.display(), "endgame tablebase loaded");
                Some(Self { tablebase, max_pieces })
            }
        }
    }
}

impl PositionProbe for EndgameProbe {
    fn lookup(&self, position: &Chess) -> Option<String> {
        if position.board().occupied().count() > self.max_pieces {
            return None;
        }
        match self.tablebase.best_move(position) {
            Ok(Some((best, _dtz))) => Some(best.to_uci(CastlingMode::Standard).to_string()),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "tablebase probe failed, falling through to search");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_no_probe() {
        assert!(EndgameProbe::new(Path::new("/nonexistent/tables"), 6).is_none());
    }

    #[test]
    fn no_probe_never_hits() {
        assert_eq!(NoProbe.lookup(&Chess::default()), None);
    }
}
