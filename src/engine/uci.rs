//! UCI engine child processes.
//!
//! One [`UciEngine`] wraps one spawned binary: handshake and options at
//! creation, then `position`/`go movetime` dialogues per move. A search is
//! bounded by its budget plus a grace window; past that the engine gets a
//! `stop`, and an engine that stays silent is declared unresponsive and the
//! unit is written off.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{EngineError, MoveSearch, SearchOutcome};

/// Extra time past the budget before intervening.
const GRACE: Duration = Duration::from_millis(400);
/// How long a stopped engine gets to emit its `bestmove`.
const STOP_GRACE: Duration = Duration::from_millis(500);
/// Deadline for the startup handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Centipawn stand-in for a reported mate score.
const MATE_CP: i32 = 10_000;

/// One external UCI engine process.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    alive: bool,
}

impl UciEngine {
    /// Spawn an engine binary, complete the UCI handshake, and apply the
    /// configured options.
    pub async fn spawn(
        binary: &Path,
        options: &BTreeMap<String, String>,
    ) -> Result<Self, EngineError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("child has no stdout".into()))?;

        let mut engine = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            alive: true,
        };
        timeout(HANDSHAKE_TIMEOUT, engine.handshake())
            .await
            .map_err(|_| EngineError::Unresponsive)??;
        engine.configure(options).await?;
        debug!(binary = %binary.display(), "engine unit ready");
        Ok(engine)
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        loop {
            if self.read_line().await?.trim() == "uciok" {
                return Ok(());
            }
        }
    }

    async fn wait_ready(&mut self) -> Result<(), EngineError> {
        self.send("isready").await?;
        loop {
            if self.read_line().await?.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), EngineError> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await? {
            Some(line) => Ok(line),
            None => {
                self.alive = false;
                Err(EngineError::ProcessExited)
            }
        }
    }

    /// Drain output until `bestmove`, keeping the last reported score.
    async fn read_bestmove(&mut self) -> Result<SearchOutcome, EngineError> {
        let mut evaluation = None;
        loop {
            let line = self.read_line().await?;
            if let Some(score) = parse_info_score(&line) {
                evaluation = Some(score);
            }
            if let Some(best_move) = parse_bestmove(&line) {
                if best_move == "(none)" || best_move == "0000" {
                    return Err(EngineError::NoMove);
                }
                return Ok(SearchOutcome {
                    best_move,
                    evaluation,
                });
            }
        }
    }
}

impl MoveSearch for UciEngine {
    async fn configure(&mut self, options: &BTreeMap<String, String>) -> Result<(), EngineError> {
        for (name, value) in options {
            self.send(&format!("setoption name {name} value {value}")).await?;
        }
        timeout(HANDSHAKE_TIMEOUT, self.wait_ready())
            .await
            .map_err(|_| EngineError::Unresponsive)?
    }

    async fn search(
        &mut self,
        moves: &str,
        budget: Duration,
    ) -> Result<SearchOutcome, EngineError> {
        if !self.alive {
            return Err(EngineError::ProcessExited);
        }

        if moves.is_empty() {
            self.send("position startpos").await?;
        } else {
            self.send(&format!("position startpos moves {moves}")).await?;
        }
        let movetime = budget.as_millis().max(1);
        self.send(&format!("go movetime {movetime}")).await?;

        match timeout(budget + GRACE, self.read_bestmove()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(budget_ms = movetime as u64, "engine over budget, sending stop");
                self.send("stop").await?;
                match timeout(STOP_GRACE, self.read_bestmove()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.alive = false;
                        Err(EngineError::Unresponsive)
                    }
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn shutdown(&mut self) {
        if self.alive {
            let _ = self.send("quit").await;
        }
        // kill_on_drop covers a process that ignores `quit`.
        let _ = timeout(Duration::from_secs(2), self.child.wait()).await;
        self.alive = false;
    }
}

fn parse_bestmove(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    tokens.next().map(str::to_owned)
}

/// Extract `score cp N` or `score mate N` from an info line, normalized to
/// centipawns.
fn parse_info_score(line: &str) -> Option<i32> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    while let Some(token) = tokens.next() {
        if token != "score" {
            continue;
        }
        return match tokens.next()? {
            "cp" => tokens.next()?.parse().ok(),
            "mate" => {
                let plies: i32 = tokens.next()?.parse().ok()?;
                Some(if plies >= 0 { MATE_CP } else { -MATE_CP })
            }
            _ => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bestmove_lines() {
        assert_eq!(parse_bestmove("bestmove e2e4"), Some("e2e4".to_string()));
        assert_eq!(
            parse_bestmove("bestmove g1f3 ponder d7d5"),
            Some("g1f3".to_string())
        );
        assert_eq!(parse_bestmove("info depth 10"), None);
        assert_eq!(parse_bestmove(""), None);
    }

    #[test]
    fn parses_centipawn_scores() {
        let line = "info depth 12 seldepth 18 score cp 35 nodes 90313 pv e2e4";
        assert_eq!(parse_info_score(line), Some(35));
        assert_eq!(parse_info_score("info score cp -230"), Some(-230));
    }

    #[test]
    fn parses_mate_scores() {
        assert_eq!(parse_info_score("info depth 20 score mate 3"), Some(MATE_CP));
        assert_eq!(parse_info_score("info score mate -2 pv ..."), Some(-MATE_CP));
    }

    #[test]
    fn ignores_unscored_lines() {
        assert_eq!(parse_info_score("info depth 5 nodes 1200"), None);
        assert_eq!(parse_info_score("bestmove e2e4"), None);
        assert_eq!(parse_info_score("info score lowerbound"), None);
    }
}
