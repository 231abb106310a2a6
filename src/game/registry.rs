//! Shared admission state.
//!
//! One registry per process, injected as an `Arc` into sessions and the
//! matchmaker — never reached through a global. Sessions register on game
//! start and retire exactly once on terminal status; the matchmaker reads
//! the load for admission control and records challenges that are in flight
//! but have not produced a game yet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::state::GameId;

/// Live games plus pending outbound challenges.
#[derive(Debug, Default)]
pub struct GameRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: BTreeSet<GameId>,
    /// Challenge key (opponent id) to expiry. Entries decay: a challenge
    /// that never becomes a game stops counting after its ttl.
    pending: BTreeMap<String, Instant>,
}

impl GameRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live game. Returns false if it was already registered.
    pub fn register(&self, game_id: &str) -> bool {
        self.lock().active.insert(game_id.to_string())
    }

    /// Retire a game. Returns false when it was never registered or was
    /// already retired, which keeps the decrement exactly-once for callers.
    pub fn retire(&self, game_id: &str) -> bool {
        self.lock().active.remove(game_id)
    }

    /// Record an issued challenge that has not started a game yet.
    pub fn note_challenge(&self, key: &str, ttl: Duration) {
        self.lock()
            .pending
            .insert(key.to_string(), Instant::now() + ttl);
    }

    /// Remove a pending entry once its challenge resolves.
    pub fn settle_challenge(&self, key: &str) -> bool {
        self.lock().pending.remove(key).is_some()
    }

    /// Live games plus unexpired pending challenges. Expired entries are
    /// pruned as a side effect.
    pub fn load(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.pending.retain(|_, expiry| *expiry > now);
        inner.active.len() + inner.pending.len()
    }

    /// Live games only.
    pub fn active_games(&self) -> usize {
        self.lock().active.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_retire_are_exactly_once() {
        let registry = GameRegistry::new();
        assert!(registry.register("g1"));
        assert!(!registry.register("g1"));
        assert_eq!(registry.active_games(), 1);

        assert!(registry.retire("g1"));
        assert!(!registry.retire("g1"));
        assert_eq!(registry.active_games(), 0);
    }

    #[test]
    fn load_counts_games_and_pending_challenges() {
        let registry = GameRegistry::new();
        registry.register("g1");
        registry.note_challenge("opponent", Duration::from_secs(60));
        assert_eq!(registry.load(), 2);

        registry.settle_challenge("opponent");
        assert_eq!(registry.load(), 1);
    }

    #[test]
    fn pending_challenges_decay() {
        let registry = GameRegistry::new();
        registry.note_challenge("opponent", Duration::from_millis(5));
        assert_eq!(registry.load(), 1);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(registry.load(), 0);
    }

    #[test]
    fn renoting_a_challenge_keeps_one_entry() {
        let registry = GameRegistry::new();
        registry.note_challenge("opponent", Duration::from_secs(60));
        registry.note_challenge("opponent", Duration::from_secs(60));
        assert_eq!(registry.load(), 1);
    }
}
