//! Bounded pool of interchangeable engine units.
//!
//! Sized once at startup (configured max concurrent games plus one spare)
//! and never grown: the number of concurrent move computations is hard
//! capped no matter how many games hit "my turn" at once — the excess
//! sessions simply wait in [`EnginePool::acquire`].

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::error;

use super::MoveSearch;

/// Pool failures.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every unit has been lost to a dead process.
    #[error("no live engine units remain")]
    Exhausted,
}

/// Fixed set of engine units handed out one at a time.
pub struct EnginePool<E> {
    free_tx: mpsc::Sender<E>,
    free_rx: Mutex<mpsc::Receiver<E>>,
    size: usize,
    live: Arc<AtomicUsize>,
}

impl<E: MoveSearch> EnginePool<E> {
    /// Build a pool from pre-configured units. The pool never grows.
    pub fn new(units: Vec<E>) -> Self {
        let size = units.len();
        let (free_tx, free_rx) = mpsc::channel(size.max(1));
        for unit in units {
            free_tx
                .try_send(unit)
                .expect("channel sized to unit count");
        }
        Self {
            free_tx,
            free_rx: Mutex::new(free_rx),
            size,
            live: Arc::new(AtomicUsize::new(size)),
        }
    }

    /// Wait for a free unit. This is the only blocking point in a session's
    /// decision path; callers queue here when more games want to move than
    /// there are units.
    pub async fn acquire(&self) -> Result<PooledEngine<E>, PoolError> {
        if self.live.load(Ordering::Acquire) == 0 {
            return Err(PoolError::Exhausted);
        }
        let mut free = self.free_rx.lock().await;
        match free.recv().await {
            Some(engine) => Ok(PooledEngine {
                engine: Some(engine),
                free_tx: self.free_tx.clone(),
                live: Arc::clone(&self.live),
            }),
            None => Err(PoolError::Exhausted),
        }
    }

    /// Configured pool size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Units not yet lost to dead processes.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Shut down every idle unit. Units checked out at this point are
    /// reaped by their process handles when dropped.
    pub async fn shutdown(&self) {
        let mut free = self.free_rx.lock().await;
        while let Ok(mut engine) = free.try_recv() {
            engine.shutdown().await;
        }
    }
}

/// Exclusive checkout of one unit.
///
/// Dropping the guard returns the unit to the pool on every exit path; a
/// unit whose process has died is discarded instead, shrinking the pool.
pub struct PooledEngine<E: MoveSearch> {
    engine: Option<E>,
    free_tx: mpsc::Sender<E>,
    live: Arc<AtomicUsize>,
}

impl<E: MoveSearch> Deref for PooledEngine<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine.as_ref().expect("engine present until drop")
    }
}

impl<E: MoveSearch> DerefMut for PooledEngine<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine.as_mut().expect("engine present until drop")
    }
}

impl<E: MoveSearch> Drop for PooledEngine<E> {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        if engine.is_alive() {
            // Capacity equals pool size, so the send cannot fail.
            let _ = self.free_tx.try_send(engine);
        } else {
            let remaining = self.live.fetch_sub(1, Ordering::AcqRel) - 1;
            error!(remaining, "discarding dead engine unit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pool_of(n: usize) -> EnginePool<ScriptedEngine> {
        EnginePool::new((0..n).map(|_| ScriptedEngine::returning("e2e4")).collect())
    }

    #[tokio::test]
    async fn acquire_and_release_conserve_units() {
        let pool = pool_of(2);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.live(), 2);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        drop(first);
        drop(second);

        // Both units are back: two more checkouts succeed immediately.
        let _a = timeout(Duration::from_millis(50), pool.acquire())
            .await
            .expect("unit available")
            .unwrap();
        let _b = timeout(Duration::from_millis(50), pool.acquire())
            .await
            .expect("unit available")
            .unwrap();
        assert_eq!(pool.live(), 2);
    }

    #[tokio::test]
    async fn third_acquirer_blocks_until_a_release() {
        let pool = Arc::new(pool_of(2));

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();

        // No unit free: the third request must park.
        let blocked = timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err(), "third acquire should be waiting");

        drop(first);
        let third = timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("released unit becomes available");
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn checked_out_unit_searches() {
        let pool = pool_of(1);
        let mut unit = pool.acquire().await.unwrap();
        let outcome = unit.search("", Duration::from_millis(10)).await.unwrap();
        assert_eq!(outcome.best_move, "e2e4");
    }

    #[tokio::test]
    async fn dead_unit_is_discarded_not_returned() {
        let pool = EnginePool::new(vec![
            ScriptedEngine::failing(),
            ScriptedEngine::returning("e2e4"),
        ]);

        let mut unit = pool.acquire().await.unwrap();
        let _ = unit.search("", Duration::from_millis(10)).await;
        drop(unit);
        assert_eq!(pool.live(), 1);

        // The surviving unit still circulates.
        let unit = pool.acquire().await.unwrap();
        drop(unit);
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_errors_instead_of_hanging() {
        let pool = EnginePool::new(vec![ScriptedEngine::failing()]);
        let mut unit = pool.acquire().await.unwrap();
        let _ = unit.search("", Duration::from_millis(10)).await;
        drop(unit);

        assert_eq!(pool.live(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Exhausted)));
    }
}
