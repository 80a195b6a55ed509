//! Bounded worker pool for long-running request work.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// The pool had no free slot, or has been closed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Worker pool '{pool}' exhausted ({size} workers busy)")]
pub struct PoolExhausted {
    pub pool: &'static str,
    pub size: usize,
}

/// A fixed number of worker slots on the shared runtime.
///
/// Submission never queues: when every slot is busy the work is rejected
/// immediately so callers can answer 503 instead of hanging. Each entry point
/// gets its own pool so saturation in one path cannot starve another.
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    /// Spawn `work` if a slot is free. The slot is released when it finishes.
    pub fn try_spawn<F>(&self, work: F) -> Result<JoinHandle<F::Output>, PoolExhausted>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| PoolExhausted {
                pool: self.name,
                size: self.size,
            })?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            work.await
        }))
    }

    /// Reject all future submissions; running work is unaffected
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Work currently holding a slot, including after `close`
    pub fn in_flight(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_rejects_when_saturated() {
        let pool = WorkerPool::new("test", 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = pool.try_spawn(async move {
            let _ = release_rx.await;
        });
        assert!(running.is_ok());
        assert_eq!(pool.in_flight(), 1);

        let rejected = pool.try_spawn(async {});
        assert_eq!(
            rejected.err(),
            Some(PoolExhausted {
                pool: "test",
                size: 1
            })
        );

        release_tx.send(()).unwrap();
        running.unwrap().await.unwrap();
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.try_spawn(async {}).is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_but_tracks_running_work() {
        let pool = WorkerPool::new("test", 4);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let running = pool
            .try_spawn(async move {
                let _ = release_rx.await;
            })
            .unwrap();

        pool.close();
        assert!(pool.try_spawn(async {}).is_err());
        assert_eq!(pool.in_flight(), 1);

        release_tx.send(()).unwrap();
        running.await.unwrap();
        assert_eq!(pool.in_flight(), 0);
    }
}
