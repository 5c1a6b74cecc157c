//! Bounded execution of interactive queries.
//!
//! Each accepted operation runs on its own task while holding one of a fixed
//! number of slots. When no slot is free the call fails with
//! [`ServiceError::Busy`] instead of queueing. The caller gets whichever comes
//! first: the result, the deadline ([`ServiceError::Timeout`]) or its own
//! cancellation signal ([`ServiceError::Cancelled`]). In the last two cases
//! the task is aborted and its slot released.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::error::{ServiceError, ServiceResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

/// Aborts the task if the caller stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl WorkerPool {
    pub fn new(size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    /// `2 × available CPUs + 1` slots.
    pub fn default_size() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus * 2 + 1
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs `op` on a pooled task. `cancelled` resolves when the caller goes
    /// away.
    pub async fn run<T, Fut, C>(&self, op: Fut, cancelled: C) -> ServiceResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = ServiceResult<T>> + Send + 'static,
        C: Future<Output = ()>,
    {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| {
                tracing::warn!(slots = self.size, "worker pool exhausted");
                ServiceError::Busy
            })?;

        let handle = tokio::spawn(async move {
            let _permit = permit;
            op.await
        });
        let _guard = AbortOnDrop(handle.abort_handle());

        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(err) => Err(ServiceError::Upstream(anyhow::anyhow!("query task failed: {err}"))),
            },
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "query timed out");
                Err(ServiceError::Timeout(self.timeout))
            }
            _ = cancelled => {
                tracing::info!("caller cancelled query");
                Err(ServiceError::Cancelled)
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::default_size(), DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn returns_operation_result() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        let v = pool.run(async { Ok(5) }, pending()).await.unwrap();
        assert_eq!(v, 5);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn propagates_operation_errors() {
        let pool = WorkerPool::new(1, Duration::from_secs(1));
        let err = pool
            .run(
                async { Err::<(), _>(ServiceError::NotFound("AAPL".into())) },
                pending(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn times_out_and_frees_slot() {
        let pool = WorkerPool::new(1, Duration::from_millis(20));
        let err = pool
            .run(
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                pending(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout(_)));

        // The aborted task drops its permit shortly after.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_is_busy() {
        let pool = WorkerPool::new(1, Duration::from_secs(5));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let p = pool.clone();
        let first = tokio::spawn(async move {
            p.run(
                async move {
                    let _ = release_rx.await;
                    Ok(1)
                },
                pending(),
            )
            .await
        });

        while pool.available() > 0 {
            tokio::task::yield_now().await;
        }
        let err = pool.run(async { Ok(2) }, pending()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Busy));

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn caller_cancellation_is_distinct() {
        let pool = WorkerPool::new(1, Duration::from_secs(5));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let cancelled = async move {
            let _ = cancel_rx.await;
        };

        let run = pool.run(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            cancelled,
        );
        cancel_tx.send(()).unwrap();
        let err = run.await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
    }
}
