use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::AppError;

/// Bounded pool for blocking work (text extraction, OCR). At most `size`
/// jobs run at once; further callers wait for a permit.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, AppError> {
        if size == 0 {
            return Err(AppError::Validation(
                "WORKER_POOL_SIZE must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `job` on the blocking thread pool once a permit is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T, AppError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("worker pool closed".to_string()))?;
        debug!(available = self.available(), "worker pool job started");
        Ok(tokio::task::spawn_blocking(job).await?)
    }

    /// Bounds an async job by the same permits.
    pub async fn run_async<Fut>(&self, job: Fut) -> Result<Fut::Output, AppError>
    where
        Fut: Future,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("worker pool closed".to_string()))?;
        Ok(job.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[test]
    fn test_zero_sized_pool_is_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_never_exceeds_pool_size() {
        let pool = WorkerPool::new(2).expect("pool");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("job");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_panicking_job_surfaces_as_error() {
        let pool = WorkerPool::new(1).expect("pool");
        let result = pool.run(|| -> u32 { panic!("extraction blew up") }).await;
        assert!(matches!(result, Err(AppError::Join(_))));
        assert_eq!(pool.run(|| 7).await.expect("pool still usable"), 7);
    }
}
