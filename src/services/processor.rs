//! Processing functions and the worker pool that runs blocking ones.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

type BlockingFn<T, R> = dyn Fn(Vec<T>) -> anyhow::Result<R> + Send + Sync;
type AsyncFn<T, R> = dyn Fn(Vec<T>) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync;

/// The function a dispatcher applies to every batch.
///
/// Callers pick the execution model explicitly. Blocking functions always run
/// on the worker pool; async functions are polled on the calling task. Either
/// way the function may be invoked more than once for the same batch and
/// concurrently for different batches.
pub enum Processor<T, R> {
    Blocking(Arc<BlockingFn<T, R>>),
    Async(Arc<AsyncFn<T, R>>),
}

impl<T, R> Clone for Processor<T, R> {
    fn clone(&self) -> Self {
        match self {
            Processor::Blocking(f) => Processor::Blocking(Arc::clone(f)),
            Processor::Async(f) => Processor::Async(Arc::clone(f)),
        }
    }
}

impl<T, R> std::fmt::Debug for Processor<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Processor::Blocking(_) => f.write_str("Processor::Blocking"),
            Processor::Async(_) => f.write_str("Processor::Async"),
        }
    }
}

impl<T, R> Processor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Wrap a function that may block the calling thread.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Vec<T>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Processor::Blocking(Arc::new(f))
    }

    /// Wrap a function that returns a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Processor::Async(Arc::new(move |batch| f(batch).boxed()))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Processor::Blocking(_))
    }

    /// Run the function on `batch`. `guard` is dropped once the function has
    /// returned, which for a blocking call may be after this future is gone.
    pub(crate) async fn call<G>(
        &self,
        batch: Vec<T>,
        workers: &WorkerPool,
        guard: G,
    ) -> anyhow::Result<R>
    where
        G: Send + 'static,
    {
        match self {
            Processor::Async(f) => {
                let _guard = guard;
                f(batch).await
            }
            Processor::Blocking(f) => workers.run(Arc::clone(f), batch, guard).await,
        }
    }
}

/// Bounded set of threads for blocking processing functions.
///
/// A permit travels with each blocking call and is released only when the
/// call returns, so a call abandoned by a timeout still occupies its worker.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
    size: u32,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        let size = u32::try_from(size.max(1)).unwrap_or(u32::MAX);
        Self {
            permits: Arc::new(Semaphore::new(size as usize)),
            size,
        }
    }

    async fn run<T, R, G>(
        &self,
        f: Arc<BlockingFn<T, R>>,
        batch: Vec<T>,
        guard: G,
    ) -> anyhow::Result<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        G: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("worker pool is closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _guard = guard;
            f(batch)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                anyhow!("processing function panicked")
            } else {
                anyhow!("processing task was cancelled")
            }
        })?
    }

    /// Wait for every running call to return, then refuse new ones.
    pub(crate) async fn drain(&self) {
        if let Ok(all) = self.permits.acquire_many(self.size).await {
            self.permits.close();
            drop(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_async_processor_runs() {
        let processor = Processor::from_async(|batch: Vec<u32>| async move {
            Ok::<u32, anyhow::Error>(batch.into_iter().sum())
        });
        let workers = WorkerPool::new(1);
        assert!(!processor.is_blocking());
        assert_eq!(processor.call(vec![1, 2, 3], &workers, ()).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_blocking_processor_runs_on_pool() {
        let processor = Processor::blocking(|batch: Vec<u32>| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(batch.len())
        });
        let workers = WorkerPool::new(2);
        assert!(processor.is_blocking());
        assert_eq!(processor.call(vec![7; 4], &workers, ()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_blocking_panic_becomes_error() {
        let processor: Processor<u8, ()> = Processor::blocking(|_| panic!("bad input"));
        let workers = WorkerPool::new(1);
        let err = processor.call(vec![1], &workers, ()).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_blocking_calls() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let processor = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            Processor::blocking(move |_batch: Vec<u8>| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let workers = WorkerPool::new(2);

        let calls = (0..6).map(|_| processor.call(vec![0], &workers, ()));
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_drained_pool_rejects_calls() {
        let processor = Processor::blocking(|_: Vec<u8>| Ok(()));
        let workers = WorkerPool::new(2);
        workers.drain().await;
        assert!(processor.call(vec![1], &workers, ()).await.is_err());
        // Draining twice is harmless.
        workers.drain().await;
    }

    #[tokio::test]
    async fn test_blocking_call_holds_guard_past_cancellation() {
        let processor = Processor::blocking(|_: Vec<u8>| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        });
        let workers = WorkerPool::new(1);
        let gate = Arc::new(Semaphore::new(1));
        let guard = Arc::clone(&gate).try_acquire_owned().unwrap();

        let call = processor.call(vec![1], &workers, guard);
        assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());
        assert_eq!(gate.available_permits(), 0);

        let _again = tokio::time::timeout(Duration::from_secs(2), gate.acquire())
            .await
            .expect("guard is released once the call returns")
            .unwrap();
    }
}
