//! Concurrent batch dispatcher.
//!
//! Batches are submitted in partition order and run with at most
//! `max_concurrent_batches` in flight. Each batch takes rate-limiter tokens
//! (when limiting is enabled) and then runs through the retry loop with a
//! per-attempt timeout. Completion order is unspecified; every result
//! carries its `batch_index`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::processor::{Processor, WorkerPool};
use super::rate_limiter::RateLimiter;
use crate::error::{ConfigError, EngineError, ErrorKind};
use crate::models::{BatchJobConfig, BatchResult, ProcessingStats};
use crate::utils::partition::partition;
use crate::utils::retry::{RetryConfig, RetryResult, with_exclusive_retry};

struct DispatcherInner<T, R> {
    processor: Processor<T, R>,
    config: BatchJobConfig,
    retry: RetryConfig,
    slots: Arc<Semaphore>,
    limiter: Option<RateLimiter>,
    workers: WorkerPool,
    stats: Mutex<ProcessingStats>,
    closed: AtomicBool,
}

/// Runs batches through a [`Processor`] under concurrency, rate, timeout and
/// retry controls.
///
/// Cloning is cheap and clones share slots, limiter, workers and statistics.
pub struct Dispatcher<T, R> {
    inner: Arc<DispatcherInner<T, R>>,
}

impl<T, R> Clone for Dispatcher<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> Dispatcher<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Create a dispatcher. Fails if the configuration is invalid.
    pub fn new(processor: Processor<T, R>, config: BatchJobConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let limiter = config
            .rate_limit_per_second
            .map(RateLimiter::new)
            .transpose()?;

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                retry: RetryConfig::from(&config),
                slots: Arc::new(Semaphore::new(config.max_concurrent_batches)),
                workers: WorkerPool::new(config.max_concurrent_batches),
                stats: Mutex::new(ProcessingStats::default()),
                closed: AtomicBool::new(false),
                processor,
                limiter,
                config,
            }),
        })
    }

    pub fn config(&self) -> &BatchJobConfig {
        &self.inner.config
    }

    /// Snapshot of the counters accumulated so far.
    pub fn stats(&self) -> ProcessingStats {
        *self.inner.stats.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Process every item and return one result per batch, in completion
    /// order.
    ///
    /// The list is complete even if [`Dispatcher::close`] runs concurrently:
    /// batches that had not started by then are reported as failed with zero
    /// attempts.
    pub async fn process_all(&self, items: Vec<T>) -> Result<Vec<BatchResult<R>>, EngineError> {
        self.process_all_with_progress(items, |_, _| {}).await
    }

    /// Like [`Dispatcher::process_all`], calling `progress(completed, total)`
    /// after each batch finishes when progress tracking is enabled.
    pub async fn process_all_with_progress<P>(
        &self,
        items: Vec<T>,
        mut progress: P,
    ) -> Result<Vec<BatchResult<R>>, EngineError>
    where
        P: FnMut(usize, usize),
    {
        self.ensure_open()?;

        let batches = partition(items, self.inner.config.batch_size)?;
        let total = batches.len();
        info!(
            batches = total,
            batch_size = self.inner.config.batch_size,
            max_concurrent = self.inner.config.max_concurrent_batches,
            "processing batches"
        );

        // Futures are first polled in push order, so slot requests queue in
        // partition order on the fair semaphore.
        let mut pending: FuturesUnordered<_> = batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| self.inner.run_with_slot(index, batch))
            .collect();

        let mut results = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            results.push(result);
            if self.inner.config.progress_tracking_enabled {
                progress(results.len(), total);
            }
        }

        Ok(results)
    }

    /// Process a possibly unbounded stream of items.
    ///
    /// Items are buffered until a batch fills (or `buffer_size` items are
    /// waiting, whichever is smaller), then dispatched. Leftover items form a
    /// final short batch when the input ends. The returned stream ends once
    /// the input has ended and every batch has reported.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn process_stream<S>(
        &self,
        items: S,
        buffer_size: usize,
    ) -> Result<ReceiverStream<BatchResult<R>>, EngineError>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.ensure_open()?;
        if buffer_size < 1 {
            return Err(ConfigError::invalid("buffer_size must be at least 1").into());
        }

        let (tx, rx) = mpsc::channel(self.inner.config.max_concurrent_batches);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.drive_stream(Box::pin(items), buffer_size, tx));

        Ok(ReceiverStream::new(rx))
    }

    /// [`Dispatcher::process_stream`] over a channel of items.
    pub fn process_channel(
        &self,
        items: mpsc::Receiver<T>,
        buffer_size: usize,
    ) -> Result<ReceiverStream<BatchResult<R>>, EngineError> {
        self.process_stream(ReceiverStream::new(items), buffer_size)
    }

    /// Stop accepting work and wait for in-flight batches and worker threads
    /// to finish. Results not yet taken from a stream stay in its channel.
    /// Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let max = u32::try_from(self.inner.config.max_concurrent_batches).unwrap_or(u32::MAX);
        if let Ok(all) = self.inner.slots.acquire_many(max).await {
            self.inner.slots.close();
            drop(all);
        }
        self.inner.workers.drain().await;
        info!(stats = ?self.stats(), "dispatcher closed");
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl<T, R> DispatcherInner<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    async fn run_with_slot(&self, index: usize, batch: Vec<T>) -> BatchResult<R> {
        let slot = self.slots.acquire().await;
        if slot.is_err() || self.closed.load(Ordering::SeqCst) {
            return self.skip(index, batch.len());
        }
        self.execute(index, batch).await
    }

    async fn drive_stream<S>(
        self: Arc<Self>,
        mut items: std::pin::Pin<Box<S>>,
        buffer_size: usize,
        tx: mpsc::Sender<BatchResult<R>>,
    ) where
        S: Stream<Item = T> + Send + 'static,
    {
        let threshold = self.config.batch_size.min(buffer_size);
        let mut buffer = Vec::with_capacity(threshold);
        let mut next_index = 0;

        while let Some(item) = items.next().await {
            buffer.push(item);
            if buffer.len() < threshold {
                continue;
            }

            let batch = std::mem::replace(&mut buffer, Vec::with_capacity(threshold));
            if !Arc::clone(&self).dispatch(next_index, batch, &tx).await {
                return;
            }
            next_index += 1;
        }

        if !buffer.is_empty() {
            Arc::clone(&self).dispatch(next_index, buffer, &tx).await;
        }
        debug!(batches = next_index, "input stream exhausted");
    }

    /// Reserve room for the result, wait for a slot and spawn the batch.
    /// Returns false when no more batches should be dispatched.
    async fn dispatch(
        self: Arc<Self>,
        index: usize,
        batch: Vec<T>,
        tx: &mpsc::Sender<BatchResult<R>>,
    ) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            warn!(batch = index, "dispatcher closed, dropping remaining stream input");
            return false;
        }

        // Reserving first keeps a slow consumer throttling dispatch without
        // holding a concurrency slot past execution.
        let delivery = match tx.clone().reserve_owned().await {
            Ok(delivery) => delivery,
            Err(_) => {
                debug!(batch = index, "result consumer dropped, stopping stream");
                return false;
            }
        };
        if self.closed.load(Ordering::SeqCst) {
            warn!(batch = index, "dispatcher closed, dropping remaining stream input");
            return false;
        }

        let slot: OwnedSemaphorePermit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => return false,
        };

        tokio::spawn(async move {
            let result = self.execute(index, batch).await;
            drop(slot);
            delivery.send(result);
        });
        true
    }

    /// Result for a batch that never started because the dispatcher closed.
    fn skip(&self, index: usize, item_count: usize) -> BatchResult<R> {
        warn!(batch = index, items = item_count, "dispatcher closed before batch started");
        let result = BatchResult::failed(
            index,
            item_count,
            ErrorKind::ProcessingError,
            "dispatcher closed before the batch started",
            0,
        );
        self.record(&result);
        result
    }

    async fn execute(&self, index: usize, batch: Vec<T>) -> BatchResult<R> {
        let item_count = batch.len();

        if let Some(limiter) = &self.limiter {
            limiter
                .acquire(u32::try_from(item_count).unwrap_or(u32::MAX))
                .await;
        }

        let label = format!("batch {index}");
        let outcome = with_exclusive_retry(&self.retry, &label, |attempt| {
            self.processor.call(batch.clone(), &self.workers, attempt)
        })
        .await;

        let result = match outcome {
            RetryResult::Success { value, attempts } => {
                debug!(batch = index, items = item_count, attempts, "batch succeeded");
                BatchResult::success(index, item_count, value, attempts)
            }
            RetryResult::Failed {
                kind,
                message,
                attempts,
            } => {
                warn!(batch = index, items = item_count, attempts, reason = %kind, "batch failed");
                BatchResult::failed(index, item_count, kind, message, attempts)
            }
        };

        self.record(&result);
        result
    }

    fn record(&self, result: &BatchResult<R>) {
        let item_count = result.item_count as u64;
        let mut stats = self.stats.lock();
        stats.total_items_submitted += item_count;
        stats.total_batches += 1;
        stats.total_attempts += u64::from(result.attempts_made);
        if !result.is_success() {
            stats.failed_batches += 1;
            stats.total_errored_items += item_count;
        }
    }
}
