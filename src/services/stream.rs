//! Streaming front end over [`Dispatcher::process_stream`].

use std::future::Future;

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::dispatcher::Dispatcher;
use crate::error::{ConfigError, EngineError};
use crate::models::BatchResult;

/// Totals for one streaming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub batches: u64,
    pub failed_batches: u64,
    pub items: u64,
}

/// Feeds continuous input through a dispatcher with a bounded assembly
/// buffer.
///
/// At most `buffer_size` items wait for batch assembly. Full batches go to
/// the dispatcher straight away, whose concurrency slots bound the number of
/// batches in flight.
pub struct StreamProcessor<T, R> {
    dispatcher: Dispatcher<T, R>,
    buffer_size: usize,
}

impl<T, R> StreamProcessor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(dispatcher: Dispatcher<T, R>, buffer_size: usize) -> Result<Self, ConfigError> {
        if buffer_size < 1 {
            return Err(ConfigError::invalid("buffer_size must be at least 1"));
        }
        Ok(Self {
            dispatcher,
            buffer_size,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<T, R> {
        &self.dispatcher
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Start processing `items`, yielding results as batches complete.
    pub fn run<S>(&self, items: S) -> Result<ReceiverStream<BatchResult<R>>, EngineError>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        self.dispatcher.process_stream(items, self.buffer_size)
    }

    /// Process `items` and hand every result to `sink` in completion order.
    ///
    /// Failed batches are passed to the sink like any other result. An error
    /// from the sink stops consumption and is returned.
    pub async fn for_each<S, F, Fut>(&self, items: S, mut sink: F) -> anyhow::Result<StreamSummary>
    where
        S: Stream<Item = T> + Send + 'static,
        F: FnMut(BatchResult<R>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut results = self.run(items)?;
        let mut summary = StreamSummary::default();

        while let Some(result) = results.next().await {
            summary.batches += 1;
            summary.items += result.item_count as u64;
            if !result.is_success() {
                summary.failed_batches += 1;
            }
            sink(result).await?;
        }

        info!(
            batches = summary.batches,
            failed = summary.failed_batches,
            items = summary.items,
            "stream finished"
        );
        Ok(summary)
    }
}
