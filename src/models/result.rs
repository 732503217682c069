//! Per-batch results and dispatcher statistics.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Terminal outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome<R> {
    Success { value: R },
    Failed { reason: ErrorKind, message: String },
}

/// Result of processing one batch, created once the batch stops retrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<R> {
    /// Position of the batch in partition order.
    pub batch_index: usize,
    /// Number of items in the batch.
    pub item_count: usize,
    pub outcome: BatchOutcome<R>,
    /// Attempts made, always at least 1.
    pub attempts_made: u32,
}

impl<R> BatchResult<R> {
    pub fn success(batch_index: usize, item_count: usize, value: R, attempts_made: u32) -> Self {
        Self {
            batch_index,
            item_count,
            outcome: BatchOutcome::Success { value },
            attempts_made,
        }
    }

    pub fn failed(
        batch_index: usize,
        item_count: usize,
        reason: ErrorKind,
        message: impl Into<String>,
        attempts_made: u32,
    ) -> Self {
        Self {
            batch_index,
            item_count,
            outcome: BatchOutcome::Failed {
                reason,
                message: message.into(),
            },
            attempts_made,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&R> {
        match &self.outcome {
            BatchOutcome::Success { value } => Some(value),
            BatchOutcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            BatchOutcome::Success { .. } => None,
            BatchOutcome::Failed { reason, .. } => Some(*reason),
        }
    }

    /// Convert into a `Result`, keeping only the failure message.
    pub fn into_result(self) -> Result<R, (ErrorKind, String)> {
        match self.outcome {
            BatchOutcome::Success { value } => Ok(value),
            BatchOutcome::Failed { reason, message } => Err((reason, message)),
        }
    }
}

/// Reorder results into partition order.
pub fn sort_by_index<R>(results: &mut [BatchResult<R>]) {
    results.sort_by_key(|r| r.batch_index);
}

/// Counters accumulated by a dispatcher over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_items_submitted: u64,
    pub total_errored_items: u64,
    pub total_batches: u64,
    pub failed_batches: u64,
    pub total_attempts: u64,
}

impl ProcessingStats {
    pub fn succeeded_batches(&self) -> u64 {
        self.total_batches - self.failed_batches
    }
}
