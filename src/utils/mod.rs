//! Utility modules.

pub mod concurrency;
pub mod partition;
pub mod retry;

pub use concurrency::{process_in_chunks, run_with_concurrency};
pub use partition::partition;
pub use retry::{RetryConfig, RetryResult, with_exclusive_retry, with_retry};
