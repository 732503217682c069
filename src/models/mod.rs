mod config;
mod format;
mod result;

pub use config::{
    BatchJobConfig, Config, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_TIMEOUT_MS, EngineConfig, OutputConfig, StreamConfig,
};
pub use format::OutputFormat;
pub use result::{BatchOutcome, BatchResult, ProcessingStats, sort_by_index};
