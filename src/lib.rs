pub mod cli;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use cli::{Cli, Commands};
pub use error::{ConfigError, EngineError, ErrorKind, PoolError};
pub use models::{BatchJobConfig, BatchOutcome, BatchResult, Config, ProcessingStats};
pub use services::{
    Dispatcher, PooledResource, Processor, RateLimiter, ResourceFactory, ResourcePool,
    StreamProcessor,
};
pub use utils::{partition, process_in_chunks, run_with_concurrency};
