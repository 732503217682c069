mod dispatcher;
mod pool;
mod processor;
mod rate_limiter;
mod stream;

pub use dispatcher::Dispatcher;
pub use pool::{PooledResource, ResourceFactory, ResourcePool};
pub use processor::Processor;
pub use rate_limiter::RateLimiter;
pub use stream::{StreamProcessor, StreamSummary};
