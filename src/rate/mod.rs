//! Per-(operation, client) token buckets with bounded waits, exponential
//! backoff retries and per-operation call metrics.

mod balancer;
mod bucket;
mod metrics;

pub use balancer::{ConsumeOutcome, RateBalancer};
pub use bucket::TokenBucket;
pub use metrics::OperationMetrics;
