//! Concurrent execution against endpoints

pub mod collector;
pub mod executor;
pub mod rate_limiter;

pub use collector::{
    CollectedResponse, CollectionError, CollectionErrorKind, CollectionResult, ResponseCollector,
    ResponseOutcome,
};
pub use executor::{Executor, RetryPolicy, TaskFailure};
pub use rate_limiter::RateLimiter;
