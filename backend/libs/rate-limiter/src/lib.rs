/// Distributed sliding-window rate limiting
///
/// Admission is counted per `(identifier, action)` in a sliding window of
/// weighted entries. With a Redis store every process shares the same
/// windows; without one each process keeps its own. Losing the store never
/// rejects traffic.
///
/// ```rust,no_run
/// use rate_limiter::{RateLimitRules, RateLimiter, RateLimiterSettings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rate_limiter::RateLimitError> {
///     // Shared handle; idle windows are swept in the background
///     let limiter =
///         RateLimiter::start(RateLimitRules::default(), RateLimiterSettings::from_env()?).await?;
///
///     // A 5 MB upload costs 5 units of the upload quota
///     let decision = limiter.check_rate_limit("user-42", "upload", Some(5)).await;
///     if !decision.allowed {
///         println!("retry in {:?}", decision.retry_after());
///     }
///     Ok(())
/// }
/// ```

pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod store;
pub mod types;

pub use config::{DegradedPolicy, RateLimitConfig, RateLimitRules, RateLimiterSettings};
pub use error::{RateLimitError, StoreError};
pub use limiter::RateLimiter;
pub use store::{MemoryStore, RedisWindowStore, WindowStore};
pub use types::{Algorithm, RateLimitResult, RateLimiterMetrics};
