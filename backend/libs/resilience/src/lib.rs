/// Fault-tolerant invocation of downstream dependencies
///
/// This library protects callers from slow, failing, or overloaded
/// dependencies (cloud AI APIs, blob storage, cache):
/// - **Circuit Breaker**: per-dependency state machine that fails fast, degrades
///   to a caller-supplied fallback, and probes for recovery
/// - **Registry**: explicit context object mapping dependency names to breakers
/// - **Retry**: bounded retries with exponential backoff and jitter
/// - **Timeout**: deadline enforcement that cancels the timed-out call
/// - **Tower Layer**: composable middleware for Tower-based services
/// - **Preset Configurations**: per-dependency-class settings resolved by name
///
/// # Example: AI call with a cached fallback
///
/// ```rust,no_run
/// use resilience::CircuitBreakerRegistry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = CircuitBreakerRegistry::from_env();
///     let breaker = registry.get_or_create("openai", None);
///
///     let result = breaker
///         .execute_with_fallback(
///             || async { Ok::<_, String>("fresh score") },
///             || async { Ok::<_, String>("cached score") },
///         )
///         .await;
///
///     if result.from_fallback {
///         // degraded answer, lower confidence upstream
///     }
/// }
/// ```
///
/// # Example: Retrying an idempotent read
///
/// ```rust,no_run
/// use resilience::{presets, RetryPolicy};
///
/// #[tokio::main]
/// async fn main() {
///     let retry = presets::cache_config().retry.unwrap_or_default();
///
///     let value = RetryPolicy::new(retry)
///         .execute(|| async { Ok::<_, String>(42) })
///         .await;
/// }
/// ```

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod layer;
pub mod metrics;
pub mod presets;
pub mod registry;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState, ExecutionResult,
};
pub use config::BreakerOverrides;
pub use error::{ConfigError, InvocationError};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};
pub use presets::{for_dependency, DependencyClass, ServiceConfig};
pub use registry::CircuitBreakerRegistry;
pub use retry::{with_retry, RetryConfig, RetryPolicy};
pub use timeout::{with_timeout, with_timeout_result};
pub use tokio_util::sync::CancellationToken;
