/// One entry point for calling a protected dependency
///
/// [`GuardedInvoker`] owns a rate limiter and a circuit breaker registry and
/// applies them in order: admission, breaker, then the dependency's retry
/// policy around the call itself.
///
/// ```rust,no_run
/// use invocation_guard::GuardedInvoker;
///
/// #[tokio::main]
/// async fn main() -> Result<(), invocation_guard::GuardError> {
///     let guard = GuardedInvoker::from_env().await?;
///
///     let score = guard
///         .invoke_with_fallback(
///             "user-42",
///             "analysis",
///             "openai",
///             || async { Ok::<_, String>(0.82) },
///             || async { Ok::<_, String>(0.5) },
///         )
///         .await?;
///
///     if score.from_fallback {
///         // report lower confidence
///     }
///     Ok(())
/// }
/// ```

pub mod error;
pub mod guard;

pub use error::GuardError;
pub use guard::{Guarded, GuardedInvoker, GuardHealth};
