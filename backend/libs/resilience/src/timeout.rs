/// Timeout wrapper for async operations
///
/// The wrapped future is dropped when the deadline fires, so a timed-out call
/// is cancelled rather than left running in the background.
use crate::error::InvocationError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, InvocationError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| InvocationError::Timeout(duration))
}

/// Execute a fallible future with timeout, folding its error into
/// [`InvocationError::DependencyFailure`]
pub async fn with_timeout_result<F, T, E>(duration: Duration, future: F) -> Result<T, InvocationError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(InvocationError::DependencyFailure(e.to_string())),
        Err(_) => Err(InvocationError::Timeout(duration)),
    }
}
