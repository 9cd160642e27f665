/// Tower middleware that routes every request through a circuit breaker
use crate::circuit_breaker::CircuitBreaker;
use crate::error::InvocationError;
use crate::registry::CircuitBreakerRegistry;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

type NoFallback<T> = fn() -> std::future::Ready<Result<T, InvocationError>>;

/// Wraps a service so its calls are gated by one dependency's breaker.
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
    timeout: Option<Duration>,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            breaker,
            timeout: None,
        }
    }

    /// Use the registry's breaker for `dependency`, creating it if needed.
    pub fn for_dependency(registry: &CircuitBreakerRegistry, dependency: &str) -> Self {
        Self::new(registry.get_or_create(dependency, None))
    }

    /// Per-request deadline replacing the breaker's `request_timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: self.breaker.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
    timeout: Option<Duration>,
}

impl<S> CircuitBreakerService<S> {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<S, Request> Service<Request> for CircuitBreakerService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send,
    S::Error: fmt::Display,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = InvocationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|e| InvocationError::DependencyFailure(e.to_string()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let breaker = self.breaker.clone();
        let timeout = self.timeout;
        // The readied service handles this request; a fresh clone waits for the next one
        let replacement = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, replacement);

        Box::pin(async move {
            breaker
                .execute_with_options(
                    move || ready.call(req),
                    None::<NoFallback<S::Response>>,
                    timeout,
                )
                .await
                .into_result()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Upload client that fails its first `outages` requests.
    #[derive(Clone)]
    struct StorageClient {
        requests: Arc<AtomicU32>,
        outages: u32,
        latency: Duration,
    }

    impl StorageClient {
        fn new(outages: u32) -> Self {
            Self {
                requests: Arc::new(AtomicU32::new(0)),
                outages,
                latency: Duration::ZERO,
            }
        }
    }

    impl Service<&'static str> for StorageClient {
        type Response = String;
        type Error = String;
        type Future = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, object: &'static str) -> Self::Future {
            let seen = self.requests.fetch_add(1, Ordering::SeqCst);
            let outages = self.outages;
            let latency = self.latency;

            Box::pin(async move {
                tokio::time::sleep(latency).await;
                if seen < outages {
                    Err("bucket unavailable".to_string())
                } else {
                    Ok(format!("stored {object}"))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_open_breaker_stops_reaching_service() {
        let client = StorageClient::new(3);
        let requests = client.requests.clone();

        let breaker = CircuitBreaker::new(
            "blob-storage",
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        let mut service = CircuitBreakerLayer::new(breaker).layer(client);

        let first = service.ready().await.unwrap().call("a.wav").await;
        assert_eq!(
            first,
            Err(InvocationError::DependencyFailure("bucket unavailable".to_string()))
        );
        let _ = service.ready().await.unwrap().call("b.wav").await;
        assert_eq!(service.breaker().state(), CircuitState::Open);

        let rejected = service.ready().await.unwrap().call("c.wav").await;
        assert!(matches!(rejected, Err(InvocationError::CircuitOpen { .. })));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_registry_breaker_is_shared() {
        let registry = CircuitBreakerRegistry::new();
        let service = CircuitBreakerLayer::for_dependency(&registry, "s3-uploads")
            .layer(StorageClient::new(0));

        let response = service.oneshot("clip.m4a").await;
        assert_eq!(response, Ok("stored clip.m4a".to_string()));
        assert_eq!(registry.get_all_metrics()["s3-uploads"].success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_layer_timeout_overrides_breaker_deadline() {
        let mut client = StorageClient::new(0);
        client.latency = Duration::from_secs(5);

        let service = CircuitBreakerLayer::new(CircuitBreaker::new("slow", Default::default()))
            .with_timeout(Duration::from_secs(1))
            .layer(client);

        let response = service.oneshot("big.wav").await;
        assert_eq!(response, Err(InvocationError::Timeout(Duration::from_secs(1))));
    }
}
