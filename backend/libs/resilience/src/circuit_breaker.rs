/// Circuit Breaker guarding calls to a single downstream dependency
///
/// State transitions:
/// - Closed → Open: consecutive failures reach the threshold, or the failure
///   rate inside the monitoring window exceeds the error rate threshold
/// - Open → HalfOpen: first call after the recovery timeout (that call is a probe)
/// - HalfOpen → Closed: success threshold consecutive probes succeed
/// - HalfOpen → Open: any probe failure
///
/// All state lives behind one lock, so concurrent outcomes are applied one at a
/// time and a transition is decided exactly once.
use crate::error::{ConfigError, InvocationError};
use crate::metrics::CircuitBreakerMetrics;
use crate::timeout::with_timeout_result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of samples kept for the rolling average response time.
const RESPONSE_TIME_SAMPLES: usize = 100;
/// Hard cap on outcomes kept for the windowed failure rate.
const MAX_WINDOW_SAMPLES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Circuit is open, requests fail fast (or degrade to the fallback)
    Open,
    /// Testing if the dependency recovered; every call is a probe
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count to trigger circuit open
    pub failure_threshold: u32,
    /// Duration to wait in Open before the next call is let through as a probe
    pub recovery_timeout: Duration,
    /// Deadline applied to every protected call and to the fallback
    pub request_timeout: Duration,
    /// Consecutive successful probes in HalfOpen to close circuit
    pub success_threshold: u32,
    /// Time span over which the failure rate is computed
    pub monitoring_window: Duration,
    /// Whether a caller-supplied fallback may be used
    pub fallback_enabled: bool,
    /// Failure rate (0.0 - 1.0) that must be exceeded to trigger circuit open
    pub error_rate_threshold: f64,
    /// Calls required inside the monitoring window before the rate is considered
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(60),
            fallback_enabled: true,
            error_rate_threshold: 0.5, // 50%
            minimum_requests: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "failure_threshold",
                min: 1,
                value: self.failure_threshold as u64,
            });
        }
        if self.success_threshold < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "success_threshold",
                min: 1,
                value: self.success_threshold as u64,
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request_timeout"));
        }
        if self.monitoring_window.is_zero() {
            return Err(ConfigError::ZeroDuration("monitoring_window"));
        }
        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "error_rate_threshold",
                reason: format!("expected (0.0, 1.0], got {}", self.error_rate_threshold),
            });
        }
        Ok(())
    }
}

/// Point-in-time snapshot of a breaker's counters (for monitoring)
#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub rejected_count: u64,
    pub fallback_count: u64,
    pub state_changed_at: DateTime<Utc>,
    pub average_response_time_ms: f64,
    pub window_failure_rate: f64,
}

/// Outcome of a protected call.
#[derive(Debug)]
pub struct ExecutionResult<T> {
    pub outcome: Result<T, InvocationError>,
    /// The value was produced by the fallback rather than the dependency
    pub from_fallback: bool,
    /// Circuit state after the call was accounted for
    pub circuit_state: CircuitState,
    pub response_time: Duration,
}

impl<T> ExecutionResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&InvocationError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, InvocationError> {
        self.outcome
    }
}

type NoFallback<T> = fn() -> std::future::Ready<Result<T, InvocationError>>;

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
}

struct CircuitBreakerState {
    current: CircuitState,
    changed_at: Instant,
    changed_at_wall: DateTime<Utc>,
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    rejected_count: u64,
    fallback_count: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    response_times: VecDeque<Duration>,
    /// Timestamped outcomes: true = success, false = failure
    window: VecDeque<(Instant, bool)>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            current: CircuitState::Closed,
            changed_at: Instant::now(),
            changed_at_wall: Utc::now(),
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            fallback_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
            window: VecDeque::new(),
        }
    }

    fn record_response_time(&mut self, elapsed: Duration) {
        if self.response_times.len() >= RESPONSE_TIME_SAMPLES {
            self.response_times.pop_front();
        }
        self.response_times.push_back(elapsed);
    }

    fn record_outcome(&mut self, success: bool, monitoring_window: Duration) {
        let now = Instant::now();
        self.prune_window(now, monitoring_window);
        if self.window.len() >= MAX_WINDOW_SAMPLES {
            self.window.pop_front();
        }
        self.window.push_back((now, success));
    }

    fn prune_window(&mut self, now: Instant, monitoring_window: Duration) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) > monitoring_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// (calls, failures) recorded inside the monitoring window
    fn window_counts(&self, monitoring_window: Duration) -> (usize, usize) {
        let now = Instant::now();
        self.window
            .iter()
            .filter(|(at, _)| now.duration_since(*at) <= monitoring_window)
            .fold((0, 0), |(calls, failures), (_, success)| {
                (calls + 1, failures + usize::from(!success))
            })
    }

    fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        self.response_times.iter().sum::<Duration>() / self.response_times.len() as u32
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        debug_assert!(config.validate().is_ok(), "invalid circuit breaker config");
        CircuitBreakerMetrics::record_state(&name, CircuitState::Closed.gauge_value());
        Self {
            name: Arc::from(name),
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState::new())),
        }
    }

    /// Validating constructor
    pub fn try_new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(name, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute a call with circuit breaker protection and no fallback
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_options(call, None::<NoFallback<T>>, None)
            .await
    }

    /// Execute a call, degrading to `fallback` when the circuit is (or becomes) open
    pub async fn execute_with_fallback<F, Fut, T, E, G, GFut, FE>(
        &self,
        call: F,
        fallback: G,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        self.execute_with_options(call, Some(fallback), None).await
    }

    /// Full form of [`execute`](Self::execute): optional fallback and an
    /// optional per-call timeout replacing `request_timeout`.
    ///
    /// The fallback must not route through this same breaker.
    pub async fn execute_with_options<F, Fut, T, E, G, GFut, FE>(
        &self,
        call: F,
        fallback: Option<G>,
        timeout_override: Option<Duration>,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        let started = Instant::now();
        let request_timeout = timeout_override.unwrap_or(self.config.request_timeout);

        if !self.try_acquire() {
            debug!(dependency = %self.name, "Circuit open, call rejected");
            CircuitBreakerMetrics::record_call(&self.name, "open", "rejected");
            let cause = InvocationError::CircuitOpen {
                name: self.name.to_string(),
            };
            return self.degrade(fallback, cause, request_timeout, started).await;
        }

        match with_timeout_result(request_timeout, call()).await {
            Ok(value) => {
                let state = self.record_success(started.elapsed());
                ExecutionResult {
                    outcome: Ok(value),
                    from_fallback: false,
                    circuit_state: state,
                    response_time: started.elapsed(),
                }
            }
            Err(err) => {
                let state = self.record_failure(started.elapsed(), &err);
                if state == CircuitState::Open {
                    return self.degrade(fallback, err, request_timeout, started).await;
                }
                ExecutionResult {
                    outcome: Err(err),
                    from_fallback: false,
                    circuit_state: state,
                    response_time: started.elapsed(),
                }
            }
        }
    }

    /// Like [`execute_with_options`](Self::execute_with_options), but returns
    /// [`InvocationError::Cancelled`] as soon as `cancel` fires.
    ///
    /// A call cancelled while in flight is dropped before its outcome is
    /// recorded, so it counts neither as a success nor as a failure. If the
    /// token fires while the fallback runs, the dependency's failure has
    /// already been recorded and stays recorded; only the fallback is dropped.
    pub async fn execute_cancellable<F, Fut, T, E, G, GFut, FE>(
        &self,
        call: F,
        fallback: Option<G>,
        timeout_override: Option<Duration>,
        cancel: &CancellationToken,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(dependency = %self.name, "Call cancelled by caller");
                CircuitBreakerMetrics::record_call(&self.name, self.state().as_str(), "cancelled");
                ExecutionResult {
                    outcome: Err(InvocationError::Cancelled),
                    from_fallback: false,
                    circuit_state: self.state(),
                    response_time: started.elapsed(),
                }
            }
            result = self.execute_with_options(call, fallback, timeout_override) => result,
        }
    }

    async fn degrade<T, G, GFut, FE>(
        &self,
        fallback: Option<G>,
        cause: InvocationError,
        request_timeout: Duration,
        started: Instant,
    ) -> ExecutionResult<T>
    where
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        let fallback = match fallback {
            Some(fallback) if self.config.fallback_enabled => fallback,
            _ => {
                return ExecutionResult {
                    outcome: Err(cause),
                    from_fallback: false,
                    circuit_state: self.state(),
                    response_time: started.elapsed(),
                }
            }
        };

        self.state.write().fallback_count += 1;
        debug!(dependency = %self.name, cause = %cause, "Executing fallback");

        match with_timeout_result(request_timeout, fallback()).await {
            Ok(value) => {
                CircuitBreakerMetrics::record_call(&self.name, self.state().as_str(), "fallback");
                ExecutionResult {
                    outcome: Ok(value),
                    from_fallback: true,
                    circuit_state: self.state(),
                    response_time: started.elapsed(),
                }
            }
            Err(fallback_err) => {
                warn!(
                    dependency = %self.name,
                    cause = %cause,
                    error = %fallback_err,
                    "Fallback failed"
                );
                CircuitBreakerMetrics::record_call(&self.name, self.state().as_str(), "fallback_failure");
                let message = match fallback_err {
                    InvocationError::DependencyFailure(message) => message,
                    other => other.to_string(),
                };
                ExecutionResult {
                    outcome: Err(InvocationError::FallbackFailure(message)),
                    from_fallback: false,
                    circuit_state: self.state(),
                    response_time: started.elapsed(),
                }
            }
        }
    }

    /// Admission check. Moves Open → HalfOpen once the recovery timeout elapsed.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.write();

        match state.current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if state.changed_at.elapsed() >= self.config.recovery_timeout {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    true
                } else {
                    state.rejected_count += 1;
                    false
                }
            }
        }
    }

    fn record_success(&self, elapsed: Duration) -> CircuitState {
        let mut state = self.state.write();

        state.total_requests += 1;
        state.success_count += 1;
        state.consecutive_failures = 0;
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        state.record_response_time(elapsed);
        state.record_outcome(true, self.config.monitoring_window);

        CircuitBreakerMetrics::record_call(&self.name, state.current.as_str(), "success");

        if state.current == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut state, CircuitState::Closed);
        }

        state.current
    }

    fn record_failure(&self, elapsed: Duration, error: &InvocationError) -> CircuitState {
        let mut state = self.state.write();

        state.total_requests += 1;
        state.failure_count += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_successes = 0;
        state.record_response_time(elapsed);
        state.record_outcome(false, self.config.monitoring_window);

        let result = match error {
            InvocationError::Timeout(_) => "timeout",
            _ => "failure",
        };
        CircuitBreakerMetrics::record_call(&self.name, state.current.as_str(), result);

        match state.current {
            CircuitState::Closed => {
                let (calls, failures) = state.window_counts(self.config.monitoring_window);
                let error_rate = if calls == 0 {
                    0.0
                } else {
                    failures as f64 / calls as f64
                };
                let rate_tripped = calls >= self.config.minimum_requests as usize
                    && error_rate > self.config.error_rate_threshold;

                if state.consecutive_failures >= self.config.failure_threshold || rate_tripped {
                    warn!(
                        dependency = %self.name,
                        consecutive_failures = state.consecutive_failures,
                        error_rate = error_rate,
                        error = %error,
                        "Circuit breaker: Closed → Open"
                    );
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(dependency = %self.name, error = %error, "Circuit breaker: HalfOpen → Open (probe failed)");
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {
                // Call was admitted before the circuit opened
            }
        }

        state.current
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.current;
        if from == to {
            return;
        }

        if from == CircuitState::Open {
            CircuitBreakerMetrics::record_open_duration(
                &self.name,
                state.changed_at.elapsed().as_secs_f64(),
            );
        }

        state.current = to;
        state.changed_at = Instant::now();
        state.changed_at_wall = Utc::now();
        state.consecutive_successes = 0;

        if to == CircuitState::Closed {
            state.consecutive_failures = 0;
            state.window.clear();
        }

        match (from, to) {
            (_, CircuitState::Closed) | (_, CircuitState::HalfOpen) => {
                info!(dependency = %self.name, from = %from, to = %to, "Circuit breaker state change");
            }
            (_, CircuitState::Open) => {
                debug!(dependency = %self.name, from = %from, "Circuit breaker opened");
            }
        }

        CircuitBreakerMetrics::record_state_transition(&self.name, from.as_str(), to.as_str());
        CircuitBreakerMetrics::record_state(&self.name, to.gauge_value());
    }

    /// Get current circuit state (for monitoring)
    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    /// Snapshot of the breaker's counters
    pub fn metrics(&self) -> CircuitMetrics {
        let state = self.state.read();
        let (calls, failures) = state.window_counts(self.config.monitoring_window);

        CircuitMetrics {
            state: state.current,
            total_requests: state.total_requests,
            success_count: state.success_count,
            failure_count: state.failure_count,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            rejected_count: state.rejected_count,
            fallback_count: state.fallback_count,
            state_changed_at: state.changed_at_wall,
            average_response_time_ms: state.average_response_time().as_secs_f64() * 1000.0,
            window_failure_rate: if calls == 0 {
                0.0
            } else {
                failures as f64 / calls as f64
            },
        }
    }

    /// Return to a fresh Closed breaker with zeroed counters
    pub fn reset(&self) {
        let mut state = self.state.write();
        let from = state.current;
        *state = CircuitBreakerState::new();
        info!(dependency = %self.name, from = %from, "Circuit breaker reset");
        CircuitBreakerMetrics::record_state(&self.name, CircuitState::Closed.gauge_value());
    }

    /// Open the circuit manually (operator action); it recovers on the normal schedule
    pub fn force_open(&self) {
        let mut state = self.state.write();
        self.transition(&mut state, CircuitState::Open);
    }

    /// Close the circuit manually (operator action)
    pub fn force_closed(&self) {
        let mut state = self.state.write();
        self.transition(&mut state, CircuitState::Closed);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test-dependency", config)
    }

    async fn fail(cb: &CircuitBreaker) -> ExecutionResult<()> {
        cb.execute(|| async { Err::<(), _>("error") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> ExecutionResult<()> {
        cb.execute(|| async { Ok::<_, String>(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_closed_to_open_on_consecutive_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            let _ = fail(&cb).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);

        // Next call should fail fast
        let result = succeed(&cb).await;
        assert!(matches!(result.outcome, Err(InvocationError::CircuitOpen { .. })));
        assert!(!result.from_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_to_halfopen_after_timeout() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;

        let result = succeed(&cb).await;
        assert!(result.is_success());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_halfopen_to_closed_on_success() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = fail(&cb).await;
        }

        tokio::time::advance(Duration::from_millis(150)).await;

        for _ in 0..2 {
            let _ = succeed(&cb).await;
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_halfopen_to_open_on_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = fail(&cb).await;
        }

        tokio::time::advance(Duration::from_millis(150)).await;
        let _ = succeed(&cb).await;
        let changed_at = cb.metrics().state_changed_at;

        // A failure in HalfOpen should reopen the circuit
        let result = fail(&cb).await;
        assert_eq!(result.circuit_state, CircuitState::Open);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.metrics().state_changed_at >= changed_at);

        // Recovery timer restarted from the failed probe
        let result = succeed(&cb).await;
        assert!(result.error().map(|e| e.is_circuit_open()).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_windowed_error_rate_threshold() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 100, // High threshold to test error rate only
            error_rate_threshold: 0.5,
            minimum_requests: 10,
            ..Default::default()
        });

        // Alternate so consecutive failures never accumulate
        for _ in 0..4 {
            let _ = succeed(&cb).await;
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        // 6 failures out of 11 calls
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed); // 5/9 but below minimum volume
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_trip_rate() {
        let cb = breaker(CircuitBreakerConfig::default());
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().window_failure_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_monitoring_window_are_forgotten() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 100,
            monitoring_window: Duration::from_secs(10),
            minimum_requests: 4,
            ..Default::default()
        });

        for _ in 0..3 {
            let _ = succeed(&cb).await;
            let _ = fail(&cb).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;

        // 2 of 4 in window: not above 50%
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 5);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;

        let metrics = cb.metrics();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(metrics.consecutive_failures, 2);
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 4);
    }

    #[tokio::test]
    async fn test_fallback_used_when_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let first = cb
            .execute_with_fallback(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, _>("upstream down")
                },
                || async { Ok::<_, String>("cached") },
            )
            .await;
        // The failure opened the circuit, so the fallback answered
        assert_eq!(first.data(), Some(&"cached"));
        assert!(first.from_fallback);
        assert_eq!(first.circuit_state, CircuitState::Open);

        let second = cb
            .execute_with_fallback(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("live")
                },
                || async { Ok::<_, String>("cached") },
            )
            .await;
        assert_eq!(second.data(), Some(&"cached"));
        assert!(second.from_fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = cb.metrics();
        assert_eq!(metrics.fallback_count, 2);
        assert_eq!(metrics.rejected_count, 1);
    }

    #[tokio::test]
    async fn test_fallback_not_used_while_closed() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        let result = cb
            .execute_with_fallback(
                || async { Err::<&str, _>("flaky") },
                || async { Ok::<_, String>("cached") },
            )
            .await;

        assert_eq!(
            result.outcome,
            Err(InvocationError::DependencyFailure("flaky".to_string()))
        );
        assert!(!result.from_fallback);
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            fallback_enabled: false,
            ..Default::default()
        });
        let _ = fail(&cb).await;

        let result = cb
            .execute_with_fallback(
                || async { Ok::<_, String>(1) },
                || async { Ok::<_, String>(2) },
            )
            .await;
        assert!(matches!(result.outcome, Err(InvocationError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_fallback_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = fail(&cb).await;

        let result = cb
            .execute_with_fallback(
                || async { Ok::<_, String>(1) },
                || async { Err::<i32, _>("no cache entry") },
            )
            .await;
        assert_eq!(
            result.outcome,
            Err(InvocationError::FallbackFailure("no cache entry".to_string()))
        );
        assert!(!result.from_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        for _ in 0..2 {
            let result = cb
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>(())
                })
                .await;
            assert_eq!(
                result.outcome,
                Err(InvocationError::Timeout(Duration::from_millis(50)))
            );
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_override() {
        let cb = breaker(CircuitBreakerConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let result = cb
            .execute_with_options(
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>("slow but fine")
                },
                None::<NoFallback<&str>>,
                Some(Duration::from_secs(1)),
            )
            .await;
        assert_eq!(result.data(), Some(&"slow but fine"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = cb
            .execute_cancellable(
                || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, String>(())
                },
                None::<NoFallback<()>>,
                None,
                &token,
            )
            .await;

        assert_eq!(result.outcome, Err(InvocationError::Cancelled));
        assert_eq!(cb.state(), CircuitState::Closed);
        let metrics = cb.metrics();
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_honours_timeout_override() {
        let cb = breaker(CircuitBreakerConfig::default());
        let token = CancellationToken::new();

        let result = cb
            .execute_cancellable(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>(())
                },
                None::<NoFallback<()>>,
                Some(Duration::from_millis(200)),
                &token,
            )
            .await;

        assert_eq!(
            result.outcome,
            Err(InvocationError::Timeout(Duration::from_millis(200)))
        );
        assert_eq!(cb.metrics().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_fallback_keeps_recorded_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = cb
            .execute_cancellable(
                || async { Err::<&str, _>("upstream down") },
                Some(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, String>("cached")
                }),
                None,
                &token,
            )
            .await;

        assert_eq!(result.outcome, Err(InvocationError::Cancelled));
        assert!(!result.from_fallback);
        assert_eq!(cb.state(), CircuitState::Open);
        let metrics = cb.metrics();
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.fallback_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_response_time() {
        let cb = breaker(CircuitBreakerConfig::default());

        for ms in [10u64, 30] {
            let _ = cb
                .execute(|| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(())
                })
                .await;
        }

        let avg = cb.metrics().average_response_time_ms;
        assert!((avg - 20.0).abs() < 1.0, "unexpected average {avg}");
    }

    #[tokio::test]
    async fn test_reset_and_force() {
        let cb = breaker(CircuitBreakerConfig::default());

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = fail(&cb).await;
        cb.reset();
        let metrics = cb.metrics();
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.state, CircuitState::Closed);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BelowMinimum { field: "failure_threshold", .. })
        ));

        let config = CircuitBreakerConfig {
            error_rate_threshold: 1.5,
            ..Default::default()
        };
        assert!(CircuitBreaker::try_new("x", config).is_err());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
