//! Circuit breaker pattern for resilience.
//!
//! Prevents cascading failures by tracking consecutive failures of a
//! dependency and temporarily rejecting calls to it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Rolling response-time samples kept per breaker.
const RESPONSE_TIME_SAMPLES: usize = 100;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,

    /// Circuit is open, calls fail fast.
    Open,

    /// Circuit is probing whether the dependency recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Notification emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    total_timeouts: u64,
    total_calls: u64,
    half_open_calls: u32,
    generation: u64,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    state_changed_at: DateTime<Utc>,
    state_changed_instant: Instant,
    response_times: VecDeque<Duration>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            total_timeouts: 0,
            total_calls: 0,
            half_open_calls: 0,
            generation: 0,
            last_failure: None,
            last_success: None,
            state_changed_at: Utc::now(),
            state_changed_instant: Instant::now(),
            response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
        }
    }
}

/// Circuit breaker for a single dependency.
///
/// - Closed: calls pass through, consecutive failures are counted
/// - Open: calls are rejected without invoking the operation
/// - Half-Open: a limited number of probe calls decide between the two
///
/// All mutations go through one lock, so outcomes of concurrent calls
/// apply in completion order. Transitions are broadcast while the lock is
/// held, before the call that caused them returns.
pub struct CircuitBreaker {
    name: String,
    config: RwLock<CircuitBreakerConfig>,
    inner: Mutex<BreakerInner>,
    events: broadcast::Sender<CircuitStateChange>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker, starting closed.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            config: RwLock::new(config),
            inner: Mutex::new(BreakerInner::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config.read().clone()
    }

    /// Replace the configuration in place, keeping state and counters.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        *self.config.write() = config;
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitStateChange> {
        self.events.subscribe()
    }

    /// Current state, without applying the recovery timeout.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run an operation through the breaker with the configured timeout.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let timeout = self.config.read().call_timeout;
        self.call_with_timeout(timeout, op).await
    }

    /// Run an operation through the breaker with its own timeout.
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        op: F,
    ) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.try_acquire()?;

        let started = Instant::now();
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                permit.success(started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                permit.failure(false);
                Err(ResilienceError::OperationFailed {
                    name: self.name.clone(),
                    reason,
                })
            }
            Err(_) => {
                permit.failure(true);
                Err(ResilienceError::OperationTimeout {
                    name: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Admit a call or reject it.
    ///
    /// An open circuit whose recovery timeout elapsed moves to half-open
    /// here. Rejections leave every counter untouched. The outcome is
    /// reported through the returned permit; a permit dropped without an
    /// outcome gives its half-open slot back.
    pub fn try_acquire(&self) -> ResilienceResult<CallPermit<'_>> {
        let (recovery_timeout, half_open_max) = {
            let config = self.config.read();
            (config.recovery_timeout, config.half_open_max_calls)
        };

        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open
            && inner.state_changed_instant.elapsed() >= recovery_timeout
        {
            self.transition(&mut inner, CircuitState::HalfOpen, "recovery timeout elapsed");
        }

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                debug!(breaker = %self.name, "Call rejected, circuit open");
                return Err(self.unavailable(CircuitState::Open));
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= half_open_max {
                    debug!(breaker = %self.name, "Call rejected, half-open probes exhausted");
                    return Err(self.unavailable(CircuitState::HalfOpen));
                }
                inner.half_open_calls += 1;
            }
        }

        inner.total_calls += 1;
        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            settled: false,
        })
    }

    fn record_success(&self, response_time: Duration) {
        let mut inner = self.inner.lock();

        inner.total_successes += 1;
        inner.last_success = Some(Utc::now());
        if inner.response_times.len() == RESPONSE_TIME_SAMPLES {
            inner.response_times.pop_front();
        }
        inner.response_times.push_back(response_time);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker closing after successful probe");
                self.transition(&mut inner, CircuitState::Closed, "probe succeeded");
            }
            CircuitState::Open => {
                // Outcome of a call admitted before the circuit opened
                debug!(breaker = %self.name, "Success recorded while circuit open");
            }
        }
    }

    /// Timeouts are also counted separately.
    fn record_failure(&self, timed_out: bool) {
        let threshold = self.config.read().failure_threshold;
        let mut inner = self.inner.lock();

        inner.total_failures += 1;
        if timed_out {
            inner.total_timeouts += 1;
        }
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening due to failures"
                    );
                    self.transition(&mut inner, CircuitState::Open, "failure threshold reached");
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker re-opening after probe failure");
                self.transition(&mut inner, CircuitState::Open, "probe failed");
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock();
        info!(
            breaker = %self.name,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        self.transition(&mut inner, new_state, "forced");
    }

    /// Reset to closed with a clean failure count.
    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let average_response_time = if inner.response_times.is_empty() {
            Duration::ZERO
        } else {
            inner.response_times.iter().sum::<Duration>() / inner.response_times.len() as u32
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_timeouts: inner.total_timeouts,
            total_calls: inner.total_calls,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            state_changed_at: inner.state_changed_at,
            response_time_samples: inner.response_times.len(),
            average_response_time_ms: average_response_time.as_millis() as u64,
        }
    }

    /// Capture the persistent part of the breaker state.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_timeouts: inner.total_timeouts,
            total_calls: inner.total_calls,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            state_changed_at: inner.state_changed_at,
        }
    }

    /// Restore previously persisted state. Emits no notification.
    pub fn restore(&self, snapshot: &CircuitBreakerSnapshot) {
        let mut inner = self.inner.lock();
        let age = (Utc::now() - snapshot.state_changed_at)
            .to_std()
            .unwrap_or_default();

        inner.state = snapshot.state;
        inner.consecutive_failures = snapshot.consecutive_failures;
        inner.total_failures = snapshot.total_failures;
        inner.total_successes = snapshot.total_successes;
        inner.total_timeouts = snapshot.total_timeouts;
        inner.total_calls = snapshot.total_calls;
        inner.half_open_calls = 0;
        inner.last_failure = snapshot.last_failure;
        inner.last_success = snapshot.last_success;
        inner.state_changed_at = snapshot.state_changed_at;
        inner.state_changed_instant = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);

        debug!(breaker = %self.name, state = %inner.state, "Circuit breaker state restored");
    }

    /// A call abandoned before its outcome was known.
    fn release(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation
            && inner.state == CircuitState::HalfOpen
            && inner.half_open_calls > 0
        {
            inner.half_open_calls -= 1;
            debug!(breaker = %self.name, "Half-open probe abandoned, slot released");
        }
    }

    fn unavailable(&self, state: CircuitState) -> ResilienceError {
        ResilienceError::CircuitUnavailable {
            name: self.name.clone(),
            state,
        }
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition(&self, inner: &mut BreakerInner, new_state: CircuitState, reason: &str) {
        let from = inner.state;
        inner.state = new_state;
        inner.state_changed_at = Utc::now();
        inner.state_changed_instant = Instant::now();
        inner.half_open_calls = 0;
        inner.generation += 1;

        if new_state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }

        if from != new_state {
            let _ = self.events.send(CircuitStateChange {
                name: self.name.clone(),
                from,
                to: new_state,
                reason: reason.to_string(),
                at: inner.state_changed_at,
            });
        }
    }
}

/// An admitted call. Report its outcome with [`CallPermit::success`] or
/// [`CallPermit::failure`].
#[must_use = "an unsettled permit releases its slot without recording an outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self, response_time: Duration) {
        self.settled = true;
        self.breaker.record_success(response_time);
    }

    pub fn failure(mut self, timed_out: bool) {
        self.settled = true;
        self.breaker.record_failure(timed_out);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_timeouts: u64,
    pub total_calls: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub response_time_samples: usize,
    pub average_response_time_ms: u64,
}

/// Persisted breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_timeouts: u64,
    pub total_calls: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(5000),
            half_open_max_calls: 1,
            call_timeout: Duration::from_secs(1),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> ResilienceResult<()> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> ResilienceResult<u32> {
        breaker.call(|| async { Ok::<_, String>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_and_recovers_after_timeout() {
        let breaker = CircuitBreaker::new("db", test_config());

        for _ in 0..3 {
            assert!(matches!(
                fail(&breaker).await,
                Err(ResilienceError::OperationFailed { .. })
            ));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(100)).await;
        let invoked = AtomicU32::new(0);
        let counter = &invoked;
        let result = breaker
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ResilienceError::CircuitUnavailable {
                state: CircuitState::Open,
                ..
            })
        ));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(4900)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_leaves_counters_untouched() {
        let breaker = CircuitBreaker::new("db", test_config());
        breaker.force_state(CircuitState::Open);
        let before = breaker.stats();

        assert!(succeed(&breaker).await.is_err());

        let after = breaker.stats();
        assert_eq!(before.total_calls, after.total_calls);
        assert_eq!(before.total_failures, after.total_failures);
        assert_eq!(before.total_successes, after.total_successes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("db", test_config());
        breaker.force_state(CircuitState::HalfOpen);

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_limit() {
        let breaker = CircuitBreaker::new("db", test_config());
        breaker.force_state(CircuitState::HalfOpen);

        // First probe is admitted and still in flight
        let _probe = breaker.try_acquire().unwrap();
        assert!(matches!(
            breaker.try_acquire(),
            Err(ResilienceError::CircuitUnavailable {
                state: CircuitState::HalfOpen,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_call_releases_slot() {
        let breaker = CircuitBreaker::new("db", test_config());
        breaker.force_state(CircuitState::HalfOpen);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call_with_timeout(Duration::from_secs(10), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_does_not_touch_new_state() {
        let breaker = CircuitBreaker::new("db", test_config());
        breaker.force_state(CircuitState::HalfOpen);
        let stale = breaker.try_acquire().unwrap();

        breaker.force_state(CircuitState::HalfOpen);
        let _current = breaker.try_acquire().unwrap();
        drop(stale);

        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("db", test_config());

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counted_separately() {
        let breaker = CircuitBreaker::new("slow", test_config());

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::OperationTimeout { timeout_ms: 1000, .. })
        ));
        let stats = breaker.stats();
        assert_eq!(stats.total_timeouts, 1);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_notified_before_call_returns() {
        let breaker = CircuitBreaker::new("db", test_config());
        let mut events = breaker.subscribe();

        for _ in 0..3 {
            fail(&breaker).await.ok();
        }

        let change = events.try_recv().unwrap();
        assert_eq!(change.from, CircuitState::Closed);
        assert_eq!(change.to, CircuitState::Open);
        assert_eq!(change.name, "db");
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_times_are_bounded() {
        let breaker = CircuitBreaker::new("db", test_config());
        for _ in 0..150 {
            succeed(&breaker).await.unwrap();
        }
        let stats = breaker.stats();
        assert_eq!(stats.response_time_samples, RESPONSE_TIME_SAMPLES);
        assert_eq!(stats.total_calls, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_restore() {
        let source = CircuitBreaker::new("db", test_config());
        for _ in 0..3 {
            fail(&source).await.ok();
        }

        let restored = CircuitBreaker::new("db", test_config());
        restored.restore(&source.snapshot());

        assert_eq!(restored.state(), CircuitState::Open);
        assert_eq!(restored.stats().total_failures, 3);
    }
}
