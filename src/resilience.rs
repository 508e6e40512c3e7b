//! Per-provider failure-recovery guards: circuit breaker + bounded retry.
//!
//! Each provider handle in a chain owns exactly one `ProviderGuard`; breaker
//! state is never shared across providers. Call deadlines are the caller's
//! job (the command bus wraps each attempt in a timeout).

use crate::config::ResilienceSettings;
use std::future::Future;
use std::time::{Duration, Instant};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CircuitState {
    #[strum(serialize = "closed")]
    Closed,
    #[strum(serialize = "open")]
    Open,
    #[strum(serialize = "half_open")]
    HalfOpen,
}

/// Circuit breaker protecting one provider.
///
/// - Closed: calls pass through.
/// - Open: calls are rejected until the recovery timeout elapses.
/// - HalfOpen: one probe call is allowed; success closes, failure re-opens.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    failure_count: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            failure_count: 0,
            last_failure: None,
            state: CircuitState::Closed,
        }
    }

    /// Whether calls should be rejected right now. An open breaker whose
    /// recovery timeout has elapsed transitions to half-open and lets one
    /// probe through.
    pub fn is_open(&mut self) -> bool {
        if self.state == CircuitState::Open {
            if let Some(last) = self.last_failure {
                if last.elapsed() > self.recovery_timeout {
                    log::info!(
                        "🔄 Circuit breaker: open → half_open ({}s recovery timeout elapsed)",
                        self.recovery_timeout.as_secs()
                    );
                    self.state = CircuitState::HalfOpen;
                    self.failure_count = 0;
                    return false;
                }
            }
            return true;
        }
        false
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        // A half-open probe failure re-opens immediately.
        if self.state == CircuitState::HalfOpen || self.failure_count >= self.failure_threshold {
            log::warn!(
                "⚠️ Circuit breaker: {} → open ({} consecutive failures)",
                self.state,
                self.failure_count
            );
            self.state = CircuitState::Open;
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            log::info!("✅ Circuit breaker: half_open → closed (probe succeeded)");
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
        }
    }

    /// Run `operation`, retrying on failure with growing delays. The final
    /// failure is propagated once retries are exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.initial_delay;
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "⚠️ Attempt {}/{} failed: {} (retrying in {:.1}s)",
                        attempt,
                        attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.backoff_factor)
                            .min(self.max_delay.as_secs_f64()),
                    );
                }
                Err(e) => {
                    log::warn!("❌ All {} attempts exhausted: {}", attempts, e);
                    return Err(e);
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}

/// Composition of breaker and retry policy guarding one provider.
#[derive(Debug)]
pub struct ProviderGuard {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

/// Error produced by a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E: std::fmt::Display> {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("{0}")]
    Operation(E),
}

impl ProviderGuard {
    pub fn new(settings: &ResilienceSettings) -> Self {
        Self {
            breaker: CircuitBreaker::new(settings.failure_threshold, settings.recovery_timeout),
            retry: RetryPolicy::new(
                settings.max_retries,
                settings.initial_delay,
                settings.max_delay,
                settings.backoff_factor,
            ),
        }
    }

    /// Guard one unit of work: short-circuit when the breaker is open,
    /// otherwise retry transient failures, then record the outcome.
    pub async fn guard<T, E, F, Fut>(&mut self, operation: F) -> Result<T, GuardError<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.breaker.is_open() {
            return Err(GuardError::CircuitOpen);
        }

        match self.retry.run(operation).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(GuardError::Operation(e))
            }
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Report a success observed outside `guard` (e.g. a stream that
    /// completed cleanly after the guarded call returned it).
    pub fn record_success(&mut self) {
        self.breaker.record_success();
    }

    /// Report a failure observed outside `guard`.
    pub fn record_failure(&mut self) {
        self.breaker.record_failure();
    }
}
