//! Circuit Breaker
//!
//! Guards calls to a network-backed companion store (e.g. a remote vector
//! index). After `failure_threshold` consecutive failures the circuit opens
//! and calls fail fast. Once `cooldown` has elapsed a single trial call is let
//! through; its outcome closes or re-opens the circuit.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
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
}

/// Failure of a guarded call
#[derive(Error, Debug)]
pub enum CircuitError<E> {
    /// Rejected without running the operation
    #[error("circuit {0} is open")]
    Open(String),

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `operation` unless the circuit rejects it.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            trial,
            settled: false,
        };
        let outcome = operation().await;
        guard.settled = true;
        match outcome {
            Ok(value) => {
                self.on_success(trial);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(trial);
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Admit a call; `Ok(true)` marks the half-open trial.
    fn admit<E>(&self) -> Result<bool, CircuitError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if !cooled {
                    return Err(CircuitError::Open(self.name.clone()));
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!("[CircuitBreaker] {} half-open, probing", self.name);
                Ok(true)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitError::Open(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            tracing::info!("[CircuitBreaker] {} closed", self.name);
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        let trip = trial || inner.consecutive_failures >= self.config.failure_threshold;
        if trial {
            inner.trial_in_flight = false;
        }
        if trip && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                "[CircuitBreaker] {} opened after {} consecutive failures",
                self.name,
                inner.consecutive_failures
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Settles a call that was dropped before completing. A cancelled half-open
/// trial counts as a failure so the circuit re-opens instead of staying
/// half-open with the trial slot taken.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            tracing::warn!(
                "[CircuitBreaker] {} trial call cancelled",
                self.breaker.name
            );
            self.breaker.on_failure(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "remote-vectors",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u8, CircuitError<&'static str>> {
        b.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let b = breaker(2, 60_000);
        assert!(matches!(fail(&b).await, Err(CircuitError::Inner("boom"))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        let mut ran = false;
        let result = b
            .call(|| {
                ran = true;
                async { Ok::<_, &'static str>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open(_))));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(2, 60_000);
        let _ = fail(&b).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let b = breaker(1, 10);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_reopens_on_failure() {
        let b = breaker(3, 10);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(fail(&b).await, Err(CircuitError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(succeed(&b).await, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn test_half_open_rejects_concurrent_calls() {
        let b = breaker(1, 10);
        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = b.call(|| async move {
            let _ = wait.await;
            Ok::<_, &'static str>(1u8)
        });
        tokio::pin!(trial);

        // Drive the trial until it is parked on the channel
        assert!(futures_poll_once(trial.as_mut()).await.is_none());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(matches!(succeed(&b).await, Err(CircuitError::Open(_))));

        release.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_trial_reopens_circuit() {
        let b = breaker(1, 10);
        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(5),
            b.call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &'static str>(0u8)
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    async fn futures_poll_once<F: Future + Unpin>(fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = tokio::task::yield_now() => None,
        }
    }
}
