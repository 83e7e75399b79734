//! Circuit breaker.
//!
//! The breaker counts consecutive failures of the operations it guards and
//! "opens" once a threshold is reached, rejecting calls without running them
//! until the break duration has passed.
//!
//! ## States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: calls are rejected with [`DispatchError::CircuitOpen`]
//! - **Half-Open**: the break has elapsed; exactly one trial call is let
//!   through while every concurrent caller is still rejected
//!
//! A successful trial closes the circuit, a failed trial opens it again for
//! another full break. Cancellation is never counted as a failure, and a
//! trial that is cancelled or dropped before finishing hands the trial slot
//! to the next caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("payments")
//!         .failure_threshold(5)
//!         .duration_of_break(Duration::from_secs(30)),
//! );
//!
//! match circuit.call(&cancellation, |token| gateway.charge(token)).await {
//!     Err(DispatchError::CircuitOpen { .. }) => { /* fail fast */ }
//!     other => other?,
//! }
//! ```

use crate::error::{DispatchError, DispatchResult};
use crate::options::CircuitBreakerOptions;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSED: u64 = 0;
const OPEN: u64 = 1;
const HALF_OPEN: u64 = 2;
const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

// State in the low bits, `opened_at` (nanos since `epoch`) above them, so a
// transition and its timestamp publish in one CAS.
fn pack(state: u64, opened_at: u64) -> u64 {
    (opened_at << STATE_BITS) | state
}

fn unpack(status: u64) -> (u64, u64) {
    (status & STATE_MASK, status >> STATE_BITS)
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Break elapsed, the next call is a trial.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging and errors).
    pub name: String,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call.
    pub duration_of_break: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_options("default", &CircuitBreakerOptions::default())
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a named configuration from options.
    pub fn from_options(name: impl Into<String>, options: &CircuitBreakerOptions) -> Self {
        Self {
            name: name.into(),
            failure_threshold: options.failure_threshold,
            duration_of_break: options.duration_of_break(),
        }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the break duration.
    pub fn duration_of_break(mut self, duration: Duration) -> Self {
        self.duration_of_break = duration;
        self
    }
}

/// Circuit breaker guarding one dependency.
///
/// Shared by every caller of that dependency; all transitions are atomic so
/// the breaker never holds a lock across the guarded call.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    status: AtomicU64,
    consecutive_failures: AtomicU32,
    epoch: Instant,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

/// How a call was let through.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            duration_of_break = ?config.duration_of_break,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            config,
            status: AtomicU64::new(pack(CLOSED, 0)),
            consecutive_failures: AtomicU32::new(0),
            epoch: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Create a named circuit breaker from options.
    pub fn from_options(name: impl Into<String>, options: &CircuitBreakerOptions) -> Arc<Self> {
        Self::new(CircuitBreakerConfig::from_options(name, options))
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, as the next caller would see it.
    pub fn state(&self) -> CircuitState {
        let (state, opened_at) = unpack(self.status.load(Ordering::Acquire));
        match state {
            CLOSED => CircuitState::Closed,
            HALF_OPEN => CircuitState::HalfOpen,
            _ if self.break_elapsed(opened_at) => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    /// Run `f` under circuit breaker protection.
    ///
    /// Rejected calls return [`DispatchError::CircuitOpen`] without invoking
    /// `f`. Failures of `f` are returned unchanged after being counted.
    pub async fn call<F, Fut, T>(&self, cancellation: &CancellationToken, f: F) -> DispatchResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let Some(admission) = self.admit() else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(
                name = %self.config.name,
                state = %self.state(),
                "Circuit breaker rejected request"
            );
            return Err(DispatchError::CircuitOpen {
                name: self.config.name.clone(),
            });
        };

        let mut permit = Permit {
            breaker: self,
            admission,
            settled: false,
        };
        let result = f(cancellation.clone()).await;
        permit.settled = true;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(error) if error.is_cancelled() => self.on_cancelled(admission),
            Err(_) => self.on_failure(admission),
        }
        result
    }

    fn admit(&self) -> Option<Admission> {
        loop {
            let current = self.status.load(Ordering::Acquire);
            match unpack(current) {
                (CLOSED, _) => return Some(Admission::Normal),
                (OPEN, opened_at) if self.break_elapsed(opened_at) => {
                    if self
                        .status
                        .compare_exchange(
                            current,
                            pack(HALF_OPEN, opened_at),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        debug!(name = %self.config.name, "Circuit breaker HALF-OPEN, admitting trial call");
                        return Some(Admission::Trial);
                    }
                    // lost the race; re-read the new state
                }
                _ => return None,
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        if admission == Admission::Trial && self.leave_half_open(CLOSED, None) {
            info!(name = %self.config.name, "Circuit breaker CLOSED");
        }
    }

    fn on_failure(&self, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        match admission {
            Admission::Trial => {
                if self.leave_half_open(OPEN, Some(self.now_nanos())) {
                    warn!(name = %self.config.name, "Circuit breaker trial failed, re-OPENED");
                }
            }
            Admission::Normal => {
                // late failures of calls admitted before the circuit opened
                // neither count nor move the break window
                if unpack(self.status.load(Ordering::Acquire)).0 != CLOSED {
                    return;
                }

                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold.max(1)
                    && self
                        .status
                        .compare_exchange(
                            pack(CLOSED, 0),
                            pack(OPEN, self.now_nanos()),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.consecutive_failures.store(0, Ordering::Release);
                    warn!(
                        name = %self.config.name,
                        failures,
                        duration_of_break = ?self.config.duration_of_break,
                        "Circuit breaker OPENED"
                    );
                }
            }
        }
    }

    fn on_cancelled(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.release_trial();
        }
    }

    /// An abandoned trial proves nothing: reopen with the original break
    /// window so the next caller becomes the trial.
    fn release_trial(&self) {
        if self.leave_half_open(OPEN, None) {
            debug!(name = %self.config.name, "Circuit breaker trial abandoned");
        }
    }

    /// Move `HALF_OPEN` to `next`, stamping `opened_at` when given and
    /// keeping the current one otherwise. False if the breaker was reset or
    /// forced meanwhile.
    fn leave_half_open(&self, next: u64, opened_at: Option<u64>) -> bool {
        let current = self.status.load(Ordering::Acquire);
        let (state, previous) = unpack(current);
        if state != HALF_OPEN {
            return false;
        }
        let stamp = match next {
            CLOSED => 0,
            _ => opened_at.unwrap_or(previous),
        };
        self.status
            .compare_exchange(current, pack(next, stamp), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn break_elapsed(&self, opened_at: u64) -> bool {
        let break_nanos = u64::try_from(self.config.duration_of_break.as_nanos()).unwrap_or(u64::MAX);
        self.now_nanos().saturating_sub(opened_at) >= break_nanos
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos())
            .unwrap_or(u64::MAX)
            .min(u64::MAX >> STATE_BITS)
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if unpack(self.status.swap(pack(CLOSED, 0), Ordering::AcqRel)).0 != CLOSED {
            info!(name = %self.config.name, "Circuit breaker CLOSED (reset)");
        }
    }

    /// Manually force the circuit open for one break duration.
    pub fn force_open(&self) {
        let previous = self.status.swap(pack(OPEN, self.now_nanos()), Ordering::AcqRel);
        if unpack(previous).0 != OPEN {
            warn!(name = %self.config.name, "Circuit breaker forced OPEN");
        }
    }

    // Metrics

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Get total calls seen.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get total successful calls.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Get total failed calls.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total rejected calls.
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            total_requests: self.total_requests(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
            current_failure_count: self.failure_count(),
        }
    }
}

/// Admission held for the duration of one guarded call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // dropped mid-flight: outer timeout, abandoned caller or panic
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("failures", &self.failure_count())
            .finish()
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Total calls.
    pub total_requests: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Current consecutive failures.
    pub current_failure_count: u32,
}

impl CircuitBreakerStats {
    /// Calculate success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }

    /// Calculate failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn breaker(threshold: u32, break_for: Duration) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            CircuitBreakerConfig::new("test")
                .failure_threshold(threshold)
                .duration_of_break(break_for),
        )
    }

    async fn fail(cb: &CircuitBreaker) -> DispatchResult<()> {
        cb.call(&CancellationToken::new(), |_| async {
            Err(DispatchError::operation("boom"))
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker) -> DispatchResult<()> {
        cb.call(&CancellationToken::new(), |_| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..3 {
            let err = fail(&cb).await.unwrap_err();
            assert!(matches!(err, DispatchError::Operation(_)));
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_rejects_without_invoking() {
        let cb = breaker(1, Duration::from_secs(30));
        let _ = fail(&cb).await;

        let invoked = AtomicUsize::new(0);
        let err = cb
            .call(&CancellationToken::new(), |_| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::CircuitOpen { ref name } if name == "test"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.total_rejections(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.failure_count(), 2);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.failure_count(), 0);

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_successful_trial_closes() {
        let cb = breaker(1, Duration::from_millis(50));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_for_full_break() {
        let cb = breaker(1, Duration::from_millis(50));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let err = fail(&cb).await.unwrap_err();
        assert!(matches!(err, DispatchError::Operation(_)));
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_single_trial_while_half_open() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .call(&CancellationToken::new(), |_| async move {
                    let _ = wait.await;
                    Ok(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = succeed(&cb).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));

        let _ = release.send(());
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_frees_trial_slot() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call(&CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        // original break already elapsed, so the next caller is the trial
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_extend_break() {
        let cb = breaker(1, Duration::from_millis(100));

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let slow_cb = cb.clone();
        let slow = tokio::spawn(async move {
            slow_cb
                .call(&CancellationToken::new(), |_| async move {
                    let _ = wait.await;
                    Err::<(), _>(DispatchError::operation("late"))
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = release.send(());
        assert!(slow.await.unwrap().is_err());
        assert_eq!(cb.failure_count(), 0);

        tokio::time::sleep(Duration::from_millis(45)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let cb = breaker(1, Duration::from_secs(30));
        let err = cb
            .call(&CancellationToken::new(), |_| async {
                Err::<(), _>(DispatchError::Cancelled)
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_and_force_open() {
        let cb = breaker(5, Duration::from_secs(30));
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        succeed(&cb).await.unwrap();

        let stats = cb.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.success_rate(), 1.0);
    }
}
