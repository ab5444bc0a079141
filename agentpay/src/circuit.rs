//! Distributed circuit breaker.
//!
//! A three-state health gate per named service, persisted through the
//! storage abstraction so that every process sharing the backend sees the
//! same state:
//!
//! - **closed** — calls pass. Success removes one recorded failure;
//!   failure records a timestamp, and `threshold` failures inside the
//!   rolling window trip the circuit.
//! - **open** — calls are rejected with `circuit_open` until the recovery
//!   deadline passes, then the circuit moves to half-open.
//! - **half-open** — exactly one probe call is admitted. Probe success
//!   closes the circuit; probe failure re-opens it with a fresh deadline.
//!
//! All transitions run inside atomic storage mutations, so concurrent
//! processes cannot admit two probes or double-trip.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::storage::Storage;
use crate::timestamp::now_unix;

/// Health state of a gated service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    #[default]
    Closed,
    /// Failing; calls rejected until the recovery deadline.
    Open,
    /// Testing recovery with a single probe.
    HalfOpen,
}

/// Persisted circuit record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CircuitRecord {
    #[serde(default)]
    state: CircuitState,
    /// Unix seconds of failures inside the rolling window.
    #[serde(default)]
    failures: Vec<u64>,
    /// Unix seconds at which an open circuit admits a probe.
    #[serde(default)]
    recovery_at: u64,
    /// Whether a half-open probe is in flight.
    #[serde(default)]
    probing: bool,
}

/// Verdict of [`CircuitBreaker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; proceed.
    Allowed,
    /// Circuit half-open; proceed as the single recovery probe.
    Probe,
    /// Circuit open; reject without calling the service.
    Rejected {
        /// When a probe will next be admitted.
        recovery_at: u64,
    },
}

/// Three-state service health gate with time-based recovery.
#[derive(Clone)]
pub struct CircuitBreaker {
    storage: Arc<dyn Storage>,
    service: String,
    threshold: usize,
    recovery: Duration,
    window: Duration,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn parse_record(value: Option<serde_json::Value>) -> CircuitRecord {
    value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

impl CircuitBreaker {
    /// Creates a breaker with default tuning: 5 failures in a rolling 60s
    /// window trip it, recovery is probed after 30s.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, service: impl Into<String>) -> Self {
        Self::with_tuning(
            storage,
            service,
            5,
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    /// Creates a breaker with explicit tuning.
    #[must_use]
    pub fn with_tuning(
        storage: Arc<dyn Storage>,
        service: impl Into<String>,
        threshold: usize,
        recovery: Duration,
        window: Duration,
    ) -> Self {
        Self {
            storage,
            service: service.into(),
            threshold,
            recovery,
            window,
        }
    }

    /// The gated service's name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn key(&self) -> String {
        format!("circuit:{}", self.service)
    }

    async fn mutate<F>(&self, f: F) -> Result<CircuitRecord, PaymentError>
    where
        F: Fn(&mut CircuitRecord) + Send + Sync + 'static,
    {
        let out: Arc<Mutex<CircuitRecord>> = Arc::new(Mutex::new(CircuitRecord::default()));
        let out_in_mutator = Arc::clone(&out);
        self.storage
            .update(
                &self.key(),
                Box::new(move |current| {
                    let mut record = parse_record(current);
                    f(&mut record);
                    *out_in_mutator.lock().expect("circuit lock") = record.clone();
                    serde_json::to_value(record).ok()
                }),
            )
            .await?;
        let record = out.lock().expect("circuit lock").clone();
        Ok(record)
    }

    /// Reads the current state without mutating it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn state(&self) -> Result<CircuitState, PaymentError> {
        let record = parse_record(self.storage.get(&self.key()).await?);
        Ok(record.state)
    }

    /// Decides whether a call may proceed, transitioning open → half-open
    /// when the recovery deadline has passed and claiming the single probe
    /// slot atomically.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn admit(&self) -> Result<Admission, PaymentError> {
        let now = now_unix();
        let admission: Arc<Mutex<Admission>> = Arc::new(Mutex::new(Admission::Allowed));
        let admission_in_mutator = Arc::clone(&admission);

        self.mutate(move |record| {
            let verdict = match record.state {
                CircuitState::Closed => Admission::Allowed,
                CircuitState::Open => {
                    if now >= record.recovery_at {
                        record.state = CircuitState::HalfOpen;
                        record.probing = true;
                        Admission::Probe
                    } else {
                        Admission::Rejected {
                            recovery_at: record.recovery_at,
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    if record.probing {
                        Admission::Rejected {
                            recovery_at: record.recovery_at,
                        }
                    } else {
                        record.probing = true;
                        Admission::Probe
                    }
                }
            };
            *admission_in_mutator.lock().expect("circuit lock") = verdict;
        })
        .await?;

        let verdict = *admission.lock().expect("circuit lock");
        if let Admission::Rejected { recovery_at } = verdict {
            info!(service = %self.service, recovery_at, "circuit rejected call");
        }
        Ok(verdict)
    }

    /// Records the outcome of an admitted call.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn record_success(&self, admission: Admission) -> Result<(), PaymentError> {
        let service = self.service.clone();
        let was_probe = admission == Admission::Probe;
        self.mutate(move |record| {
            if was_probe || record.state == CircuitState::HalfOpen {
                info!(service = %service, "probe succeeded, circuit closed");
                *record = CircuitRecord::default();
            } else {
                // Gradual recovery: one success removes one recorded failure.
                record.failures.pop();
            }
        })
        .await?;
        Ok(())
    }

    /// Records the failure of an admitted call, tripping the circuit when
    /// the threshold is crossed inside the rolling window.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn record_failure(&self, admission: Admission) -> Result<(), PaymentError> {
        let now = now_unix();
        let window = self.window.as_secs();
        let recovery = self.recovery.as_secs();
        let threshold = self.threshold;
        let service = self.service.clone();
        let was_probe = admission == Admission::Probe;

        self.mutate(move |record| {
            if was_probe || record.state == CircuitState::HalfOpen {
                warn!(service = %service, "probe failed, circuit re-opened");
                record.state = CircuitState::Open;
                record.recovery_at = now + recovery;
                record.probing = false;
                record.failures.clear();
                return;
            }
            record.failures.push(now);
            record.failures.retain(|at| at + window > now);
            if record.failures.len() >= threshold {
                warn!(
                    service = %service,
                    failures = record.failures.len(),
                    "failure threshold crossed, circuit tripped"
                );
                record.state = CircuitState::Open;
                record.recovery_at = now + recovery;
                record.failures.clear();
            }
        })
        .await?;
        Ok(())
    }

    /// Builds the rejection error for an open circuit.
    #[must_use]
    pub fn open_error(&self, recovery_at: u64) -> PaymentError {
        PaymentError::CircuitOpen {
            service: self.service.clone(),
            recovery_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn breaker(recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::with_tuning(
            Arc::new(MemoryStorage::new()),
            "custody",
            5,
            recovery,
            Duration::from_secs(60),
        )
    }

    async fn fail_once(breaker: &CircuitBreaker) {
        let admission = breaker.admit().await.unwrap();
        breaker.record_failure(admission).await.unwrap();
    }

    #[tokio::test]
    async fn test_trips_at_threshold() {
        let breaker = breaker(Duration::from_secs(30));
        for _ in 0..4 {
            fail_once(&breaker).await;
            assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        }
        fail_once(&breaker).await;
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        // The next call is rejected without touching the service.
        assert!(matches!(
            breaker.admit().await.unwrap(),
            Admission::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_success_decrements_failure_count() {
        let breaker = breaker(Duration::from_secs(30));
        for _ in 0..4 {
            fail_once(&breaker).await;
        }
        // A success removes one failure, so the next failure stays closed.
        let admission = breaker.admit().await.unwrap();
        breaker.record_success(admission).await.unwrap();
        fail_once(&breaker).await;
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovers_through_probe() {
        let breaker = breaker(Duration::from_secs(0));
        for _ in 0..5 {
            fail_once(&breaker).await;
        }
        // Recovery deadline already passed (R = 0): one probe admitted.
        let admission = breaker.admit().await.unwrap();
        assert_eq!(admission, Admission::Probe);
        breaker.record_success(admission).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(breaker.admit().await.unwrap(), Admission::Allowed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = breaker(Duration::from_secs(0));
        for _ in 0..5 {
            fail_once(&breaker).await;
        }
        let admission = breaker.admit().await.unwrap();
        assert_eq!(admission, Admission::Probe);
        breaker.record_failure(admission).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let breaker = breaker(Duration::from_secs(0));
        for _ in 0..5 {
            fail_once(&breaker).await;
        }
        let first = breaker.admit().await.unwrap();
        assert_eq!(first, Admission::Probe);
        // While the probe is in flight, everyone else is rejected.
        assert!(matches!(
            breaker.admit().await.unwrap(),
            Admission::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_until_deadline() {
        let breaker = breaker(Duration::from_secs(3600));
        for _ in 0..5 {
            fail_once(&breaker).await;
        }
        assert!(matches!(
            breaker.admit().await.unwrap(),
            Admission::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_breakers_share_state_through_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let a = CircuitBreaker::new(Arc::clone(&storage), "custody");
        let b = CircuitBreaker::new(storage, "custody");
        for _ in 0..5 {
            let admission = a.admit().await.unwrap();
            a.record_failure(admission).await.unwrap();
        }
        assert_eq!(b.state().await.unwrap(), CircuitState::Open);
    }
}
