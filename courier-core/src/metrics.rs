//! Per-request-type dispatch metrics.

use crate::error::{DispatchError, ErrorKind};
use crate::request::RequestDescriptor;
use dashmap::DashMap;
use serde::Serialize;
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of one dispatch, as counted by [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl DispatchOutcome {
    /// Classify a dispatch result.
    pub fn of<T>(result: &Result<T, DispatchError>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) => match e.kind() {
                ErrorKind::Timeout => Self::TimedOut,
                ErrorKind::Cancelled => Self::Cancelled,
                _ => Self::Failed,
            },
        }
    }
}

#[derive(Default)]
struct RequestStats {
    request_type: &'static str,
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

/// Counters and durations keyed by request type.
#[derive(Default)]
pub struct DispatchMetrics {
    stats: DashMap<TypeId, RequestStats>,
}

impl DispatchMetrics {
    /// Create an empty metrics store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished dispatch.
    pub fn record(&self, descriptor: &RequestDescriptor, outcome: DispatchOutcome, elapsed: Duration) {
        let entry = self
            .stats
            .entry(descriptor.type_id)
            .or_insert_with(|| RequestStats {
                request_type: descriptor.type_name,
                ..Default::default()
            });

        entry.total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            DispatchOutcome::Succeeded => &entry.succeeded,
            DispatchOutcome::Failed => &entry.failed,
            DispatchOutcome::TimedOut => &entry.timed_out,
            DispatchOutcome::Cancelled => &entry.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        entry.total_micros.fetch_add(micros, Ordering::Relaxed);
        entry.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Snapshot for one request type.
    pub fn get(&self, type_id: TypeId) -> Option<RequestMetricsSnapshot> {
        self.stats.get(&type_id).map(|entry| snapshot(&entry))
    }

    /// Snapshot of every recorded request type, sorted by type name.
    pub fn snapshot(&self) -> Vec<RequestMetricsSnapshot> {
        let mut all: Vec<_> = self.stats.iter().map(|entry| snapshot(&entry)).collect();
        all.sort_by(|a, b| a.request_type.cmp(b.request_type));
        all
    }

    /// Drop all recorded metrics.
    pub fn clear(&self) {
        self.stats.clear();
    }
}

fn snapshot(stats: &RequestStats) -> RequestMetricsSnapshot {
    let total = stats.total.load(Ordering::Relaxed);
    let total_micros = stats.total_micros.load(Ordering::Relaxed);
    RequestMetricsSnapshot {
        request_type: stats.request_type,
        total,
        succeeded: stats.succeeded.load(Ordering::Relaxed),
        failed: stats.failed.load(Ordering::Relaxed),
        timed_out: stats.timed_out.load(Ordering::Relaxed),
        cancelled: stats.cancelled.load(Ordering::Relaxed),
        average_micros: if total == 0 { 0 } else { total_micros / total },
        max_micros: stats.max_micros.load(Ordering::Relaxed),
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics")
            .field("request_types", &self.stats.len())
            .finish()
    }
}

/// Point-in-time metrics for one request type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMetricsSnapshot {
    pub request_type: &'static str,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub average_micros: u64,
    pub max_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    struct Ping;
    impl Request for Ping {
        type Response = ();
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(DispatchOutcome::of(&Ok::<_, DispatchError>(())), DispatchOutcome::Succeeded);
        assert_eq!(
            DispatchOutcome::of::<()>(&Err(DispatchError::timeout("Ping", Duration::from_secs(1)))),
            DispatchOutcome::TimedOut
        );
        assert_eq!(
            DispatchOutcome::of::<()>(&Err(DispatchError::Cancelled)),
            DispatchOutcome::Cancelled
        );
        assert_eq!(
            DispatchOutcome::of::<()>(&Err(DispatchError::operation("boom"))),
            DispatchOutcome::Failed
        );
    }

    #[test]
    fn test_record_and_snapshot() {
        let metrics = DispatchMetrics::new();
        let ping = RequestDescriptor::of::<Ping>();

        metrics.record(&ping, DispatchOutcome::Succeeded, Duration::from_millis(2));
        metrics.record(&ping, DispatchOutcome::Failed, Duration::from_millis(4));
        metrics.record(&ping, DispatchOutcome::TimedOut, Duration::from_millis(6));

        let snapshot = metrics.get(TypeId::of::<Ping>()).unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.average_micros, 4_000);
        assert_eq!(snapshot.max_micros, 6_000);
        assert_eq!(metrics.snapshot().len(), 1);

        metrics.clear();
        assert!(metrics.snapshot().is_empty());
    }
}
