//! Coordinator counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by every coordinator task
#[derive(Debug, Default)]
pub struct Metrics {
    pub alerts_ingested: AtomicU64,
    pub alerts_rejected: AtomicU64,
    pub sessions_opened: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub sessions_degraded: AtomicU64,
    pub responses_attached: AtomicU64,
    pub duplicate_responses: AtomicU64,
    pub late_responses: AtomicU64,
    pub unexpected_responses: AtomicU64,
    pub malformed_messages: AtomicU64,
    pub dispatch_failures: AtomicU64,
    pub lookups_served: AtomicU64,
    pub lookups_not_found: AtomicU64,
    pub forwards: AtomicU64,
    pub forward_failures: AtomicU64,
    pub relays: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters, with the current number of resident sessions
    pub fn snapshot(&self, open_sessions: usize) -> CoordinatorMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CoordinatorMetrics {
            alerts_ingested: load(&self.alerts_ingested),
            alerts_rejected: load(&self.alerts_rejected),
            sessions_opened: load(&self.sessions_opened),
            sessions_completed: load(&self.sessions_completed),
            sessions_degraded: load(&self.sessions_degraded),
            responses_attached: load(&self.responses_attached),
            duplicate_responses: load(&self.duplicate_responses),
            late_responses: load(&self.late_responses),
            unexpected_responses: load(&self.unexpected_responses),
            malformed_messages: load(&self.malformed_messages),
            dispatch_failures: load(&self.dispatch_failures),
            lookups_served: load(&self.lookups_served),
            lookups_not_found: load(&self.lookups_not_found),
            forwards: load(&self.forwards),
            forward_failures: load(&self.forward_failures),
            relays: load(&self.relays),
            open_sessions,
        }
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    pub alerts_ingested: u64,
    pub alerts_rejected: u64,
    pub sessions_opened: u64,
    pub sessions_completed: u64,
    pub sessions_degraded: u64,
    pub responses_attached: u64,
    pub duplicate_responses: u64,
    pub late_responses: u64,
    pub unexpected_responses: u64,
    pub malformed_messages: u64,
    pub dispatch_failures: u64,
    pub lookups_served: u64,
    pub lookups_not_found: u64,
    pub forwards: u64,
    pub forward_failures: u64,
    pub relays: u64,
    pub open_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::default();
        Metrics::incr(&metrics.forwards);
        Metrics::incr(&metrics.forwards);
        Metrics::incr(&metrics.late_responses);

        let snap = metrics.snapshot(3);
        assert_eq!(snap.forwards, 2);
        assert_eq!(snap.late_responses, 1);
        assert_eq!(snap.sessions_opened, 0);
        assert_eq!(snap.open_sessions, 3);
    }
}
