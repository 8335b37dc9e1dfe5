use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters collected while a dispatch run is in progress
#[derive(Default)]
pub struct DispatchStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
    pub timed_out: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A timed-out task is also a failed task.
    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.inc_failed();
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn summary(&self, elapsed: Duration) -> DispatchSummary {
        DispatchSummary {
            submitted: self.submitted(),
            completed: self.completed(),
            failed: self.failed(),
            rejected: self.rejected(),
            timed_out: self.timed_out(),
            elapsed,
        }
    }
}

/// Snapshot of a finished dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub elapsed: Duration,
}

impl DispatchSummary {
    /// Items that went through the pipeline, whatever their outcome
    pub fn total(&self) -> u64 {
        self.submitted + self.rejected
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.rejected == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = DispatchStats::new();
        assert_eq!(stats.submitted(), 0);
        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.rejected(), 0);
        assert_eq!(stats.timed_out(), 0);
    }

    #[test]
    fn timed_out_counts_as_failed() {
        let stats = DispatchStats::new();
        stats.inc_failed();
        stats.inc_timed_out();
        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.timed_out(), 1);
    }

    #[test]
    fn summary_captures_state() {
        let stats = DispatchStats::new();
        stats.inc_submitted();
        stats.inc_submitted();
        stats.inc_submitted();
        stats.inc_completed();
        stats.inc_completed();
        stats.inc_failed();
        stats.inc_rejected();

        let summary = stats.summary(Duration::from_millis(42));
        assert_eq!(summary.submitted, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.elapsed, Duration::from_millis(42));
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn clean_run_succeeds() {
        let stats = DispatchStats::new();
        stats.inc_submitted();
        stats.inc_completed();
        assert!(stats.summary(Duration::ZERO).all_succeeded());
    }
}
