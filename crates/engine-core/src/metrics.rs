use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_input: AtomicU64,
    lines_output: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
}

/// Counters of one step copy. Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone)]
pub struct StepMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Rows taken from input RowSets.
    pub lines_read: u64,
    /// Rows put into output RowSets.
    pub lines_written: u64,
    /// Rows read from an external source.
    pub lines_input: u64,
    /// Rows written to an external sink.
    pub lines_output: u64,
    /// Rows diverted to the error hop.
    pub lines_rejected: u64,
    pub errors: u64,
}

impl StepMetrics {
    pub fn new() -> Self {
        StepMetrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_read(&self, count: u64) {
        self.inner.lines_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_written(&self, count: u64) {
        self.inner.lines_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_input(&self, count: u64) {
        self.inner.lines_input.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_output(&self, count: u64) {
        self.inner.lines_output.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self, count: u64) {
        self.inner.lines_rejected.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the new error count.
    pub fn increment_errors(&self, count: u64) -> u64 {
        self.inner.errors.fetch_add(count, Ordering::AcqRel) + count
    }

    pub fn errors(&self) -> u64 {
        self.inner.errors.load(Ordering::Acquire)
    }

    pub fn lines_read(&self) -> u64 {
        self.inner.lines_read.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_read: self.inner.lines_read.load(Ordering::Relaxed),
            lines_written: self.inner.lines_written.load(Ordering::Relaxed),
            lines_input: self.inner.lines_input.load(Ordering::Relaxed),
            lines_output: self.inner.lines_output.load(Ordering::Relaxed),
            lines_rejected: self.inner.lines_rejected.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Acquire),
        }
    }
}

impl Default for StepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_input += other.lines_input;
        self.lines_output += other.lines_output;
        self.lines_rejected += other.lines_rejected;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = StepMetrics::new();
        let other = metrics.clone();
        metrics.increment_read(3);
        other.increment_written(2);
        assert_eq!(other.increment_errors(1), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.lines_read, 3);
        assert_eq!(snap.lines_written, 2);
        assert_eq!(snap.errors, 1);

        let mut total = MetricsSnapshot::default();
        total.merge(&snap);
        total.merge(&snap);
        assert_eq!(total.lines_read, 6);
    }
}
