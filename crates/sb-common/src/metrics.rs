//! Per-tier execution-time metrics.
//!
//! Samples go into a pre-allocated ring buffer so recording never allocates
//! on the dispatch path; percentiles are computed on demand from a copy.

use serde::Serialize;
use std::time::Duration;

/// Execution-time statistics for one tier.
#[derive(Debug)]
pub struct TierMetrics {
    samples: Box<[u64]>,
    write_pos: usize,
    sample_count: usize,
    invocations: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    overrun_count: u64,
    budget_ns: u64,
}

impl TierMetrics {
    /// Create a collector retaining `histogram_size` samples.
    ///
    /// An invocation taking `budget` or longer counts as an overrun.
    #[must_use]
    pub fn new(histogram_size: usize, budget: Duration) -> Self {
        Self {
            samples: vec![0u64; histogram_size.max(1)].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            invocations: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            budget_ns: duration_ns(budget),
        }
    }

    /// Record one invocation.
    pub fn record(&mut self, elapsed: Duration) {
        let ns = duration_ns(elapsed);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = (self.sample_count + 1).min(self.samples.len());

        self.invocations += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns >= self.budget_ns {
            self.overrun_count += 1;
        }
    }

    /// Number of recorded invocations.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Shortest recorded invocation.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.invocations > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Longest recorded invocation.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.invocations > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean invocation time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.invocations > 0).then(|| Duration::from_nanos(self.sum_ns / self.invocations))
    }

    /// Invocations that reached or exceeded the budget.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Percentile (0-100) over the retained samples.
    ///
    /// Returns `None` without samples or for an out-of-range percentile.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let any = self.invocations > 0;
        MetricsSnapshot {
            invocations: self.invocations,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.invocations),
            p99_ns: self.percentile(99.0).map(duration_ns),
            overrun_count: self.overrun_count,
            budget_ns: self.budget_ns,
        }
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Recorded invocations.
    pub invocations: u64,
    /// Shortest invocation in nanoseconds.
    pub min_ns: Option<u64>,
    /// Longest invocation in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean invocation in nanoseconds.
    pub mean_ns: Option<u64>,
    /// 99th percentile in nanoseconds.
    pub p99_ns: Option<u64>,
    /// Invocations at or over budget.
    pub overrun_count: u64,
    /// Tier budget in nanoseconds.
    pub budget_ns: u64,
}

impl MetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        Some(self.max_ns? - self.min_ns?)
    }

    /// Worst-case budget headroom in nanoseconds (negative after an overrun).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn headroom_ns(&self) -> Option<i64> {
        self.max_ns.map(|max| self.budget_ns as i64 - max as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_recording() {
        let mut metrics = TierMetrics::new(16, Duration::from_millis(1));
        assert!(metrics.min().is_none());

        metrics.record(Duration::from_micros(50));
        metrics.record(Duration::from_micros(70));
        metrics.record(Duration::from_micros(60));

        assert_eq!(metrics.invocations(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_micros(50)));
        assert_eq!(metrics.max(), Some(Duration::from_micros(70)));
        assert_eq!(metrics.mean(), Some(Duration::from_micros(60)));
    }

    #[test]
    fn test_budget_boundary_is_overrun() {
        let mut metrics = TierMetrics::new(16, Duration::from_millis(1));

        metrics.record(Duration::from_micros(999));
        assert_eq!(metrics.overrun_count(), 0);

        metrics.record(Duration::from_millis(1));
        assert_eq!(metrics.overrun_count(), 1);
    }

    #[test]
    fn test_percentiles() {
        let mut metrics = TierMetrics::new(100, Duration::from_millis(1));
        for i in 1..=100 {
            metrics.record(Duration::from_micros(i));
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!((49..=51).contains(&p50.as_micros()));
        assert!(metrics.percentile(-1.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut metrics = TierMetrics::new(4, Duration::from_millis(1));
        for i in 0..10 {
            metrics.record(Duration::from_micros(i));
        }
        assert_eq!(metrics.invocations(), 10);
        // Only the last four samples (6..=9) are retained
        assert_eq!(metrics.percentile(0.0), Some(Duration::from_micros(6)));
    }

    #[test]
    fn test_snapshot() {
        let mut metrics = TierMetrics::new(16, Duration::from_millis(10));
        metrics.record(Duration::from_millis(2));
        metrics.record(Duration::from_millis(4));

        let snap = metrics.snapshot();
        assert_eq!(snap.invocations, 2);
        assert_eq!(snap.jitter_ns(), Some(2_000_000));
        assert_eq!(snap.headroom_ns(), Some(6_000_000));
    }
}
