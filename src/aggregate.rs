use hdrhistogram::Histogram;
use std::{collections::BTreeMap, time::Duration};

use crate::metric::{FailureKind, MetricsRecord, Outcome};

/// Significant figures kept by the latency histogram.
const SIGFIGS: u8 = 3;

/// Highest latency the histogram tracks, in microseconds (one hour).
/// Anything slower is recorded as this value.
const MAX_LATENCY_MICROS: u64 = 3_600_000_000;

/// `LatencyAggregate` folds [`MetricsRecord`]s into a compact, mergeable
/// representation that preserves what later analysis needs.
///
/// **Important:** the aggregate does **not** compute final statistics such as
/// error rates or percentiles. Those belong to [`crate::report::Summary`], which
/// is derived from an aggregate. The aggregate only stores raw counters and a
/// latency histogram so that several aggregates (one per sink shard) can be
/// merged without losing information.
///
/// # Memory vs accuracy
///
/// Latencies are recorded in microseconds into a [`hdrhistogram::Histogram`]
/// tracking 1µs to 1h with 3 significant figures, so any reported percentile
/// is within 0.1% of the true value. Slower samples are clamped to 1h.
///
/// # Implementor notes
///
/// `merge` is associative and commutative: shards are merged in arbitrary order.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyAggregate {
    latency: Histogram<u64>,
    total_latency: Duration,
    successes: u64,
    failures: BTreeMap<FailureKind, u64>,
}

impl LatencyAggregate {
    /// Create a new, empty aggregate.
    pub fn new() -> Self {
        Self {
            latency: Histogram::new_with_bounds(1, MAX_LATENCY_MICROS, SIGFIGS)
                .expect("1µs..1h at 3 sigfigs is always valid"),
            total_latency: Duration::ZERO,
            successes: 0,
            failures: BTreeMap::new(),
        }
    }

    /// Incorporate a single record.
    pub fn consume(&mut self, record: &MetricsRecord) {
        let micros = u64::try_from(record.duration.as_micros()).unwrap_or(u64::MAX);
        self.latency.saturating_record(micros);
        self.total_latency = self.total_latency.saturating_add(record.duration);
        match record.outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure(kind) => *self.failures.entry(kind).or_default() += 1,
        }
    }

    /// Incorporate several records, in order.
    pub fn aggregate(&mut self, records: &[MetricsRecord]) {
        records.iter().for_each(|r| self.consume(r));
    }

    /// Combine another aggregate into this one.
    pub fn merge(&mut self, other: &Self) {
        if let Err(e) = self.latency.add(&other.latency) {
            // Every aggregate shares the same bounds, so this is not expected.
            tracing::warn!("Dropping latency samples while merging aggregates: {e}");
        }
        self.total_latency = self.total_latency.saturating_add(other.total_latency);
        self.successes += other.successes;
        for (kind, n) in &other.failures {
            *self.failures.entry(*kind).or_default() += n;
        }
    }

    pub fn count(&self) -> u64 {
        self.successes + self.failure_count()
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn total_latency(&self) -> Duration {
        self.total_latency
    }

    /// Latency histogram, in microseconds.
    pub fn histogram(&self) -> &Histogram<u64> {
        &self.latency
    }
}

impl Default for LatencyAggregate {
    fn default() -> Self {
        Self::new()
    }
}
