use parking_lot::Mutex;

use crate::{aggregate::LatencyAggregate, metric::MetricsRecord, report::Summary};

/// Thread-safe accumulator of [`MetricsRecord`]s written by many virtual users.
///
/// The sink is split into independent shards, each an aggregate behind its own
/// lock. A writer only contends with the other writers of its shard, and only
/// for the time it takes to fold one record in. [`MetricsSink::snapshot`]
/// visits the shards one at a time and merges them into a fresh aggregate, so
/// it never holds more than one shard lock at once.
#[derive(Debug)]
pub struct MetricsSink {
    shards: Vec<Mutex<LatencyAggregate>>,
}

impl MetricsSink {
    /// Create a sink with `shards` shards (at least one).
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(LatencyAggregate::new()))
                .collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Record an outcome on behalf of the writer identified by `writer`.
    ///
    /// Records of the same writer always land in the same shard.
    pub fn record(&self, writer: u64, record: &MetricsRecord) {
        let shard = (writer % self.shards.len() as u64) as usize;
        self.shards[shard].lock().consume(record);
    }

    /// Merge every shard into a single aggregate.
    pub fn aggregate(&self) -> LatencyAggregate {
        let mut merged = LatencyAggregate::new();
        for shard in &self.shards {
            merged.merge(&shard.lock());
        }
        merged
    }

    /// Point-in-time summary of everything recorded so far.
    pub fn snapshot(&self) -> Summary {
        Summary::from(&self.aggregate())
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new(num_cpus::get() * 4)
    }
}
