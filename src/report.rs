use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

use crate::{aggregate::LatencyAggregate, error::ReportError, metric::FailureKind};

/// Failure counts broken down by [`FailureKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub network_error: u64,
    pub timeout: u64,
    pub protocol_error: u64,
}

impl FailureCounts {
    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::NetworkError => self.network_error,
            FailureKind::Timeout => self.timeout,
            FailureKind::ProtocolError => self.protocol_error,
        }
    }

    pub fn total(&self) -> u64 {
        self.network_error + self.timeout + self.protocol_error
    }
}

/// Latency distribution of every recorded action, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// A [`Summary`] is the processed form of a [`LatencyAggregate`].
///
/// Summaries are pure data: deriving one performs no I/O, and deriving twice
/// from the same aggregate yields identical values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: u64,
    pub successes: u64,
    pub failures: FailureCounts,
    /// Fraction of failed actions, in `0.0..=1.0`.
    pub error_rate: f64,
    pub latency: LatencySummary,
}

impl From<&LatencyAggregate> for Summary {
    fn from(agg: &LatencyAggregate) -> Self {
        let total = agg.count();
        if total == 0 {
            return Self::default();
        }

        let hist = agg.histogram();
        let quantile = |q: f64| Duration::from_micros(hist.value_at_quantile(q));
        Self {
            total,
            successes: agg.successes(),
            failures: FailureCounts {
                network_error: agg.failures(FailureKind::NetworkError),
                timeout: agg.failures(FailureKind::Timeout),
                protocol_error: agg.failures(FailureKind::ProtocolError),
            },
            error_rate: agg.failure_count() as f64 / total as f64,
            latency: LatencySummary {
                min: Duration::from_micros(hist.min()),
                mean: agg.total_latency().div_f64(total as f64),
                p50: quantile(0.50),
                p95: quantile(0.95),
                p99: quantile(0.99),
                max: Duration::from_micros(hist.max()),
            },
        }
    }
}

impl From<LatencyAggregate> for Summary {
    fn from(agg: LatencyAggregate) -> Self {
        Self::from(&agg)
    }
}

/// Periodic snapshot emitted by the executor after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub elapsed: Duration,
    /// Zero-based index of the current stage.
    pub stage: usize,
    pub stages: usize,
    /// Concurrency requested by the ramp at `elapsed`.
    pub target: u64,
    /// Virtual users currently running their action loop.
    pub live_vus: u64,
    /// Retired virtual users still finishing their in-flight action.
    pub stopping_vus: u64,
    pub summary: Summary,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub scenario: String,
    pub elapsed: Duration,
    /// Completed actions per second over the whole run.
    pub throughput: f64,
    pub peak_vus: u64,
    pub spawned_vus: u64,
    /// Virtual users force-terminated after the grace timeout.
    pub drain_timeouts: u64,
    /// The run was stopped by an external interrupt rather than by the plan.
    pub interrupted: bool,
    pub summary: Summary,
}

impl Report {
    pub(crate) fn throughput(total: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 { total as f64 / secs } else { 0.0 }
    }
}

/// A [`Reporter`] receives progress snapshots and the final [`Report`] and
/// performs side effects: displaying them, sending them to a service, or
/// persisting them somewhere.
///
/// Reporters are the I/O boundary of the harness. Formatting is entirely their
/// responsibility. A failing reporter is logged by the executor and never
/// aborts a run.
///
/// # Example
/// ```rust
/// use surge::{Reporter, error::ReportError, report::Report};
///
/// struct Quiet;
///
/// impl Reporter for Quiet {
///     async fn report(&self, report: &Report) -> Result<(), ReportError> {
///         println!("{} actions", report.summary.total);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter: Send + Sync {
    /// Called after every scheduler tick. Does nothing by default.
    fn progress(&self, progress: &Progress) -> impl Future<Output = Result<(), ReportError>> + Send {
        let _ = progress;
        async { Ok(()) }
    }

    /// Called once with the final report.
    fn report(&self, report: &Report) -> impl Future<Output = Result<(), ReportError>> + Send;
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;

    /// Prints a one-line progress update per tick and the full report on exit.
    pub struct StdoutReporter;

    impl Reporter for StdoutReporter {
        async fn progress(&self, p: &Progress) -> Result<(), ReportError> {
            println!(
                "[{:>6.1}s] stage {}/{} target={} vus={} stopping={} reqs={} errors={:.2}% p95={:?}",
                p.elapsed.as_secs_f64(),
                p.stage + 1,
                p.stages,
                p.target,
                p.live_vus,
                p.stopping_vus,
                p.summary.total,
                p.summary.error_rate * 100.0,
                p.summary.latency.p95,
            );
            Ok(())
        }

        async fn report(&self, report: &Report) -> Result<(), ReportError> {
            println!("{report:#?}");
            Ok(())
        }
    }

    #[derive(Serialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Event<'a> {
        Progress(&'a Progress),
        Report(&'a Report),
    }

    /// Writes one JSON object per line, tagged with `"type": "progress"` or
    /// `"type": "report"`.
    pub struct JsonReporter<W> {
        out: Mutex<W>,
    }

    impl<W: Write + Send> JsonReporter<W> {
        pub fn new(out: W) -> Self {
            Self {
                out: Mutex::new(out),
            }
        }

        pub fn into_inner(self) -> W {
            self.out.into_inner()
        }

        fn write(&self, event: &Event<'_>) -> Result<(), ReportError> {
            let line = serde_json::to_string(event)?;
            let mut out = self.out.lock();
            writeln!(out, "{line}")?;
            out.flush()?;
            Ok(())
        }
    }

    impl JsonReporter<std::io::Stdout> {
        pub fn stdout() -> Self {
            Self::new(std::io::stdout())
        }
    }

    impl<W: Write + Send> Reporter for JsonReporter<W> {
        async fn progress(&self, progress: &Progress) -> Result<(), ReportError> {
            self.write(&Event::Progress(progress))
        }

        async fn report(&self, report: &Report) -> Result<(), ReportError> {
            self.write(&Event::Report(report))
        }
    }

    /// Emits progress and the final report as `tracing` events.
    pub struct TracingReporter;

    impl Reporter for TracingReporter {
        async fn progress(&self, p: &Progress) -> Result<(), ReportError> {
            tracing::info!(
                elapsed = ?p.elapsed,
                stage = p.stage,
                target = p.target,
                live_vus = p.live_vus,
                stopping_vus = p.stopping_vus,
                total = p.summary.total,
                error_rate = p.summary.error_rate,
                "progress"
            );
            Ok(())
        }

        async fn report(&self, r: &Report) -> Result<(), ReportError> {
            tracing::info!(
                scenario = %r.scenario,
                elapsed = ?r.elapsed,
                total = r.summary.total,
                throughput = r.throughput,
                error_rate = r.summary.error_rate,
                p50 = ?r.summary.latency.p50,
                p95 = ?r.summary.latency.p95,
                p99 = ?r.summary.latency.p99,
                drain_timeouts = r.drain_timeouts,
                "run finished"
            );
            Ok(())
        }
    }
}
