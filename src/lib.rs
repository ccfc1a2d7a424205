//! Surge: a small load-testing harness for Rust.
//!
//! Surge drives a population of virtual users through a sequence of ramp
//! stages. Each virtual user repeatedly performs an [`Action`] and records
//! its latency and outcome; the harness reports throughput, error rate, and
//! latency percentiles while the run is in progress and once it ends.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: a named [`Action`] to execute.
//! - [`Executor`]: responsible for actually running the scenario. The built-in
//!   [`StageExecutor`] follows a [`Plan`] of [`Stage`]s, spawning and retiring
//!   virtual users every tick so the live population tracks the
//!   [`RampController`]'s target.
//! - [`MetricsSink`]: a sharded, thread-safe collector every virtual user
//!   writes its [`MetricsRecord`]s into.
//! - [`Report`]: the final summary of a run (throughput, error rate, p50/p95/p99).
//! - [`Reporter`]: consumes progress updates and `Report`s and sends them
//!   somewhere (stdout, JSON lines, `tracing`).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use surge::{Plan, Scenario, Stage, StageExecutor, error::ActionError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plan = Plan::new(vec![
//!         Stage::new(Duration::from_secs(30), 50),
//!         Stage::new(Duration::from_secs(60), 100),
//!     ])?;
//!     let executor = StageExecutor::builder().plan(plan).build();
//!
//!     let scenario = Scenario::new("sleep", || async {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!         Ok::<(), ActionError>(())
//!     });
//!     let report = scenario.run(&executor, &surge::StdoutReporter).await?;
//!     println!("p95 = {:?}", report.summary.latency.p95);
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//! - `builtins` (default): the reqwest-based [`HttpAction`], the built-in
//!   reporters and plan file loading into an HTTP action
//! - `internals`: enable access to internal (and unstable) building blocks such as the virtual user pool

/// Units of work performed by virtual users
pub mod action;
/// Latency and outcome aggregation
pub mod aggregate;
/// Plan files
pub mod config;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
/// Single metric records
pub mod metric;
/// Reports and Reporters
pub mod report;
/// Glues an action to an executor
pub mod scenario;
/// Thread-safe metrics collection
pub mod sink;

pub use action::Action;
#[cfg(feature = "builtins")]
pub use action::HttpAction;
pub use aggregate::LatencyAggregate;
pub use config::LoadTestConfig;
pub use error::{ActionError, ConfigError, DrainTimeoutError, Error};
pub use executor::{Executor, Plan, RampController, Stage, StageExecutor};
pub use metric::{FailureKind, MetricsRecord, Outcome};
pub use report::{Progress, Report, Reporter, Summary};
#[cfg(feature = "builtins")]
pub use report::{JsonReporter, StdoutReporter, TracingReporter};
pub use scenario::Scenario;
pub use sink::MetricsSink;
