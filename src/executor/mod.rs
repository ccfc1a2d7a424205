//! Executor: scheduling of virtual users over time
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. An executor
//! decides how many virtual users run at any instant, owns their lifecycle,
//! and turns the recorded metrics into a final [`Report`].
//!
//! Surge provides a built-in [`StageExecutor`] which follows a [`Plan`] of
//! [`Stage`]s: a [`RampController`] maps elapsed time to a target concurrency
//! and a tick-driven scheduler spawns or retires [`VirtualUser`]s to match it.
pub mod ramp;
pub mod stage;
pub mod vu;

pub use ramp::{Plan, RampController, RampState, Stage};
pub use stage::StageExecutor;
pub use vu::{VirtualUser, VuConfig, VuState, VuStatus};

use crate::{
    action::Action,
    report::{Report, Reporter},
    scenario::Scenario,
};

/// The runtime hook that executes a `Scenario`.
///
/// `exec` is responsible for spawning virtual users, adjusting concurrency,
/// draining users on shutdown, and handing progress and the final report to
/// `reporter`. Configuration errors must be returned before any action runs.
pub trait Executor<A: Action>: Send + Sync + Sized {
    type Error;

    /// Execute the scenario and return the final report.
    fn exec<R: Reporter>(
        &self,
        scenario: &Scenario<A>,
        reporter: &R,
    ) -> impl Future<Output = Result<Report, Self::Error>> + Send;
}
