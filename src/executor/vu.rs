//! Virtual user runner: one logical user's action loop.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    action::Action,
    error::ActionError,
    metric::{FailureKind, MetricsRecord, Outcome},
    sink::MetricsSink,
};

/// Lifecycle of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl VuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Lifecycle state shared between a virtual user and the scheduler.
#[derive(Debug, Clone)]
pub struct VuStatus(Arc<AtomicU8>);

impl VuStatus {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(VuState::Starting as u8)))
    }

    pub fn get(&self) -> VuState {
        VuState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Starting -> Running. A user retired before it got to run stays Stopping.
    fn start(&self) {
        let _ = self.0.compare_exchange(
            VuState::Starting as u8,
            VuState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Starting/Running -> Stopping. A stopped user stays stopped.
    pub(crate) fn retire(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < VuState::Stopping as u8).then_some(VuState::Stopping as u8)
            });
    }

    fn stop(&self) {
        self.0.store(VuState::Stopped as u8, Ordering::Release);
    }
}

impl Default for VuStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user behaviour knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VuConfig {
    /// Upper bound for a single action. Exceeding it fails that action with
    /// `Timeout` but the user keeps going.
    pub action_timeout: Option<Duration>,
    /// Pause between two actions of the same user.
    pub think_time: Option<Duration>,
}

/// State shared by every virtual user of a run.
pub struct ExecutionContext<A> {
    /// Instant the run started; record timestamps are relative to it.
    pub start: Instant,
    pub action: Arc<A>,
    pub sink: Arc<MetricsSink>,
    pub config: VuConfig,
    /// Fired once the grace timeout has expired. Drops in-flight actions.
    pub kill: CancellationToken,
}

/// One simulated client repeatedly performing the scenario's action.
pub struct VirtualUser<A> {
    pub id: u64,
    ctx: Arc<ExecutionContext<A>>,
    stop: CancellationToken,
    status: VuStatus,
}

impl<A: Action> VirtualUser<A> {
    pub fn new(
        id: u64,
        ctx: Arc<ExecutionContext<A>>,
        stop: CancellationToken,
        status: VuStatus,
    ) -> Self {
        Self {
            id,
            ctx,
            stop,
            status,
        }
    }

    /// Run the action loop until the stop token is cancelled.
    ///
    /// The stop signal is only observed between actions (and during think
    /// time), never mid-action. Only the kill signal interrupts an action;
    /// the dropped action is then recorded as `Failure(Timeout)`.
    pub async fn run(self) {
        let Self {
            id,
            ctx,
            stop,
            status,
        } = self;
        status.start();
        tracing::debug!("Virtual user {id} started.");

        while !stop.is_cancelled() {
            let started = Instant::now();
            let timestamp = started.duration_since(ctx.start);

            let outcome = tokio::select! {
                biased;
                outcome = perform(&*ctx.action, ctx.config.action_timeout) => Some(outcome),
                _ = ctx.kill.cancelled() => None,
            };

            let record = MetricsRecord::new(
                timestamp,
                started.elapsed(),
                outcome.unwrap_or(Outcome::Failure(FailureKind::Timeout)),
            );
            ctx.sink.record(id, &record);

            if outcome.is_none() {
                tracing::debug!("Virtual user {id} killed mid-action.");
                break;
            }

            match ctx.config.think_time.filter(|t| !t.is_zero()) {
                Some(think) => {
                    let stopped = tokio::select! {
                        _ = tokio::time::sleep(think) => false,
                        _ = stop.cancelled() => true,
                    };
                    if stopped {
                        break;
                    }
                }
                // Actions that never suspend would otherwise starve the scheduler.
                None => tokio::task::yield_now().await,
            }
        }

        status.stop();
        tracing::debug!("Virtual user {id} stopped.");
    }
}

/// Execute the action once, bounded by `timeout`, and classify the result.
pub async fn perform<A: Action>(action: &A, timeout: Option<Duration>) -> Outcome {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, action.execute())
            .await
            .unwrap_or(Err(ActionError::Timeout)),
        None => action.execute().await,
    };

    match result {
        Ok(()) => Outcome::Success,
        Err(e) => {
            tracing::trace!("Action failed: {e}");
            Outcome::Failure(e.kind())
        }
    }
}
