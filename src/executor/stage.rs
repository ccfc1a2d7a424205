use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{
    Executor,
    ramp::{Plan, RampController},
    vu::{ExecutionContext, VirtualUser, VuConfig, VuStatus},
};
use crate::{
    action::Action,
    error::{ConfigError, DrainTimeoutError, Error},
    report::{Progress, Report, Reporter},
    scenario::Scenario,
    sink::MetricsSink,
};
/// Executor that follows a [`Plan`] of ramp stages with a pool of virtual users.
///
/// - Every `tick` the scheduler asks the [`RampController`] for the target
///   concurrency and spawns or retires virtual users to match it.
/// - Users are retired newest first, and only between two actions.
/// - When the plan finishes (or `interrupt` is cancelled) every user is asked
///   to stop. Users still busy after `grace_timeout` are force-terminated and
///   their in-flight action is recorded as a timeout.
///
/// # Tuning Knobs
///
/// - `tick`: how often the population is adjusted. With a 1s tick the live
///   population lags the ramp curve by at most one second.
/// - `shards`: number of metrics sink shards. More shards mean less lock
///   contention between users; the default is `num_cpus * 4`.
#[derive(TypedBuilder)]
pub struct StageExecutor {
    /// The sequence of concurrency stages to execute.
    pub plan: Plan,
    /// Interval between two population adjustments.
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,
    /// How long stopping users may take to finish their in-flight action.
    #[builder(default = Duration::from_secs(30))]
    pub grace_timeout: Duration,
    /// Upper bound for a single action.
    #[builder(default)]
    pub action_timeout: Option<Duration>,
    /// Pause between two actions of the same user.
    #[builder(default)]
    pub think_time: Option<Duration>,
    #[builder(default = num_cpus::get() * 4)]
    pub shards: usize,
    /// Cancel to stop the run early. The run still drains and reports.
    #[builder(default)]
    pub interrupt: CancellationToken,
}

impl<A: Action> Executor<A> for StageExecutor {
    type Error = Error;

    async fn exec<R: Reporter>(&self, scenario: &Scenario<A>, reporter: &R) -> Result<Report, Error> {
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick.into());
        }

        let ramp = RampController::new(self.plan.clone());
        let stages = self.plan.stages().len();
        let sink = Arc::new(MetricsSink::new(self.shards));
        let start = Instant::now();
        let mut pool = VuPool::new(Arc::new(ExecutionContext {
            start,
            action: scenario.action.clone(),
            sink: sink.clone(),
            config: VuConfig {
                action_timeout: self.action_timeout,
                think_time: self.think_time,
            },
            kill: CancellationToken::new(),
        }));

        let mut ticker = tokio::time::interval_at(start, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current_stage = None;

        tracing::info!("Running scenario: {}!", scenario.name);
        let interrupted = loop {
            let tick = tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => None,
                at = ticker.tick() => Some(at),
            };
            let Some(at) = tick else {
                tracing::warn!("Run interrupted, stopping virtual users...");
                break true;
            };

            // Sample the ramp at the scheduled tick so late wakeups do not skew it.
            let state = ramp.state_at(at.duration_since(start));
            if state.finished {
                tracing::info!("All {stages} stages finished.");
                break false;
            }
            if current_stage != Some(state.stage) {
                tracing::info!("Starting stage: {}/{stages}", state.stage + 1);
                current_stage = Some(state.stage);
            }

            pool.reap();
            pool.scale_to(state.target);

            let progress = Progress {
                elapsed: state.elapsed,
                stage: state.stage,
                stages,
                target: state.target,
                live_vus: pool.live(),
                stopping_vus: pool.stopping(),
                summary: sink.snapshot(),
            };
            if let Err(e) = reporter.progress(&progress).await {
                tracing::warn!("Failed to report progress: {e}");
            }
        };

        let drain_timeouts = pool.shutdown(self.grace_timeout).await;
        let elapsed = start.elapsed();
        let summary = sink.snapshot();
        let report = Report {
            scenario: scenario.name.clone(),
            elapsed,
            throughput: Report::throughput(summary.total, elapsed),
            peak_vus: pool.peak(),
            spawned_vus: pool.spawned(),
            drain_timeouts,
            interrupted,
            summary,
        };
        if let Err(e) = reporter.report(&report).await {
            tracing::error!("Failed to deliver final report: {e}");
        }

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(report)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

#[cfg(not(feature = "internals"))]
use internals::*;

/// Internal components of the `StageExecutor`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;

    /// How long killed users get to unwind before their task is aborted.
    const KILL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Scheduler-side handle of a spawned virtual user.
    pub struct VuHandle {
        pub id: u64,
        pub status: VuStatus,
        stop: CancellationToken,
        task: JoinHandle<()>,
    }

    impl VuHandle {
        /// Ask the user to stop once its in-flight action completes.
        fn retire(&self) {
            self.status.retire();
            self.stop.cancel();
        }
    }

    /// The live population of virtual users, owned by the scheduler's tick loop.
    pub struct VuPool<A> {
        ctx: Arc<ExecutionContext<A>>,
        /// Running users, oldest first.
        running: Vec<VuHandle>,
        /// Retired users still finishing their in-flight action.
        stopping: Vec<VuHandle>,
        next_id: u64,
        peak: u64,
    }

    impl<A: Action> VuPool<A> {
        pub fn new(ctx: Arc<ExecutionContext<A>>) -> Self {
            Self {
                ctx,
                running: Vec::new(),
                stopping: Vec::new(),
                next_id: 0,
                peak: 0,
            }
        }

        pub fn live(&self) -> u64 {
            self.running.len() as u64
        }

        pub fn stopping(&self) -> u64 {
            self.stopping.len() as u64
        }

        pub fn spawned(&self) -> u64 {
            self.next_id
        }

        pub fn peak(&self) -> u64 {
            self.peak
        }

        pub fn running_ids(&self) -> Vec<u64> {
            self.running.iter().map(|vu| vu.id).collect()
        }

        /// Spawn or retire users until exactly `target` are running.
        /// Retirement is LIFO: the most recently spawned users go first.
        pub fn scale_to(&mut self, target: u64) {
            let live = self.live();
            if target > live {
                tracing::debug!("Spawning {} virtual users...", target - live);
                for _ in live..target {
                    self.spawn();
                }
            } else if target < live {
                tracing::debug!("Retiring {} virtual users...", live - target);
                for _ in target..live {
                    if let Some(vu) = self.running.pop() {
                        vu.retire();
                        self.stopping.push(vu);
                    }
                }
            }
            self.peak = self.peak.max(self.live());
        }

        fn spawn(&mut self) {
            let id = self.next_id;
            self.next_id += 1;
            let stop = CancellationToken::new();
            let status = VuStatus::new();
            let vu = VirtualUser::new(id, self.ctx.clone(), stop.clone(), status.clone());
            self.running.push(VuHandle {
                id,
                status,
                stop,
                task: tokio::spawn(vu.run()),
            });
        }

        /// Forget retired users that have finished.
        pub fn reap(&mut self) {
            self.stopping.retain(|vu| !vu.task.is_finished());
        }

        /// Stop every user, waiting up to `grace` for them to drain.
        ///
        /// Returns how many users had to be force-terminated.
        pub async fn shutdown(&mut self, grace: Duration) -> u64 {
            let mut vus: Vec<VuHandle> = self
                .running
                .drain(..)
                .chain(self.stopping.drain(..))
                .collect();
            vus.iter().for_each(VuHandle::retire);
            tracing::info!("Draining {} virtual users...", vus.len());

            let joined = tokio::time::timeout(
                grace,
                join_all(vus.iter_mut().map(|vu| &mut vu.task)),
            )
            .await;
            if let Ok(results) = joined {
                for (vu, res) in vus.iter().zip(results) {
                    if let Err(e) = res {
                        tracing::error!("Virtual user {} panicked with error: {e}", vu.id);
                    }
                }
                tracing::info!("All virtual users drained.");
                return 0;
            }

            let mut stuck: Vec<VuHandle> = vus
                .into_iter()
                .filter(|vu| !vu.task.is_finished())
                .collect();
            for vu in &stuck {
                let err = DrainTimeoutError { vu: vu.id, grace };
                tracing::warn!("{err}");
            }

            self.ctx.kill.cancel();
            for vu in &mut stuck {
                if tokio::time::timeout(KILL_TIMEOUT, &mut vu.task).await.is_err() {
                    tracing::error!("Virtual user {} ignored the kill signal, aborting.", vu.id);
                    vu.task.abort();
                }
            }
            stuck.len() as u64
        }
    }
}
