//! Stage plan and the ramp controller that turns it into a concurrency curve.
//!
//! Within stage *i*, starting at cumulative time `T_i` with duration `D_i` and
//! target `C_i`, the target concurrency moves linearly from the previous
//! stage's target (0 before the first stage) to `C_i`:
//!
//! ```text
//! t = (elapsed - T_i) / D_i
//! c(t) = round(C_prev + (C_i - C_prev) * t)
//! ```
//!
//! A linear ramp is used instead of a step function so connections open
//! gradually rather than in bursts. A stage with a zero duration is a
//! discontinuity: the target jumps straight to `C_i`.
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// A stage defines a target number of virtual users and how long to ramp to it.
///
/// Use `Stage::new(Duration::from_secs(10), 100)` to ramp to 100 VUs over 10s.
/// If `duration` is `Duration::ZERO`, the target is applied instantly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    /// Concurrent virtual users
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// A validated, non-empty, ordered sequence of [`Stage`]s.
///
/// Stages run in insertion order and cannot change once the plan is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    stages: Vec<Stage>,
    total: Duration,
}

impl Plan {
    /// Validate `stages` into a plan.
    ///
    /// Fails with [`ConfigError::EmptyPlan`] if there are no stages and with
    /// [`ConfigError::PlanTooLong`] if the stage durations do not fit in a
    /// [`Duration`] when added up.
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyPlan);
        }
        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .ok_or(ConfigError::PlanTooLong)?;
        Ok(Self { stages, total })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }
}

/// Where the plan stands at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RampState {
    pub elapsed: Duration,
    /// Index of the active stage; equals the number of stages once finished.
    pub stage: usize,
    pub target: u64,
    pub finished: bool,
}

/// Answers "how many virtual users should be running now?" for a [`Plan`].
///
/// The controller is a pure function of elapsed time: it keeps no mutable
/// state, so the scheduler's tick loop can own the resulting [`RampState`]
/// without any locking.
#[derive(Clone, Debug)]
pub struct RampController {
    plan: Plan,
    total: Duration,
}

impl RampController {
    pub fn new(plan: Plan) -> Self {
        let total = plan.total_duration();
        Self { plan, total }
    }

    /// Validate `stages` and build a controller over them.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        Plan::new(stages).map(Self::new)
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Target concurrency at `elapsed`.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        self.state_at(elapsed).target
    }

    /// Full ramp state at `elapsed`.
    ///
    /// Once `elapsed` reaches the total plan duration the target is 0 and the
    /// state is finished. A plan lasting zero time holds its final target at
    /// `t = 0` and finishes right after.
    pub fn state_at(&self, elapsed: Duration) -> RampState {
        let stages = self.plan.stages();
        if elapsed > self.total || (elapsed == self.total && !self.total.is_zero()) {
            return RampState {
                elapsed,
                stage: stages.len(),
                target: 0,
                finished: true,
            };
        }

        let mut previous = 0;
        let mut start = Duration::ZERO;
        for (i, stage) in stages.iter().enumerate() {
            // Partial sums never exceed the total, which `Plan::new` checked.
            let end = start + stage.duration;
            // start <= elapsed < end, so the duration is never zero here
            if elapsed < end {
                let t = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                return RampState {
                    elapsed,
                    stage: i,
                    target: interpolate(previous, stage.target, t),
                    finished: false,
                };
            }
            previous = stage.target;
            start = end;
        }

        // Only a zero-length plan observed at exactly t = 0 gets here.
        RampState {
            elapsed,
            stage: stages.len() - 1,
            target: previous,
            finished: false,
        }
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

#[cfg(not(feature = "internals"))]
use internals::*;

mod internals {
    /// Pure linear interpolation between two concurrency levels.
    ///
    /// `t` is clamped to `[0.0, 1.0]` and the result is rounded to the
    /// nearest integer, so it always lies between `from` and `to`.
    pub fn interpolate(from: u64, to: u64, t: f64) -> u64 {
        let t = t.clamp(0.0, 1.0);
        let value = from as f64 + (to as f64 - from as f64) * t;
        (value.round() as u64).clamp(from.min(to), from.max(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn controller(stages: &[(u64, u64)]) -> RampController {
        RampController::from_stages(
            stages
                .iter()
                .map(|&(d, t)| Stage::new(secs(d), t))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(matches!(Plan::new(vec![]), Err(ConfigError::EmptyPlan)));
        assert!(matches!(
            RampController::from_stages(vec![]),
            Err(ConfigError::EmptyPlan)
        ));
    }

    #[test]
    fn overflowing_plan_is_rejected() {
        let huge = Stage::new(Duration::MAX, 10);
        assert!(matches!(
            Plan::new(vec![huge, Stage::new(secs(1), 10)]),
            Err(ConfigError::PlanTooLong)
        ));

        let ramp = RampController::from_stages(vec![huge]).unwrap();
        assert_eq!(ramp.plan().total_duration(), Duration::MAX);
        assert_eq!(ramp.target_at(Duration::ZERO), 0);
        assert!(!ramp.state_at(secs(3_600)).finished);
    }

    #[test]
    fn plan_totals() {
        let ramp = controller(&[(30, 50), (60, 100), (0, 10)]);
        assert_eq!(ramp.plan().total_duration(), secs(90));
        assert_eq!(ramp.plan().max_target(), 100);
    }

    #[test]
    fn single_stage_ramps_linearly() {
        let ramp = controller(&[(10, 10)]);
        for i in 0..10 {
            assert_eq!(ramp.target_at(secs(i)), i);
        }
        assert_eq!(ramp.target_at(Duration::from_millis(5_400)), 5);
        assert_eq!(ramp.target_at(Duration::from_millis(5_600)), 6);
    }

    #[test]
    fn starts_at_zero() {
        let ramp = controller(&[(10, 10)]);
        let state = ramp.state_at(Duration::ZERO);
        assert_eq!(state.target, 0);
        assert_eq!(state.stage, 0);
        assert!(!state.finished);
    }

    #[test]
    fn zero_duration_stage_applies_immediately() {
        let ramp = controller(&[(0, 20)]);
        let state = ramp.state_at(Duration::ZERO);
        assert_eq!(state.target, 20);
        assert!(!state.finished);

        let after = ramp.state_at(Duration::from_millis(1));
        assert_eq!(after.target, 0);
        assert!(after.finished);
    }

    #[test]
    fn zero_duration_stage_before_ramp_sets_starting_point() {
        let ramp = controller(&[(0, 20), (10, 40)]);
        assert_eq!(ramp.target_at(Duration::ZERO), 20);
        assert_eq!(ramp.target_at(secs(5)), 30);
        assert_eq!(ramp.state_at(secs(5)).stage, 1);
    }

    #[test]
    fn spike_in_the_middle() {
        let ramp = controller(&[(10, 10), (0, 50), (10, 50)]);
        assert_eq!(ramp.target_at(secs(9)), 9);
        assert_eq!(ramp.target_at(secs(10)), 50);
        assert_eq!(ramp.state_at(secs(10)).stage, 2);
        assert_eq!(ramp.target_at(secs(15)), 50);
    }

    #[test]
    fn ramp_up_hold_and_down() {
        let ramp = controller(&[(10, 100), (10, 100), (10, 0)]);
        assert_eq!(ramp.target_at(secs(5)), 50);
        assert_eq!(ramp.target_at(secs(15)), 100);
        assert_eq!(ramp.target_at(secs(25)), 50);
        assert_eq!(ramp.target_at(Duration::from_millis(29_000)), 10);
    }

    #[test]
    fn finishes_at_total_duration() {
        let ramp = controller(&[(30, 50), (60, 100)]);
        let end = ramp.state_at(secs(90));
        assert!(end.finished);
        assert_eq!(end.target, 0);
        assert_eq!(end.stage, 2);
        assert!(ramp.state_at(secs(1_000)).finished);
        assert!(!ramp.state_at(Duration::from_millis(89_999)).finished);
    }

    mod interpolate {
        use super::*;

        #[test]
        fn endpoints() {
            assert_eq!(interpolate(0, 10, 0.0), 0);
            assert_eq!(interpolate(0, 10, 1.0), 10);
            assert_eq!(interpolate(10, 0, 1.0), 0);
        }

        #[test]
        fn clamps_out_of_range_factor() {
            assert_eq!(interpolate(0, 10, -3.0), 0);
            assert_eq!(interpolate(0, 10, 7.0), 10);
        }

        #[test]
        fn hold_steady() {
            for i in 0..=10 {
                assert_eq!(interpolate(42, 42, i as f64 / 10.0), 42);
            }
        }
    }

    proptest! {
        #[test]
        fn target_never_exceeds_max(
            stages in prop::collection::vec((0u64..60_000, 0u64..1_000), 1..8),
            at in 0u64..500_000,
        ) {
            let ramp = RampController::from_stages(
                stages
                    .iter()
                    .map(|&(ms, t)| Stage::new(Duration::from_millis(ms), t))
                    .collect(),
            )
            .unwrap();
            let target = ramp.target_at(Duration::from_millis(at));
            prop_assert!(target <= ramp.plan().max_target());
        }

        #[test]
        fn starts_at_zero_unless_first_stage_jumps(
            first in (0u64..60_000, 0u64..1_000),
            rest in prop::collection::vec((1u64..60_000, 0u64..1_000), 0..4),
        ) {
            let mut stages = vec![Stage::new(Duration::from_millis(first.0), first.1)];
            stages.extend(rest.iter().map(|&(ms, t)| Stage::new(Duration::from_millis(ms), t)));
            let ramp = RampController::from_stages(stages).unwrap();
            let expected = if first.0 == 0 { first.1 } else { 0 };
            prop_assert_eq!(ramp.target_at(Duration::ZERO), expected);
        }
    }
}
