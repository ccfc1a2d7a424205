use std::sync::Arc;

use crate::{
    action::Action,
    executor::Executor,
    report::{Report, Reporter},
};

/// A named [`Action`] to be driven by an [`Executor`].
///
/// The action is shared by every virtual user of a run, so it is kept behind
/// an [`Arc`] and cloning a scenario is cheap.
#[derive(Debug)]
pub struct Scenario<A: Action> {
    pub name: String,
    pub action: Arc<A>,
}

impl<A: Action> Clone for Scenario<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
        }
    }
}

impl<A: Action> Scenario<A> {
    pub fn new(name: impl Into<String>, action: A) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
        }
    }

    /// Run this scenario with `executor`, reporting to `reporter`.
    pub async fn run<E, R>(&self, executor: &E, reporter: &R) -> Result<Report, E::Error>
    where
        E: Executor<A>,
        R: Reporter,
    {
        executor.exec(self, reporter).await
    }
}
