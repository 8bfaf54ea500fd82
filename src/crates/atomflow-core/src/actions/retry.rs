//! Retry action: state transitions, executor dispatch and failure
//! consultation for retry controllers.

use super::bind_args;
use crate::atom::{RetryAtom, RetryDecision, RevertContext};
use crate::error::{EngineError, Result};
use crate::executor::{AtomExecutor, AtomFuture, Phase, Submission};
use crate::graph::NodeKind;
use crate::notifier::{AtomEvent, Notifier};
use atomflow_storage::{check_retry_transition, AtomState, Failure, Storage};
use serde_json::Value;
use std::sync::Arc;

/// Drives retry controller atoms and answers what to do when something in
/// their subgraph fails.
pub struct RetryAction {
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
    executor: Arc<dyn AtomExecutor>,
}

impl RetryAction {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<Notifier>,
        executor: Arc<dyn AtomExecutor>,
    ) -> Self {
        Self {
            storage,
            notifier,
            executor,
        }
    }

    /// Transition a retry controller in storage, firing a notification.
    pub fn change_state(&self, name: &str, state: AtomState) -> Result<bool> {
        let current = self.storage.get_atom_state(name)?;
        if current == state {
            return Ok(false);
        }
        if !check_retry_transition(current, state) {
            return Err(EngineError::invalid_state(name, current, state));
        }
        self.storage.set_atom_state(name, state)?;
        self.notifier.notify(&AtomEvent::new(name, state, None));
        Ok(true)
    }

    /// Mark the controller running and submit its `execute` with the
    /// absorbed-failure history.
    pub fn schedule_execution(&self, retry: &Arc<RetryAtom>) -> Result<AtomFuture> {
        let name = retry.spec.name.clone();
        self.change_state(&name, AtomState::Running)?;
        let history = self.storage.retry_history(&name)?;
        let submission = Submission {
            atom: name,
            kind: NodeKind::Retry,
            phase: Phase::Execute,
        };
        let work: crate::executor::WorkFuture =
            match bind_args(self.storage.as_ref(), &retry.spec) {
                Ok(args) => {
                    let controller = retry.controller.clone();
                    Box::pin(async move { controller.execute(args, history).await })
                }
                Err(failure) => ready_failure(failure),
            };
        Ok(self.executor.submit(submission, work))
    }

    /// Mark the controller reverting and submit its `revert`.
    pub fn schedule_reversion(&self, retry: &Arc<RetryAtom>) -> Result<AtomFuture> {
        let name = retry.spec.name.clone();
        self.change_state(&name, AtomState::Reverting)?;
        let result = self.storage.get_result(&name)?;
        let failure = self.storage.get_failure(&name)?;
        let submission = Submission {
            atom: name,
            kind: NodeKind::Retry,
            phase: Phase::Revert,
        };
        let work: crate::executor::WorkFuture =
            match bind_args(self.storage.as_ref(), &retry.spec) {
                Ok(args) => {
                    let controller = retry.controller.clone();
                    let context = RevertContext {
                        args,
                        result,
                        failure,
                    };
                    Box::pin(async move { controller.revert(context).await })
                }
                Err(failure) => ready_failure(failure),
            };
        Ok(self.executor.submit(submission, work))
    }

    /// Ask the controller what to do about a failure inside its subgraph.
    pub fn on_failure(
        &self,
        retry: &Arc<RetryAtom>,
        atom: &str,
        failure: &Failure,
    ) -> Result<RetryDecision> {
        let history = self.storage.retry_history(&retry.spec.name)?;
        Ok(retry.controller.on_failure(atom, failure, &history))
    }

    /// Record an absorbed failure in the controller's history.
    pub fn record_failure(&self, name: &str, failure: Failure) -> Result<()> {
        self.storage.record_retry_failure(name, failure)?;
        Ok(())
    }

    /// Record a successful execution.
    pub fn complete_execution(&self, name: &str, result: Value) -> Result<()> {
        self.storage.save_result(name, result)?;
        self.change_state(name, AtomState::Success)?;
        Ok(())
    }

    /// Record a failed execution or reversion.
    pub fn complete_failure(&self, name: &str, failure: Failure) -> Result<()> {
        self.storage.save_failure(name, failure)?;
        self.change_state(name, AtomState::Failure)?;
        Ok(())
    }

    /// Record a finished reversion.
    pub fn complete_reversion(&self, name: &str) -> Result<()> {
        self.change_state(name, AtomState::Reverted)?;
        Ok(())
    }
}

fn ready_failure(failure: Failure) -> crate::executor::WorkFuture {
    Box::pin(async move { Err(failure) })
}
