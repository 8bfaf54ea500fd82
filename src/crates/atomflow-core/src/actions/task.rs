//! Task action: state transitions and executor dispatch for task atoms.

use super::bind_args;
use crate::atom::{RevertContext, TaskAtom};
use crate::error::{EngineError, Result};
use crate::executor::{AtomExecutor, AtomFuture, Phase, Submission};
use crate::graph::NodeKind;
use crate::notifier::{AtomEvent, Notifier};
use atomflow_storage::{check_task_transition, AtomState, Failure, Storage};
use serde_json::Value;
use std::sync::Arc;

/// Drives individual task atoms: records their transitions, binds their
/// arguments and hands their callables to the executor.
pub struct TaskAction {
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
    executor: Arc<dyn AtomExecutor>,
}

impl TaskAction {
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

    /// Transition a task in storage, firing a notification. A no-op when
    /// the task already is in `state`; an error when the move is illegal.
    pub fn change_state(
        &self,
        name: &str,
        state: AtomState,
        progress: Option<f64>,
    ) -> Result<bool> {
        let current = self.storage.get_atom_state(name)?;
        if current == state {
            return Ok(false);
        }
        if !check_task_transition(current, state) {
            return Err(EngineError::invalid_state(name, current, state));
        }
        self.storage.set_atom_state(name, state)?;
        self.notifier.notify(&AtomEvent::new(name, state, progress));
        Ok(true)
    }

    /// Mark the task running, bind its arguments and submit its `execute`.
    pub fn schedule_execution(&self, task: &Arc<TaskAtom>) -> Result<AtomFuture> {
        let name = task.spec.name.clone();
        self.change_state(&name, AtomState::Running, Some(0.0))?;
        let submission = Submission {
            atom: name,
            kind: NodeKind::Task,
            phase: Phase::Execute,
        };
        let work: crate::executor::WorkFuture =
            match bind_args(self.storage.as_ref(), &task.spec) {
                Ok(args) => {
                    let handler = task.handler.clone();
                    Box::pin(async move { handler.execute(args).await })
                }
                Err(failure) => ready_failure(failure),
            };
        Ok(self.executor.submit(submission, work))
    }

    /// Mark the task reverting and submit its `revert` with the recorded
    /// result and failure.
    pub fn schedule_reversion(&self, task: &Arc<TaskAtom>) -> Result<AtomFuture> {
        let name = task.spec.name.clone();
        self.change_state(&name, AtomState::Reverting, Some(0.0))?;
        let result = self.storage.get_result(&name)?;
        let failure = self.storage.get_failure(&name)?;
        let submission = Submission {
            atom: name,
            kind: NodeKind::Task,
            phase: Phase::Revert,
        };
        let work: crate::executor::WorkFuture =
            match bind_args(self.storage.as_ref(), &task.spec) {
                Ok(args) => {
                    let handler = task.handler.clone();
                    let context = RevertContext {
                        args,
                        result,
                        failure,
                    };
                    Box::pin(async move { handler.revert(context).await })
                }
                Err(failure) => ready_failure(failure),
            };
        Ok(self.executor.submit(submission, work))
    }

    /// Record a successful execution.
    pub fn complete_execution(&self, name: &str, result: Value) -> Result<()> {
        self.storage.save_result(name, result)?;
        self.change_state(name, AtomState::Success, Some(1.0))?;
        Ok(())
    }

    /// Record a failed execution or reversion.
    pub fn complete_failure(&self, name: &str, failure: Failure) -> Result<()> {
        self.storage.save_failure(name, failure)?;
        self.change_state(name, AtomState::Failure, None)?;
        Ok(())
    }

    /// Record a finished reversion.
    pub fn complete_reversion(&self, name: &str) -> Result<()> {
        self.change_state(name, AtomState::Reverted, Some(1.0))?;
        Ok(())
    }
}

fn ready_failure(failure: Failure) -> crate::executor::WorkFuture {
    Box::pin(async move { Err(failure) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomSpec;
    use crate::executor::DirectExecutor;
    use crate::test_support::noop_task;
    use atomflow_storage::{AtomRegistration, MemoryStorage};
    use serde_json::json;

    fn action_with(storage: Arc<MemoryStorage>) -> TaskAction {
        TaskAction::new(
            storage,
            Arc::new(Notifier::new()),
            Arc::new(DirectExecutor::new()),
        )
    }

    #[tokio::test]
    async fn schedule_execution_transitions_and_runs() {
        let storage = Arc::new(MemoryStorage::new());
        storage.ensure_atom(AtomRegistration::new("t")).unwrap();
        let action = action_with(storage.clone());
        let task = Arc::new(TaskAtom {
            spec: AtomSpec::new("t"),
            handler: noop_task(),
        });

        let future = action.schedule_execution(&task).unwrap();
        assert_eq!(storage.get_atom_state("t").unwrap(), AtomState::Running);
        let envelope = future.await;
        assert_eq!(envelope.phase, Phase::Execute);
        assert!(envelope.outcome.is_ok());
    }

    #[tokio::test]
    async fn missing_dependency_surfaces_as_failure_envelope() {
        let storage = Arc::new(MemoryStorage::new());
        storage.ensure_atom(AtomRegistration::new("t")).unwrap();
        let action = action_with(storage);
        let task = Arc::new(TaskAtom {
            spec: AtomSpec::new("t").requires(["nowhere"]),
            handler: noop_task(),
        });

        let envelope = action.schedule_execution(&task).unwrap().await;
        let failure = envelope.outcome.unwrap_err();
        assert_eq!(failure.kind, "DependencyFailure");
    }

    #[test]
    fn illegal_transitions_are_fatal() {
        let storage = Arc::new(MemoryStorage::new());
        storage.ensure_atom(AtomRegistration::new("t")).unwrap();
        let action = action_with(storage);
        let err = action
            .change_state("t", AtomState::Reverted, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[test]
    fn completion_records_result_and_state() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .ensure_atom(AtomRegistration::new("t").provides(["x"]))
            .unwrap();
        storage.set_atom_state("t", AtomState::Running).unwrap();
        let action = action_with(storage.clone());

        action.complete_execution("t", json!(5)).unwrap();
        assert_eq!(storage.get_atom_state("t").unwrap(), AtomState::Success);
        assert_eq!(storage.fetch("x").unwrap(), json!(5));
    }
}
