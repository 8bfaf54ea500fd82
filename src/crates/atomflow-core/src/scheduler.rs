//! Schedulers: from a ready atom to a submitted future.
//!
//! Dispatch is by node kind; the direction (execute vs revert) comes from
//! the atom's recorded intention. A retry controller scheduled with
//! intention `RETRY` is the re-drive point: it moves to `RETRYING`, resets
//! its subgraph, and runs itself again.

use crate::error::{EngineError, Result};
use crate::executor::AtomFuture;
use crate::graph::{NodeIx, NodeUnit};
use crate::runtime::{retry_payload, task_payload, Runtime};
use atomflow_storage::{AtomState, Intention};

/// Schedules task atoms.
pub struct TaskScheduler<'a> {
    runtime: &'a Runtime,
}

impl<'a> TaskScheduler<'a> {
    /// Scheduler over the runtime's task action.
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Submit the task for execution or reversion per its intention.
    pub fn schedule(&self, ix: NodeIx) -> Result<AtomFuture> {
        let task = task_payload(self.runtime.graph(), ix)?;
        let name = &task.spec.name;
        match self.runtime.storage().get_atom_intention(name)? {
            Intention::Execute => self.runtime.task_action().schedule_execution(&task),
            Intention::Revert => self.runtime.task_action().schedule_reversion(&task),
            other => Err(EngineError::Execution(format!(
                "task '{name}' scheduled with unexpected intention {other}"
            ))),
        }
    }
}

/// Schedules retry controller atoms.
pub struct RetryScheduler<'a> {
    runtime: &'a Runtime,
}

impl<'a> RetryScheduler<'a> {
    /// Scheduler over the runtime's retry action.
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Submit the controller per its intention. `RETRY` re-drives: the
    /// controller moves to `RETRYING`, its subgraph resets to
    /// `PENDING`/`EXECUTE`, and the controller executes again.
    pub fn schedule(&self, ix: NodeIx) -> Result<AtomFuture> {
        let retry = retry_payload(self.runtime.graph(), ix)?;
        let name = &retry.spec.name;
        match self.runtime.storage().get_atom_intention(name)? {
            Intention::Execute => self.runtime.retry_action().schedule_execution(&retry),
            Intention::Revert => self.runtime.retry_action().schedule_reversion(&retry),
            Intention::Retry => {
                self.runtime
                    .retry_action()
                    .change_state(name, AtomState::Retrying)?;
                self.runtime.retry_subflow(ix)?;
                self.runtime.retry_action().schedule_execution(&retry)
            }
            other => Err(EngineError::Execution(format!(
                "retry '{name}' scheduled with unexpected intention {other}"
            ))),
        }
    }
}

/// Kind-dispatching scheduler used by the engine loop.
pub struct Scheduler<'a> {
    runtime: &'a Runtime,
    task: TaskScheduler<'a>,
    retry: RetryScheduler<'a>,
}

impl<'a> Scheduler<'a> {
    /// Scheduler over both kinds.
    pub fn new(runtime: &'a Runtime) -> Self {
        Self {
            runtime,
            task: TaskScheduler::new(runtime),
            retry: RetryScheduler::new(runtime),
        }
    }

    /// Submit one ready atom, returning its envelope future.
    pub fn schedule(&self, ix: NodeIx) -> Result<AtomFuture> {
        let node = self.runtime.graph().node(ix);
        tracing::debug!(atom = node.name, kind = ?node.kind(), "scheduling atom");
        match &node.unit {
            NodeUnit::Task(_) => self.task.schedule(ix),
            NodeUnit::Retry(_) => self.retry.schedule(ix),
            NodeUnit::Flow => Err(EngineError::Execution(format!(
                "flow marker '{}' is not schedulable",
                node.name
            ))),
        }
    }
}
