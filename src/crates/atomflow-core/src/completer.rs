//! The completer: applies finished envelopes to storage and resolves
//! failures.
//!
//! Success and reversion outcomes are plain bookkeeping. A failed execution
//! additionally picks a recovery path: the nearest retry controller is
//! consulted when there is one, otherwise the whole workflow is marked for
//! compensation.

use crate::atom::RetryDecision;
use crate::error::{EngineError, Result};
use crate::executor::{Envelope, Phase};
use crate::graph::{NodeIx, NodeKind};
use crate::runtime::{retry_payload, Runtime};
use atomflow_storage::{Failure, Intention};
use serde_json::Value;

/// Consumes completed envelopes for the engine loop.
pub struct Completer<'a> {
    runtime: &'a Runtime,
}

impl<'a> Completer<'a> {
    /// Completer over the runtime's actions and storage.
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Apply one envelope. Returns the node index of the completed atom,
    /// which the loop feeds back into the analyzer as a seed.
    pub fn complete(&self, envelope: Envelope) -> Result<NodeIx> {
        let ix = self
            .runtime
            .graph()
            .index_of(&envelope.atom)
            .ok_or_else(|| {
                EngineError::Execution(format!(
                    "completed envelope for unknown atom '{}'",
                    envelope.atom
                ))
            })?;
        match (envelope.phase, envelope.outcome) {
            (Phase::Execute, Ok(result)) => {
                self.complete_execution(envelope.kind, &envelope.atom, result)?;
            }
            (Phase::Execute, Err(failure)) => {
                tracing::warn!(atom = envelope.atom, %failure, "atom execution failed");
                self.fail(envelope.kind, &envelope.atom, failure.clone())?;
                self.process_atom_failure(ix, &failure)?;
            }
            (Phase::Revert, Ok(_)) => {
                self.complete_reversion(envelope.kind, &envelope.atom)?;
            }
            (Phase::Revert, Err(failure)) => {
                // A failed compensation stalls the revert wave; the final
                // verdict will carry this failure.
                tracing::warn!(atom = envelope.atom, %failure, "atom reversion failed");
                self.fail(envelope.kind, &envelope.atom, failure)?;
            }
        }
        Ok(ix)
    }

    fn complete_execution(&self, kind: NodeKind, name: &str, result: Value) -> Result<()> {
        match kind {
            NodeKind::Task => self.runtime.task_action().complete_execution(name, result),
            NodeKind::Retry => self
                .runtime
                .retry_action()
                .complete_execution(name, result),
            NodeKind::Flow => unreachable!("flow markers never execute"),
        }
    }

    fn complete_reversion(&self, kind: NodeKind, name: &str) -> Result<()> {
        match kind {
            NodeKind::Task => self.runtime.task_action().complete_reversion(name),
            NodeKind::Retry => self.runtime.retry_action().complete_reversion(name),
            NodeKind::Flow => unreachable!("flow markers never revert"),
        }
    }

    fn fail(&self, kind: NodeKind, name: &str, failure: Failure) -> Result<()> {
        match kind {
            NodeKind::Task => self.runtime.task_action().complete_failure(name, failure),
            NodeKind::Retry => self.runtime.retry_action().complete_failure(name, failure),
            NodeKind::Flow => unreachable!("flow markers never fail"),
        }
    }

    // Pick the recovery path for a failed execution. With no retry ancestor
    // the whole graph is marked for revert; otherwise the controller
    // decides, and its decision stays local to its scope unless it
    // escalates.
    fn process_atom_failure(&self, ix: NodeIx, failure: &Failure) -> Result<()> {
        let graph = self.runtime.graph();
        let Some(retry_ix) = graph.find_retry(ix) else {
            self.revert_all()?;
            return Ok(());
        };
        let retry = retry_payload(graph, retry_ix)?;
        let atom_name = &graph.node(ix).name;
        let decision = self
            .runtime
            .retry_action()
            .on_failure(&retry, atom_name, failure)?;
        tracing::info!(
            retry = retry.spec.name,
            atom = atom_name,
            decision = ?decision,
            "retry controller consulted"
        );
        match decision {
            RetryDecision::Retry => {
                // Absorb the failure, then have the scope compensate; once
                // it has fully reverted, the controller (intention RETRY)
                // re-drives it.
                self.runtime
                    .retry_action()
                    .record_failure(&retry.spec.name, failure.clone())?;
                self.runtime
                    .storage()
                    .set_atom_intention(&retry.spec.name, Intention::Retry)?;
                self.mark_scope_for_revert(retry_ix)?;
            }
            RetryDecision::Revert => {
                self.runtime
                    .storage()
                    .set_atom_intention(&retry.spec.name, Intention::Revert)?;
                self.mark_scope_for_revert(retry_ix)?;
            }
            RetryDecision::RevertAll => self.revert_all()?,
        }
        Ok(())
    }

    fn mark_scope_for_revert(&self, retry_ix: NodeIx) -> Result<()> {
        self.runtime
            .reset_subgraph(retry_ix, None, Some(Intention::Revert))?;
        Ok(())
    }

    fn revert_all(&self) -> Result<()> {
        let tweaked = self.runtime.reset_all(None, Some(Intention::Revert))?;
        tracing::info!(atoms = tweaked.len(), "workflow marked for revert");
        Ok(())
    }
}
