//! Edge deciders: predicates that can suppress downstream execution.
//!
//! A decider sits on an edge `u -> v`. When `u` finishes, the predicate is
//! consulted immediately before `v` would be scheduled; a false verdict
//! marks `v` (and, depending on the decider's depth, more of the graph)
//! `IGNORE` instead of running it. Ignored atoms count as satisfied for
//! their dependents and are never yielded as executable again.

use crate::error::Result;
use crate::graph::{NodeIx, NodeKind};
use crate::runtime::Runtime;
use crate::traversal::{BreadthFirst, Direction};
use atomflow_storage::{AtomState, Intention, Storage};
use serde_json::Value;
use std::sync::Arc;

/// Decider predicate over the results recorded so far.
pub type DeciderFn = Arc<dyn Fn(&DeciderHistory<'_>) -> bool + Send + Sync>;

/// How far a false verdict propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeciderDepth {
    /// The target atom and its forward dependents
    #[default]
    Atom,
    /// Every atom in the target's enclosing flow
    Flow,
    /// Only the target atom itself
    Neighbor,
}

impl DeciderDepth {
    fn breadth(self) -> u8 {
        match self {
            DeciderDepth::Neighbor => 0,
            DeciderDepth::Atom => 1,
            DeciderDepth::Flow => 2,
        }
    }

    fn widest(a: DeciderDepth, b: DeciderDepth) -> DeciderDepth {
        if a.breadth() >= b.breadth() {
            a
        } else {
            b
        }
    }
}

/// Read-only view of recorded results, handed to decider predicates.
pub struct DeciderHistory<'a> {
    storage: &'a dyn Storage,
}

impl<'a> DeciderHistory<'a> {
    pub(crate) fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// The saved result of `atom`, if it has produced one.
    pub fn result(&self, atom: &str) -> Option<Value> {
        self.storage.get_result(atom).ok().flatten()
    }
}

/// One edge decider as cached per atom: the predicate plus where it came
/// from.
#[derive(Clone)]
pub struct EdgeDecider {
    /// Node the gated edge originates at
    pub source: String,
    /// Kind of the source node (flow markers forward their inbound deciders)
    pub source_kind: NodeKind,
    /// How far a false verdict propagates
    pub depth: DeciderDepth,
    /// The predicate
    pub decider: DeciderFn,
}

impl std::fmt::Debug for EdgeDecider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeDecider")
            .field("source", &self.source)
            .field("source_kind", &self.source_kind)
            .field("depth", &self.depth)
            .finish()
    }
}

/// The late decider evaluated right before an atom is scheduled.
///
/// Collects every edge decider that gates the atom; if any votes false, the
/// atom (and the widest requested propagation set) is marked `IGNORE` and
/// scheduling is refused.
pub struct IgnoreDecider {
    atom: NodeIx,
    deciders: Vec<EdgeDecider>,
}

impl IgnoreDecider {
    pub(crate) fn new(atom: NodeIx, deciders: Vec<EdgeDecider>) -> Self {
        Self { atom, deciders }
    }

    /// Evaluate; on a false verdict, apply the ignore cascade. Returns
    /// whether the atom may proceed to scheduling.
    pub fn check_and_affect(&self, runtime: &Runtime) -> Result<bool> {
        if self.deciders.is_empty() {
            return Ok(true);
        }
        let history = DeciderHistory::new(runtime.storage());
        let mut verdict: Option<DeciderDepth> = None;
        for edge in &self.deciders {
            if !(edge.decider)(&history) {
                verdict = Some(match verdict {
                    Some(depth) => DeciderDepth::widest(depth, edge.depth),
                    None => edge.depth,
                });
            }
        }
        let Some(depth) = verdict else {
            return Ok(true);
        };

        let affected = self.affected_atoms(runtime, depth)?;
        let graph = runtime.graph();
        tracing::debug!(
            atom = graph.node(self.atom).name,
            depth = ?depth,
            affected = affected.len(),
            "decider voted no, suppressing atoms"
        );
        runtime.reset_atoms(&affected, Some(AtomState::Ignore), Some(Intention::Ignore))?;
        Ok(false)
    }

    // Atoms the cascade touches. Only atoms that have not run yet can be
    // suppressed; anything past PENDING is left alone.
    fn affected_atoms(&self, runtime: &Runtime, depth: DeciderDepth) -> Result<Vec<NodeIx>> {
        let graph = runtime.graph();
        let candidates: Vec<NodeIx> = match depth {
            DeciderDepth::Neighbor => vec![self.atom],
            DeciderDepth::Atom => {
                let mut out = vec![self.atom];
                out.extend(BreadthFirst::new(graph, self.atom, Direction::Forward, true));
                out
            }
            DeciderDepth::Flow => match graph.node(self.atom).enclosing_flow {
                Some(flow) => graph.flow_members(flow),
                None => {
                    let mut out = vec![self.atom];
                    out.extend(BreadthFirst::new(graph, self.atom, Direction::Forward, true));
                    out
                }
            },
        };
        let mut affected = Vec::with_capacity(candidates.len());
        for ix in candidates {
            let state = runtime.storage().get_atom_state(&graph.node(ix).name)?;
            if state == AtomState::Pending {
                affected.push(ix);
            }
        }
        Ok(affected)
    }
}

/// The late decider used on revert paths: always allows.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDecider;

impl NoOpDecider {
    /// Always proceeds.
    pub fn check_and_affect(&self, _runtime: &Runtime) -> Result<bool> {
        Ok(true)
    }
}

/// Either late decider, as yielded by the analyzer.
pub enum LateDecider {
    /// Evaluate edge deciders before scheduling
    Ignore(IgnoreDecider),
    /// Always allow (revert paths)
    NoOp(NoOpDecider),
}

impl LateDecider {
    /// Evaluate; returns whether scheduling may proceed.
    pub fn check_and_affect(&self, runtime: &Runtime) -> Result<bool> {
        match self {
            LateDecider::Ignore(decider) => decider.check_and_affect(runtime),
            LateDecider::NoOp(decider) => decider.check_and_affect(runtime),
        }
    }
}
