//! The analyzer: computes ready-to-execute and ready-to-revert frontiers
//! from the graph plus the storage snapshot.
//!
//! All browse methods are lazy: they walk the graph only as far as the
//! consumer pulls, and readiness checks stop at the first blocking
//! neighbor. Ordering matters on the execute side: seeded browsing goes
//! breadth-first forward so upstream deciders are applied before deeper
//! atoms are examined.

use crate::deciders::{IgnoreDecider, LateDecider, NoOpDecider};
use crate::error::Result;
use crate::graph::NodeIx;
use crate::runtime::Runtime;
use crate::traversal::{BreadthFirst, DepthFirst, Direction};
use atomflow_storage::{AtomState, Intention};
use std::collections::HashSet;

/// One frontier entry: the atom plus the late decider to consult right
/// before scheduling it.
pub type ReadyItem = Result<(NodeIx, LateDecider)>;

/// Frontier computation over `(graph, storage)`, borrowed from the runtime.
pub struct Analyzer<'a> {
    runtime: &'a Runtime,
}

impl<'a> Analyzer<'a> {
    /// Analyzer over the runtime's graph and storage.
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Next atoms to run, execute and revert frontiers merged (unique by
    /// atom). Seeded, the result depends on where the seed just landed:
    ///
    /// - `SUCCESS` wanting `REVERT` - the seed itself is next
    /// - `SUCCESS` wanting `EXECUTE` - executable successors of the seed
    /// - `REVERTED` - revertable predecessors of the seed
    /// - `FAILURE` - the global revert frontier
    /// - anything else - nothing
    pub fn iter_next_atoms(
        &self,
        seed: Option<NodeIx>,
    ) -> Result<Box<dyn Iterator<Item = ReadyItem> + 'a>> {
        let runtime = self.runtime;
        let Some(ix) = seed else {
            let mut seen: HashSet<NodeIx> = HashSet::new();
            let merged = self
                .browse_atoms_for_execute(None)
                .chain(self.browse_atoms_for_revert(None))
                .filter(move |item| match item {
                    Ok((ix, _)) => seen.insert(*ix),
                    Err(_) => true,
                });
            return Ok(Box::new(merged));
        };

        let name = &runtime.graph().node(ix).name;
        let state = runtime.storage().get_atom_state(name)?;
        let intention = runtime.storage().get_atom_intention(name)?;
        Ok(match (state, intention) {
            (AtomState::Success, Intention::Revert) => Box::new(std::iter::once(Ok((
                ix,
                LateDecider::NoOp(NoOpDecider),
            )))),
            (AtomState::Success, Intention::Execute) => self.browse_atoms_for_execute(Some(ix)),
            (AtomState::Reverted, _) => self.browse_atoms_for_revert(Some(ix)),
            (AtomState::Failure, _) => self.browse_atoms_for_revert(None),
            _ => Box::new(std::iter::empty()),
        })
    }

    /// Atoms that may be ready to execute. Seeded, only the successors of
    /// the seed are examined, breadth-first, so deciders apply top-down.
    pub fn browse_atoms_for_execute(
        &self,
        seed: Option<NodeIx>,
    ) -> Box<dyn Iterator<Item = ReadyItem> + 'a> {
        let runtime = self.runtime;
        let graph = runtime.graph();
        let source: Box<dyn Iterator<Item = NodeIx> + 'a> = match seed {
            None => Box::new(graph.iter_atoms()),
            Some(ix) => Box::new(BreadthFirst::new(graph, ix, Direction::Forward, true)),
        };
        Box::new(source.filter_map(move |ix| {
            match maybe_ready_for_execute(runtime, ix) {
                Ok(Some(decider)) => Some(Ok((ix, decider))),
                Ok(None) => None,
                Err(error) => Some(Err(error)),
            }
        }))
    }

    /// Atoms that may be ready to revert. Seeded, only the predecessors of
    /// the seed are examined, and the walk never crosses a retry boundary:
    /// a retry owns its subgraph.
    pub fn browse_atoms_for_revert(
        &self,
        seed: Option<NodeIx>,
    ) -> Box<dyn Iterator<Item = ReadyItem> + 'a> {
        let runtime = self.runtime;
        let graph = runtime.graph();
        let source: Box<dyn Iterator<Item = NodeIx> + 'a> = match seed {
            None => Box::new(graph.iter_atoms()),
            Some(ix) => Box::new(BreadthFirst::new(graph, ix, Direction::Backward, false)),
        };
        Box::new(source.filter_map(move |ix| {
            match maybe_ready_for_revert(runtime, ix) {
                Ok(Some(decider)) => Some(Ok((ix, decider))),
                Ok(None) => None,
                Err(error) => Some(Err(error)),
            }
        }))
    }

    /// Whether one atom is ready to execute, with its late decider.
    pub fn maybe_ready_for_execute(&self, ix: NodeIx) -> Result<Option<LateDecider>> {
        maybe_ready_for_execute(self.runtime, ix)
    }

    /// Whether one atom is ready to revert, with its late decider.
    pub fn maybe_ready_for_revert(&self, ix: NodeIx) -> Result<Option<LateDecider>> {
        maybe_ready_for_revert(self.runtime, ix)
    }

    /// Retry controllers, optionally narrowed to one state.
    pub fn iterate_retries(&self, state: Option<AtomState>) -> Result<Vec<NodeIx>> {
        let graph = self.runtime.graph();
        let retries: Vec<NodeIx> = graph.iter_retries().collect();
        let Some(wanted) = state else {
            return Ok(retries);
        };
        let names: Vec<&str> = retries
            .iter()
            .map(|&ix| graph.node(ix).name.as_str())
            .collect();
        let states = self.runtime.storage().get_atoms_states(&names)?;
        Ok(retries
            .into_iter()
            .filter(|&ix| {
                states
                    .get(&graph.node(ix).name)
                    .is_some_and(|&(state, _)| state == wanted)
            })
            .collect())
    }

    /// The retry controller owning `ix`, if any.
    pub fn find_retry(&self, ix: NodeIx) -> Option<NodeIx> {
        self.runtime.graph().find_retry(ix)
    }

    /// Whether every atom landed in a happy state (`SUCCESS` or `IGNORE`).
    pub fn is_success(&self) -> Result<bool> {
        let graph = self.runtime.graph();
        let names: Vec<&str> = graph
            .iter_atoms()
            .map(|ix| graph.node(ix).name.as_str())
            .collect();
        let states = self.runtime.storage().get_atoms_states(&names)?;
        Ok(states
            .values()
            .all(|&(state, _)| matches!(state, AtomState::Success | AtomState::Ignore)))
    }
}

// An atom is ready to execute when its state can move to RUNNING, its
// intention is EXECUTE, and every predecessor finished well or was ignored.
fn maybe_ready_for_execute(runtime: &Runtime, ix: NodeIx) -> Result<Option<LateDecider>> {
    let graph = runtime.graph();
    let node = graph.node(ix);
    if !node.kind().is_atom() {
        return Ok(None);
    }
    let state = runtime.storage().get_atom_state(&node.name)?;
    if !runtime.check_atom_transition(&node.name, state, AtomState::Running) {
        return Ok(None);
    }
    if runtime.storage().get_atom_intention(&node.name)? != Intention::Execute {
        return Ok(None);
    }
    for pred in DepthFirst::new(graph, ix, Direction::Backward) {
        let pred_name = &graph.node(pred).name;
        let pred_state = runtime.storage().get_atom_state(pred_name)?;
        let pred_intention = runtime.storage().get_atom_intention(pred_name)?;
        let satisfied = matches!(pred_state, AtomState::Success | AtomState::Ignore)
            && matches!(pred_intention, Intention::Execute | Intention::Ignore);
        if !satisfied {
            return Ok(None);
        }
    }
    Ok(Some(LateDecider::Ignore(IgnoreDecider::new(
        ix,
        runtime.fetch_edge_deciders(&node.name).to_vec(),
    ))))
}

// An atom is ready to revert when its state can move to REVERTING, its
// intention is REVERT or RETRY, and every successor is PENDING, REVERTED or
// IGNORE.
fn maybe_ready_for_revert(runtime: &Runtime, ix: NodeIx) -> Result<Option<LateDecider>> {
    let graph = runtime.graph();
    let node = graph.node(ix);
    if !node.kind().is_atom() {
        return Ok(None);
    }
    let state = runtime.storage().get_atom_state(&node.name)?;
    if !runtime.check_atom_transition(&node.name, state, AtomState::Reverting) {
        return Ok(None);
    }
    if !matches!(
        runtime.storage().get_atom_intention(&node.name)?,
        Intention::Revert | Intention::Retry
    ) {
        return Ok(None);
    }
    for succ in DepthFirst::new(graph, ix, Direction::Forward) {
        let succ_name = &graph.node(succ).name;
        let succ_state = runtime.storage().get_atom_state(succ_name)?;
        if !matches!(
            succ_state,
            AtomState::Pending | AtomState::Reverted | AtomState::Ignore
        ) {
            return Ok(None);
        }
    }
    Ok(Some(LateDecider::NoOp(NoOpDecider)))
}
