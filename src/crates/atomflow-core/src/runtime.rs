//! The runtime aggregate: everything the engine loop reads while running.
//!
//! Holds the compiled graph, the storage adapter, the notifier, the per-kind
//! actions, and a per-atom metadata cache built once up front (edge
//! deciders, scope walker, kind tag for the dispatch tables). The analyzer,
//! scheduler and completer all borrow this.

use crate::actions::{RetryAction, TaskAction};
use crate::deciders::EdgeDecider;
use crate::error::{EngineError, Result};
use crate::executor::AtomExecutor;
use crate::graph::{ExecutionGraph, NodeIx, NodeKind, NodeUnit};
use crate::notifier::Notifier;
use crate::scopes::ScopeWalker;
use atomflow_storage::{
    check_retry_transition, check_task_transition, AtomState, Intention, Storage,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Cached per-atom metadata, built once and then read-only.
#[derive(Debug)]
pub struct AtomMetadata {
    /// Task or retry; keys the dispatch tables
    pub kind: NodeKind,
    /// Every edge decider gating this atom, collected through flow markers
    pub edge_deciders: Vec<EdgeDecider>,
    /// Names visible from this atom, per enclosing scope
    pub scope_walker: ScopeWalker,
}

/// Aggregate of runtime collaborators used during one workflow execution.
pub struct Runtime {
    graph: Arc<ExecutionGraph>,
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
    task_action: Arc<TaskAction>,
    retry_action: Arc<RetryAction>,
    atom_cache: HashMap<String, AtomMetadata>,
}

impl Runtime {
    /// Assemble a runtime and build the per-atom cache.
    pub fn new(
        graph: Arc<ExecutionGraph>,
        storage: Arc<dyn Storage>,
        notifier: Arc<Notifier>,
        task_executor: Arc<dyn AtomExecutor>,
        retry_executor: Arc<dyn AtomExecutor>,
    ) -> Self {
        let task_action = Arc::new(TaskAction::new(
            storage.clone(),
            notifier.clone(),
            task_executor,
        ));
        let retry_action = Arc::new(RetryAction::new(
            storage.clone(),
            notifier.clone(),
            retry_executor,
        ));
        let mut atom_cache = HashMap::new();
        for ix in graph.iter_atoms() {
            let node = graph.node(ix);
            atom_cache.insert(
                node.name.clone(),
                AtomMetadata {
                    kind: node.kind(),
                    edge_deciders: walk_edge_deciders(&graph, ix),
                    scope_walker: ScopeWalker::new(&graph, ix),
                },
            );
        }
        Self {
            graph,
            storage,
            notifier,
            task_action,
            retry_action,
            atom_cache,
        }
    }

    /// The compiled graph.
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// The storage adapter.
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// The storage adapter, shared.
    pub fn storage_arc(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    /// The notification sink.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// The task action.
    pub fn task_action(&self) -> &TaskAction {
        &self.task_action
    }

    /// The retry action.
    pub fn retry_action(&self) -> &RetryAction {
        &self.retry_action
    }

    /// Whether `name` may move from `current` to `target`, per its kind's
    /// transition table.
    pub fn check_atom_transition(
        &self,
        name: &str,
        current: AtomState,
        target: AtomState,
    ) -> bool {
        match self.atom_cache.get(name).map(|meta| meta.kind) {
            Some(NodeKind::Task) => check_task_transition(current, target),
            Some(NodeKind::Retry) => check_retry_transition(current, target),
            _ => false,
        }
    }

    /// Edge deciders gating `name`, from the cache.
    pub fn fetch_edge_deciders(&self, name: &str) -> &[EdgeDecider] {
        self.atom_cache
            .get(name)
            .map(|meta| meta.edge_deciders.as_slice())
            .unwrap_or(&[])
    }

    /// Scope walker for `name`, when such an atom exists.
    pub fn fetch_scopes_for(&self, name: &str) -> Option<&ScopeWalker> {
        self.atom_cache.get(name).map(|meta| &meta.scope_walker)
    }

    /// Apply a state change through the right action for the node's kind.
    pub fn change_state(
        &self,
        ix: NodeIx,
        state: AtomState,
        progress: Option<f64>,
    ) -> Result<bool> {
        let node = self.graph.node(ix);
        match node.kind() {
            NodeKind::Task => self.task_action.change_state(&node.name, state, progress),
            NodeKind::Retry => self.retry_action.change_state(&node.name, state),
            NodeKind::Flow => Err(EngineError::Execution(format!(
                "flow marker '{}' holds no state",
                node.name
            ))),
        }
    }

    /// Reset the given atoms to a state and/or intention. Resetting to
    /// `PENDING` also drops recorded results and failures. Returns the
    /// names touched.
    pub fn reset_atoms(
        &self,
        atoms: &[NodeIx],
        state: Option<AtomState>,
        intention: Option<Intention>,
    ) -> Result<Vec<String>> {
        let mut tweaked = Vec::with_capacity(atoms.len());
        for &ix in atoms {
            let node = self.graph.node(ix);
            if !node.kind().is_atom() {
                continue;
            }
            if let Some(state) = state {
                self.change_state(ix, state, Some(0.0))?;
                if state == AtomState::Pending {
                    self.storage.clear_result(&node.name)?;
                }
            }
            if let Some(intention) = intention {
                self.storage.set_atom_intention(&node.name, intention)?;
            }
            tweaked.push(node.name.clone());
        }
        Ok(tweaked)
    }

    /// Reset every atom in the graph.
    pub fn reset_all(
        &self,
        state: Option<AtomState>,
        intention: Option<Intention>,
    ) -> Result<Vec<String>> {
        let atoms: Vec<NodeIx> = self.graph.iter_atoms().collect();
        self.reset_atoms(&atoms, state, intention)
    }

    /// Reset the atoms inside a retry controller's scope.
    pub fn reset_subgraph(
        &self,
        retry: NodeIx,
        state: Option<AtomState>,
        intention: Option<Intention>,
    ) -> Result<Vec<String>> {
        let scope = self.graph.retry_scope(retry);
        self.reset_atoms(&scope, state, intention)
    }

    /// Prepare a retry controller and its subgraph for another attempt: the
    /// controller's intention back to `EXECUTE`, its scope back to
    /// `PENDING`/`EXECUTE`.
    pub fn retry_subflow(&self, retry: NodeIx) -> Result<Vec<String>> {
        let mut tweaked = self.reset_atoms(&[retry], None, Some(Intention::Execute))?;
        tweaked.extend(self.reset_subgraph(
            retry,
            Some(AtomState::Pending),
            Some(Intention::Execute),
        )?);
        Ok(tweaked)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.graph.len())
            .field("cached_atoms", &self.atom_cache.len())
            .finish()
    }
}

// Reverse breadth-first exploration collecting the deciders that gate one
// atom. Flow markers are jumped through so a decider aimed at a flow-level
// inbound edge reaches every atom directly inside that flow; the visited
// set keeps a flow from being re-explored when reached along another path.
fn walk_edge_deciders(graph: &ExecutionGraph, atom: NodeIx) -> Vec<EdgeDecider> {
    let mut found = Vec::new();
    let mut nodes: VecDeque<(NodeIx, NodeIx)> = graph
        .predecessors(atom)
        .iter()
        .map(|&u| (u, atom))
        .collect();
    let mut visited: HashSet<NodeIx> = HashSet::new();
    while let Some((u, v)) = nodes.pop_front() {
        let u_node = graph.node(u);
        if let Some(spec) = graph.edge_decider(u, v) {
            found.push(EdgeDecider {
                source: u_node.name.clone(),
                source_kind: u_node.kind(),
                depth: spec.depth,
                decider: spec.decider.clone(),
            });
        }
        if u_node.kind() == NodeKind::Flow && visited.insert(u) {
            nodes.extend(graph.predecessors(u).iter().map(|&uu| (uu, u)));
        }
    }
    found
}

/// Payload accessors used by the scheduler and completer.
pub(crate) fn task_payload(
    graph: &ExecutionGraph,
    ix: NodeIx,
) -> Result<Arc<crate::atom::TaskAtom>> {
    match &graph.node(ix).unit {
        NodeUnit::Task(task) => Ok(task.clone()),
        _ => Err(EngineError::Execution(format!(
            "node '{}' is not a task",
            graph.node(ix).name
        ))),
    }
}

pub(crate) fn retry_payload(
    graph: &ExecutionGraph,
    ix: NodeIx,
) -> Result<Arc<crate::atom::RetryAtom>> {
    match &graph.node(ix).unit {
        NodeUnit::Retry(retry) => Ok(retry.clone()),
        _ => Err(EngineError::Execution(format!(
            "node '{}' is not a retry controller",
            graph.node(ix).name
        ))),
    }
}
