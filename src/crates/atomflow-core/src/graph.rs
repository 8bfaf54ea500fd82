//! The compiled execution graph.
//!
//! Compilation (see [`compiler`](crate::compiler)) expands nested flows into
//! one immutable DAG. Nodes are atoms *and* flow markers; markers carry no
//! work but keep flow-level edge deciders addressable after expansion.
//! Traversal routines skip them for state queries and visit them for decider
//! collection.

use crate::atom::{AtomSpec, RetryAtom, TaskAtom};
use crate::deciders::{DeciderDepth, DeciderFn};
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a node in the execution graph.
pub type NodeIx = usize;

/// What a node in the compiled graph is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Transparent marker left behind by flow expansion
    Flow,
    /// A task atom
    Task,
    /// A retry controller atom
    Retry,
}

impl NodeKind {
    /// Whether this node is schedulable work (not a marker).
    pub fn is_atom(&self) -> bool {
        !matches!(self, NodeKind::Flow)
    }
}

/// Node payload: marker or atom.
#[derive(Debug, Clone)]
pub enum NodeUnit {
    /// Flow marker
    Flow,
    /// Task payload
    Task(Arc<TaskAtom>),
    /// Retry controller payload
    Retry(Arc<RetryAtom>),
}

/// One node of the compiled graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Unique node name
    pub name: String,
    /// Marker or atom payload
    pub unit: NodeUnit,
    /// Nearest enclosing retry controller, if any
    pub retry_owner: Option<NodeIx>,
    /// Flow marker this node sits directly inside, if any
    pub enclosing_flow: Option<NodeIx>,
}

impl GraphNode {
    /// Kind tag used by dispatch tables.
    pub fn kind(&self) -> NodeKind {
        match self.unit {
            NodeUnit::Flow => NodeKind::Flow,
            NodeUnit::Task(_) => NodeKind::Task,
            NodeUnit::Retry(_) => NodeKind::Retry,
        }
    }

    /// The atom spec, for atom nodes.
    pub fn spec(&self) -> Option<&AtomSpec> {
        match &self.unit {
            NodeUnit::Flow => None,
            NodeUnit::Task(task) => Some(&task.spec),
            NodeUnit::Retry(retry) => Some(&retry.spec),
        }
    }
}

/// A decider predicate attached to one edge.
#[derive(Clone)]
pub struct EdgeDeciderSpec {
    /// The predicate; false suppresses the edge target
    pub decider: DeciderFn,
    /// How far a false verdict propagates
    pub depth: DeciderDepth,
}

impl std::fmt::Debug for EdgeDeciderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeDeciderSpec")
            .field("depth", &self.depth)
            .finish()
    }
}

/// Immutable compiled DAG of atoms and flow markers.
///
/// Built once by the compiler, then only read. All mutation during
/// construction happens inside the compiler's builder, which validates
/// before freezing into this value.
#[derive(Debug)]
pub struct ExecutionGraph {
    nodes: Vec<GraphNode>,
    by_name: HashMap<String, NodeIx>,
    succ: Vec<Vec<NodeIx>>,
    pred: Vec<Vec<NodeIx>>,
    deciders: HashMap<(NodeIx, NodeIx), EdgeDeciderSpec>,
}

impl ExecutionGraph {
    pub(crate) fn from_parts(
        nodes: Vec<GraphNode>,
        by_name: HashMap<String, NodeIx>,
        succ: Vec<Vec<NodeIx>>,
        pred: Vec<Vec<NodeIx>>,
        deciders: HashMap<(NodeIx, NodeIx), EdgeDeciderSpec>,
    ) -> Self {
        Self {
            nodes,
            by_name,
            succ,
            pred,
            deciders,
        }
    }

    /// Number of nodes, markers included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by index.
    pub fn node(&self, ix: NodeIx) -> &GraphNode {
        &self.nodes[ix]
    }

    /// Index of the node named `name`.
    pub fn index_of(&self, name: &str) -> Option<NodeIx> {
        self.by_name.get(name).copied()
    }

    /// Direct successors of a node.
    pub fn successors(&self, ix: NodeIx) -> &[NodeIx] {
        &self.succ[ix]
    }

    /// Direct predecessors of a node.
    pub fn predecessors(&self, ix: NodeIx) -> &[NodeIx] {
        &self.pred[ix]
    }

    /// The decider carried by edge `u -> v`, if any.
    pub fn edge_decider(&self, u: NodeIx, v: NodeIx) -> Option<&EdgeDeciderSpec> {
        self.deciders.get(&(u, v))
    }

    /// All atom nodes (tasks and retries), in insertion order.
    pub fn iter_atoms(&self) -> impl Iterator<Item = NodeIx> + '_ {
        (0..self.nodes.len()).filter(|&ix| self.nodes[ix].kind().is_atom())
    }

    /// All retry controller nodes, in insertion order.
    pub fn iter_retries(&self) -> impl Iterator<Item = NodeIx> + '_ {
        (0..self.nodes.len()).filter(|&ix| self.nodes[ix].kind() == NodeKind::Retry)
    }

    /// Nearest retry controller owning `ix`, if any.
    pub fn find_retry(&self, ix: NodeIx) -> Option<NodeIx> {
        self.nodes[ix].retry_owner
    }

    /// Whether `ix` sits (transitively) inside retry controller `retry`.
    pub fn owned_by_retry(&self, ix: NodeIx, retry: NodeIx) -> bool {
        let mut current = self.nodes[ix].retry_owner;
        while let Some(owner) = current {
            if owner == retry {
                return true;
            }
            current = self.nodes[owner].retry_owner;
        }
        false
    }

    /// Atoms inside `retry`'s scope (the controller itself excluded), in
    /// insertion order.
    pub fn retry_scope(&self, retry: NodeIx) -> Vec<NodeIx> {
        self.iter_atoms()
            .filter(|&ix| ix != retry && self.owned_by_retry(ix, retry))
            .collect()
    }

    /// Whether `ix` sits (transitively) inside flow marker `flow`.
    pub fn inside_flow(&self, ix: NodeIx, flow: NodeIx) -> bool {
        let mut current = self.nodes[ix].enclosing_flow;
        while let Some(enclosing) = current {
            if enclosing == flow {
                return true;
            }
            current = self.nodes[enclosing].enclosing_flow;
        }
        false
    }

    /// Atoms inside flow marker `flow`, in insertion order.
    pub fn flow_members(&self, flow: NodeIx) -> Vec<NodeIx> {
        self.iter_atoms()
            .filter(|&ix| self.inside_flow(ix, flow))
            .collect()
    }
}
