//! Lazy traversals over the execution graph.
//!
//! Both iterators yield atom nodes only; flow markers are expanded through
//! without being yielded. Consumers that stop early stop the walk: no
//! further adjacency is touched once iteration ends.

use crate::graph::{ExecutionGraph, NodeIx, NodeKind};
use std::collections::{HashSet, VecDeque};

/// Which adjacency a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow successor edges
    Forward,
    /// Follow predecessor edges
    Backward,
}

fn neighbors<'g>(graph: &'g ExecutionGraph, ix: NodeIx, direction: Direction) -> &'g [NodeIx] {
    match direction {
        Direction::Forward => graph.successors(ix),
        Direction::Backward => graph.predecessors(ix),
    }
}

/// Breadth-first walk of the nodes connected to a root (the root itself is
/// not yielded).
///
/// With `through_retries` off, retry controllers are yielded but never
/// expanded past: a retry owns its subgraph, and predecessor exploration
/// must not cross that boundary.
pub struct BreadthFirst<'g> {
    graph: &'g ExecutionGraph,
    direction: Direction,
    through_retries: bool,
    queue: VecDeque<NodeIx>,
    visited: HashSet<NodeIx>,
}

impl<'g> BreadthFirst<'g> {
    /// Walk outward from `root` in the given direction.
    pub fn new(
        graph: &'g ExecutionGraph,
        root: NodeIx,
        direction: Direction,
        through_retries: bool,
    ) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root);
        let mut queue = VecDeque::new();
        for &next in neighbors(graph, root, direction) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
        Self {
            graph,
            direction,
            through_retries,
            queue,
            visited,
        }
    }

    fn expand(&mut self, ix: NodeIx) {
        for &next in neighbors(self.graph, ix, self.direction) {
            if self.visited.insert(next) {
                self.queue.push_back(next);
            }
        }
    }
}

impl Iterator for BreadthFirst<'_> {
    type Item = NodeIx;

    fn next(&mut self) -> Option<NodeIx> {
        while let Some(ix) = self.queue.pop_front() {
            match self.graph.node(ix).kind() {
                NodeKind::Flow => self.expand(ix),
                NodeKind::Retry if !self.through_retries => return Some(ix),
                NodeKind::Task | NodeKind::Retry => {
                    self.expand(ix);
                    return Some(ix);
                }
            }
        }
        None
    }
}

/// Depth-first walk of the nodes connected to a root (the root itself is
/// not yielded). Used by the readiness checks, which stop at the first
/// blocking neighbor.
pub struct DepthFirst<'g> {
    graph: &'g ExecutionGraph,
    direction: Direction,
    stack: Vec<NodeIx>,
    visited: HashSet<NodeIx>,
}

impl<'g> DepthFirst<'g> {
    /// Walk outward from `root` in the given direction.
    pub fn new(graph: &'g ExecutionGraph, root: NodeIx, direction: Direction) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root);
        let mut stack = Vec::new();
        for &next in neighbors(graph, root, direction) {
            if visited.insert(next) {
                stack.push(next);
            }
        }
        Self {
            graph,
            direction,
            stack,
            visited,
        }
    }
}

impl Iterator for DepthFirst<'_> {
    type Item = NodeIx;

    fn next(&mut self) -> Option<NodeIx> {
        while let Some(ix) = self.stack.pop() {
            for &next in neighbors(self.graph, ix, self.direction) {
                if self.visited.insert(next) {
                    self.stack.push(next);
                }
            }
            if self.graph.node(ix).kind().is_atom() {
                return Some(ix);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::flow::Flow;
    use crate::test_support::noop_task;
    use crate::atom::{AlwaysRevert, AtomSpec};
    use std::sync::Arc;

    fn names(graph: &ExecutionGraph, it: impl Iterator<Item = NodeIx>) -> Vec<String> {
        it.map(|ix| graph.node(ix).name.clone()).collect()
    }

    fn linear_abc() -> ExecutionGraph {
        let mut flow = Flow::linear("lin");
        flow.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("c"), noop_task()).unwrap();
        compile(&flow).unwrap()
    }

    #[test]
    fn breadth_first_forward_skips_flow_markers() {
        let graph = linear_abc();
        let a = graph.index_of("a").unwrap();
        let walked = names(
            &graph,
            BreadthFirst::new(&graph, a, Direction::Forward, true),
        );
        assert_eq!(walked, vec!["b", "c"]);
    }

    #[test]
    fn breadth_first_backward_walks_predecessors() {
        let graph = linear_abc();
        let c = graph.index_of("c").unwrap();
        let walked = names(
            &graph,
            BreadthFirst::new(&graph, c, Direction::Backward, true),
        );
        assert_eq!(walked, vec!["b", "a"]);
    }

    #[test]
    fn backward_walk_stops_at_retry_boundary() {
        let mut inner = Flow::linear("guarded");
        inner.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        inner.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        let inner = inner.with_retry(AtomSpec::new("r"), Arc::new(AlwaysRevert));

        let mut outer = Flow::linear("outer");
        outer.add_task(AtomSpec::new("before"), noop_task()).unwrap();
        outer.add_flow(inner).unwrap();
        let graph = compile(&outer).unwrap();

        let b = graph.index_of("b").unwrap();
        let walked = names(
            &graph,
            BreadthFirst::new(&graph, b, Direction::Backward, false),
        );
        // The retry is yielded but not crossed, so `before` stays hidden.
        assert_eq!(walked, vec!["a", "r"]);
    }

    #[test]
    fn depth_first_stops_when_consumer_stops() {
        let graph = linear_abc();
        let a = graph.index_of("a").unwrap();
        let mut walk = DepthFirst::new(&graph, a, Direction::Forward);
        assert_eq!(graph.node(walk.next().unwrap()).name, "b");
        // Dropping the iterator here leaves `c` untouched.
    }
}
