//! Scope walking: which atom names are visible from a given atom.
//!
//! Walks the enclosing-flow hierarchy outward; each level lists the atoms
//! that become visible at that flow. Cached per atom by the runtime for
//! name resolution at argument-binding time.

use crate::graph::{ExecutionGraph, NodeIx};

/// Visible atom names per enclosing scope, innermost first.
#[derive(Debug, Clone, Default)]
pub struct ScopeWalker {
    levels: Vec<Vec<String>>,
}

impl ScopeWalker {
    pub(crate) fn new(graph: &ExecutionGraph, atom: NodeIx) -> Self {
        let mut levels = Vec::new();
        let mut covered: Option<NodeIx> = None;
        let mut current = graph.node(atom).enclosing_flow;
        while let Some(flow) = current {
            let mut level = Vec::new();
            for member in graph.flow_members(flow) {
                if member == atom {
                    continue;
                }
                // Atoms of inner scopes were already listed at a previous level.
                if covered.is_some_and(|prev| graph.inside_flow(member, prev)) {
                    continue;
                }
                level.push(graph.node(member).name.clone());
            }
            levels.push(level);
            covered = Some(flow);
            current = graph.node(flow).enclosing_flow;
        }
        Self { levels }
    }

    /// Visible names grouped by scope, innermost first.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// All visible names, innermost scope first.
    pub fn visible_names(&self) -> impl Iterator<Item = &str> {
        self.levels
            .iter()
            .flat_map(|level| level.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomSpec;
    use crate::compiler::compile;
    use crate::flow::Flow;
    use crate::test_support::noop_task;

    #[test]
    fn nested_atoms_see_inner_scope_before_outer() {
        let mut inner = Flow::linear("inner");
        inner.add_task(AtomSpec::new("sibling"), noop_task()).unwrap();
        inner.add_task(AtomSpec::new("me"), noop_task()).unwrap();

        let mut outer = Flow::linear("outer");
        outer.add_task(AtomSpec::new("before"), noop_task()).unwrap();
        outer.add_flow(inner).unwrap();
        let graph = compile(&outer).unwrap();

        let me = graph.index_of("me").unwrap();
        let walker = ScopeWalker::new(&graph, me);
        assert_eq!(walker.levels().len(), 2);
        assert_eq!(walker.levels()[0], vec!["sibling"]);
        assert_eq!(walker.levels()[1], vec!["before"]);
        let visible: Vec<&str> = walker.visible_names().collect();
        assert_eq!(visible, vec!["sibling", "before"]);
    }

    #[test]
    fn top_level_atoms_see_only_their_own_flow() {
        let mut flow = Flow::linear("lin");
        flow.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        let graph = compile(&flow).unwrap();

        let a = graph.index_of("a").unwrap();
        let walker = ScopeWalker::new(&graph, a);
        assert_eq!(walker.levels().len(), 1);
        assert_eq!(walker.levels()[0], vec!["b"]);
    }
}
