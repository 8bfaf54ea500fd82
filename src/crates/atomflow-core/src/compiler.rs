//! Compilation: nested flows into one immutable execution graph.
//!
//! Each flow becomes a marker node linked in front of its contents, so
//! deciders attached to flow-level links survive expansion. A flow's retry
//! controller, when present, is wired between the marker and the flow's
//! first atoms and becomes the nearest retry owner of everything inside.

use crate::error::{EngineError, Result};
use crate::flow::{Flow, FlowItem, FlowKind};
use crate::graph::{EdgeDeciderSpec, ExecutionGraph, GraphNode, NodeIx, NodeUnit};
use std::collections::HashMap;

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<GraphNode>,
    by_name: HashMap<String, NodeIx>,
    succ: Vec<Vec<NodeIx>>,
    pred: Vec<Vec<NodeIx>>,
    deciders: HashMap<(NodeIx, NodeIx), EdgeDeciderSpec>,
}

impl GraphBuilder {
    fn add_node(
        &mut self,
        name: &str,
        unit: NodeUnit,
        enclosing_flow: Option<NodeIx>,
        retry_owner: Option<NodeIx>,
    ) -> Result<NodeIx> {
        if self.by_name.contains_key(name) {
            return Err(EngineError::compilation(format!(
                "Duplicate node name '{name}' in compiled graph"
            )));
        }
        let ix = self.nodes.len();
        self.nodes.push(GraphNode {
            name: name.to_string(),
            unit,
            retry_owner,
            enclosing_flow,
        });
        self.by_name.insert(name.to_string(), ix);
        self.succ.push(Vec::new());
        self.pred.push(Vec::new());
        Ok(ix)
    }

    fn add_edge(&mut self, u: NodeIx, v: NodeIx) {
        if !self.succ[u].contains(&v) {
            self.succ[u].push(v);
            self.pred[v].push(u);
        }
    }

    fn add_decider_edge(&mut self, u: NodeIx, v: NodeIx, spec: EdgeDeciderSpec) {
        self.add_edge(u, v);
        self.deciders.insert((u, v), spec);
    }
}

// The compiled shape of one item: the node external edges point at, and the
// nodes external edges leave from.
struct Fragment {
    inbound: NodeIx,
    exits: Vec<NodeIx>,
}

/// Compile a root flow into an immutable execution graph.
pub fn compile(flow: &Flow) -> Result<ExecutionGraph> {
    let mut builder = GraphBuilder::default();
    compile_flow(&mut builder, flow, None, None)?;
    let graph = ExecutionGraph::from_parts(
        builder.nodes,
        builder.by_name,
        builder.succ,
        builder.pred,
        builder.deciders,
    );
    validate(&graph)?;
    tracing::debug!(
        flow = flow.name(),
        nodes = graph.len(),
        atoms = graph.iter_atoms().count(),
        "compiled execution graph"
    );
    Ok(graph)
}

fn compile_item(
    builder: &mut GraphBuilder,
    item: &FlowItem,
    enclosing_flow: Option<NodeIx>,
    retry_owner: Option<NodeIx>,
) -> Result<Fragment> {
    match item {
        FlowItem::Task(task) => {
            let ix = builder.add_node(
                &task.spec.name,
                NodeUnit::Task(task.clone()),
                enclosing_flow,
                retry_owner,
            )?;
            Ok(Fragment {
                inbound: ix,
                exits: vec![ix],
            })
        }
        FlowItem::Flow(flow) => compile_flow(builder, flow, enclosing_flow, retry_owner),
    }
}

fn compile_flow(
    builder: &mut GraphBuilder,
    flow: &Flow,
    enclosing_flow: Option<NodeIx>,
    retry_owner: Option<NodeIx>,
) -> Result<Fragment> {
    let marker = builder.add_node(flow.name(), NodeUnit::Flow, enclosing_flow, retry_owner)?;

    // A retry controller sits between the marker and the flow's contents and
    // owns everything compiled inside.
    let (head_source, inner_owner) = match flow.retry() {
        Some(retry) => {
            let rix = builder.add_node(
                &retry.spec.name,
                NodeUnit::Retry(retry.clone()),
                Some(marker),
                retry_owner,
            )?;
            builder.add_edge(marker, rix);
            (rix, Some(rix))
        }
        None => (marker, retry_owner),
    };

    let mut fragments = Vec::with_capacity(flow.len());
    for item in flow.items() {
        fragments.push(compile_item(builder, item, Some(marker), inner_owner)?);
    }

    let exits = match flow.kind() {
        FlowKind::Linear => {
            if let Some(first) = fragments.first() {
                builder.add_edge(head_source, first.inbound);
            }
            for pair in fragments.windows(2) {
                for &exit in &pair[0].exits {
                    builder.add_edge(exit, pair[1].inbound);
                }
            }
            fragments
                .last()
                .map(|last| last.exits.clone())
                .unwrap_or_else(|| vec![head_source])
        }
        FlowKind::Unordered => {
            for fragment in &fragments {
                builder.add_edge(head_source, fragment.inbound);
            }
            if fragments.is_empty() {
                vec![head_source]
            } else {
                fragments
                    .iter()
                    .flat_map(|fragment| fragment.exits.iter().copied())
                    .collect()
            }
        }
        FlowKind::Graph => {
            wire_graph_flow(builder, flow, head_source, &fragments)?
        }
    };

    Ok(Fragment {
        inbound: marker,
        exits,
    })
}

fn wire_graph_flow(
    builder: &mut GraphBuilder,
    flow: &Flow,
    head_source: NodeIx,
    fragments: &[Fragment],
) -> Result<Vec<NodeIx>> {
    let position: HashMap<&str, usize> = flow
        .items()
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.name(), pos))
        .collect();

    // Deciders come from explicit links; dependency edges never carry one.
    let mut deciders: HashMap<(&str, &str), EdgeDeciderSpec> = HashMap::new();
    for link in flow.links() {
        if let Some(decider) = &link.decider {
            deciders.insert(
                (link.from.as_str(), link.to.as_str()),
                EdgeDeciderSpec {
                    decider: decider.clone(),
                    depth: link.depth,
                },
            );
        }
    }

    let mut has_incoming = vec![false; fragments.len()];
    let mut has_outgoing = vec![false; fragments.len()];

    let mut sources: Vec<&String> = flow.adjacency().keys().collect();
    sources.sort();
    for from in sources {
        let Some(&from_pos) = position.get(from.as_str()) else {
            continue;
        };
        let mut targets: Vec<&String> = flow.adjacency()[from].iter().collect();
        targets.sort();
        for to in targets {
            let Some(&to_pos) = position.get(to.as_str()) else {
                continue;
            };
            has_outgoing[from_pos] = true;
            has_incoming[to_pos] = true;
            let decider = deciders.get(&(from.as_str(), to.as_str())).cloned();
            for &exit in &fragments[from_pos].exits {
                match &decider {
                    Some(spec) => {
                        builder.add_decider_edge(exit, fragments[to_pos].inbound, spec.clone())
                    }
                    None => builder.add_edge(exit, fragments[to_pos].inbound),
                }
            }
        }
    }

    for (pos, fragment) in fragments.iter().enumerate() {
        if !has_incoming[pos] {
            builder.add_edge(head_source, fragment.inbound);
        }
    }

    let exits: Vec<NodeIx> = fragments
        .iter()
        .enumerate()
        .filter(|(pos, _)| !has_outgoing[*pos])
        .flat_map(|(_, fragment)| fragment.exits.iter().copied())
        .collect();
    Ok(if exits.is_empty() {
        vec![head_source]
    } else {
        exits
    })
}

// Whole-graph validation after expansion: a topological order must exist,
// and every output symbol must have exactly one producer.
fn validate(graph: &ExecutionGraph) -> Result<()> {
    let mut indegree: Vec<usize> = (0..graph.len())
        .map(|ix| graph.predecessors(ix).len())
        .collect();
    let mut queue: Vec<NodeIx> = (0..graph.len()).filter(|&ix| indegree[ix] == 0).collect();
    let mut processed = 0;
    while let Some(ix) = queue.pop() {
        processed += 1;
        for &next in graph.successors(ix) {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push(next);
            }
        }
    }
    if processed != graph.len() {
        let stuck: Vec<&str> = (0..graph.len())
            .filter(|&ix| indegree[ix] > 0)
            .map(|ix| graph.node(ix).name.as_str())
            .collect();
        return Err(EngineError::compilation(format!(
            "Graph contains a cycle involving: {}",
            stuck.join(", ")
        )));
    }

    let mut providers: HashMap<&str, &str> = HashMap::new();
    for ix in graph.iter_atoms() {
        let node = graph.node(ix);
        let spec = node.spec().expect("atom nodes carry a spec");
        for symbol in &spec.provides {
            if let Some(existing) = providers.insert(symbol, &node.name) {
                return Err(EngineError::compilation(format!(
                    "Symbol '{symbol}' is provided by both '{existing}' and '{}'",
                    node.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AlwaysRevert, AtomSpec};
    use crate::graph::NodeKind;
    use crate::test_support::noop_task;
    use std::sync::Arc;

    #[test]
    fn linear_flow_compiles_to_a_chain() {
        let mut flow = Flow::linear("lin");
        flow.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        let graph = compile(&flow).unwrap();

        let marker = graph.index_of("lin").unwrap();
        let a = graph.index_of("a").unwrap();
        let b = graph.index_of("b").unwrap();
        assert_eq!(graph.node(marker).kind(), NodeKind::Flow);
        assert!(graph.successors(marker).contains(&a));
        assert!(graph.successors(a).contains(&b));
        assert!(graph.successors(b).is_empty());
    }

    #[test]
    fn unordered_flow_has_no_edges_between_items() {
        let mut flow = Flow::unordered("par");
        flow.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        let graph = compile(&flow).unwrap();

        let a = graph.index_of("a").unwrap();
        let b = graph.index_of("b").unwrap();
        assert!(graph.successors(a).is_empty());
        assert!(graph.successors(b).is_empty());
        let marker = graph.index_of("par").unwrap();
        assert_eq!(graph.successors(marker).len(), 2);
    }

    #[test]
    fn graph_flow_orders_by_data_dependencies() {
        let mut flow = Flow::graph("g");
        flow.add_task(AtomSpec::new("sink").requires(["x"]), noop_task())
            .unwrap();
        flow.add_task(AtomSpec::new("source").provides(["x"]), noop_task())
            .unwrap();
        let graph = compile(&flow).unwrap();

        let source = graph.index_of("source").unwrap();
        let sink = graph.index_of("sink").unwrap();
        assert!(graph.successors(source).contains(&sink));
        // Only the source hangs off the marker.
        let marker = graph.index_of("g").unwrap();
        assert_eq!(graph.successors(marker), &[source]);
    }

    #[test]
    fn retry_controller_is_wired_between_marker_and_contents() {
        let mut flow = Flow::linear("guarded");
        flow.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        flow.add_task(AtomSpec::new("b"), noop_task()).unwrap();
        let flow = flow.with_retry(AtomSpec::new("r"), Arc::new(AlwaysRevert));
        let graph = compile(&flow).unwrap();

        let marker = graph.index_of("guarded").unwrap();
        let r = graph.index_of("r").unwrap();
        let a = graph.index_of("a").unwrap();
        let b = graph.index_of("b").unwrap();
        assert_eq!(graph.node(r).kind(), NodeKind::Retry);
        assert_eq!(graph.successors(marker), &[r]);
        assert!(graph.successors(r).contains(&a));
        assert_eq!(graph.find_retry(a), Some(r));
        assert_eq!(graph.find_retry(b), Some(r));
        assert_eq!(graph.find_retry(r), None);
        let scope: Vec<&str> = graph
            .retry_scope(r)
            .into_iter()
            .map(|ix| graph.node(ix).name.as_str())
            .collect();
        assert_eq!(scope, vec!["a", "b"]);
    }

    #[test]
    fn nested_retries_keep_the_nearest_owner() {
        let mut inner = Flow::linear("inner");
        inner.add_task(AtomSpec::new("deep"), noop_task()).unwrap();
        let inner = inner.with_retry(AtomSpec::new("inner_r"), Arc::new(AlwaysRevert));

        let mut outer = Flow::linear("outer");
        outer.add_task(AtomSpec::new("shallow"), noop_task()).unwrap();
        outer.add_flow(inner).unwrap();
        let outer = outer.with_retry(AtomSpec::new("outer_r"), Arc::new(AlwaysRevert));
        let graph = compile(&outer).unwrap();

        let deep = graph.index_of("deep").unwrap();
        let inner_r = graph.index_of("inner_r").unwrap();
        let outer_r = graph.index_of("outer_r").unwrap();
        assert_eq!(graph.find_retry(deep), Some(inner_r));
        assert_eq!(graph.find_retry(inner_r), Some(outer_r));
        assert!(graph.owned_by_retry(deep, outer_r));
    }

    #[test]
    fn duplicate_names_across_flows_fail_compilation() {
        let mut inner = Flow::linear("inner");
        inner.add_task(AtomSpec::new("dup"), noop_task()).unwrap();
        let mut outer = Flow::linear("outer");
        outer.add_task(AtomSpec::new("dup"), noop_task()).unwrap();
        outer.add_flow(inner).unwrap();
        assert!(matches!(
            compile(&outer),
            Err(EngineError::Compilation(_))
        ));
    }

    #[test]
    fn duplicate_providers_across_flows_fail_compilation() {
        let mut inner = Flow::linear("inner");
        inner
            .add_task(AtomSpec::new("a").provides(["x"]), noop_task())
            .unwrap();
        let mut outer = Flow::linear("outer");
        outer
            .add_task(AtomSpec::new("b").provides(["x"]), noop_task())
            .unwrap();
        outer.add_flow(inner).unwrap();
        assert!(matches!(
            compile(&outer),
            Err(EngineError::Compilation(_))
        ));
    }

    #[test]
    fn flow_level_links_carry_deciders_onto_marker_edges() {
        let mut inner = Flow::unordered("inner");
        inner.add_task(AtomSpec::new("b"), noop_task()).unwrap();

        let mut outer = Flow::graph("outer");
        outer.add_task(AtomSpec::new("a"), noop_task()).unwrap();
        outer.add_flow(inner).unwrap();
        outer
            .link_with(
                "a",
                "inner",
                Arc::new(|_: &crate::deciders::DeciderHistory<'_>| false),
                crate::deciders::DeciderDepth::Flow,
            )
            .unwrap();
        let graph = compile(&outer).unwrap();

        let a = graph.index_of("a").unwrap();
        let marker = graph.index_of("inner").unwrap();
        assert!(graph.edge_decider(a, marker).is_some());
        // The atom inside sees no decider on its own inbound edge.
        let b = graph.index_of("b").unwrap();
        assert!(graph.edge_decider(marker, b).is_none());
    }

    #[test]
    fn empty_flow_compiles_to_a_lone_marker() {
        let flow = Flow::linear("empty");
        let graph = compile(&flow).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.iter_atoms().count(), 0);
    }
}
