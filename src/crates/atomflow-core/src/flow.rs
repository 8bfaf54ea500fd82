//! Flow construction: the patterns a workflow is assembled from.
//!
//! A [`Flow`] groups atoms and subflows under one of three patterns:
//!
//! - **linear** - items run one after another in insertion order
//! - **unordered** - items run with no ordering between them
//! - **graph** - ordering derived from `provides`/`requires` matching plus
//!   explicit [`link`](Flow::link)s, which may carry deciders
//!
//! Graph flows keep the invariant that their item graph is always acyclic:
//! every mutation builds a temporary copy, validates it, and only then swaps
//! it in.

use crate::atom::{AtomSpec, RetryAtom, RetryController, Task, TaskAtom};
use crate::deciders::{DeciderDepth, DeciderFn};
use crate::error::{EngineError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Ordering pattern of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Implicit sequential edges in insertion order
    Linear,
    /// No internal edges
    Unordered,
    /// Edges resolved from provides/requires plus explicit links
    Graph,
}

/// An item inside a flow: a task or a nested flow.
pub enum FlowItem {
    /// A task atom
    Task(Arc<TaskAtom>),
    /// A nested flow
    Flow(Flow),
}

impl FlowItem {
    /// Name of the item.
    pub fn name(&self) -> &str {
        match self {
            FlowItem::Task(task) => &task.spec.name,
            FlowItem::Flow(flow) => flow.name(),
        }
    }

    /// Output symbols this item produces.
    pub fn provides(&self) -> HashSet<String> {
        match self {
            FlowItem::Task(task) => task.spec.provides.iter().cloned().collect(),
            FlowItem::Flow(flow) => flow.provides(),
        }
    }

    /// Input symbols this item needs from outside itself. Injected
    /// constants do not count.
    pub fn requires(&self) -> HashSet<String> {
        match self {
            FlowItem::Task(task) => task
                .spec
                .requires
                .iter()
                .filter(|symbol| !task.spec.inject.contains_key(*symbol))
                .cloned()
                .collect(),
            FlowItem::Flow(flow) => flow.requires(),
        }
    }
}

/// An explicit edge between two items of a graph flow.
pub struct FlowLink {
    /// Source item name
    pub from: String,
    /// Target item name
    pub to: String,
    /// Optional predicate gating the target
    pub decider: Option<DeciderFn>,
    /// How far a false verdict propagates
    pub depth: DeciderDepth,
}

/// A named grouping of atoms and subflows.
pub struct Flow {
    name: String,
    uuid: Uuid,
    kind: FlowKind,
    items: Vec<FlowItem>,
    index: HashMap<String, usize>,
    links: Vec<FlowLink>,
    // item-level adjacency (dependency + link edges), graph flows only;
    // mutated through copy-validate-swap
    adjacency: HashMap<String, HashSet<String>>,
    retry: Option<Arc<RetryAtom>>,
}

impl Flow {
    fn new(name: impl Into<String>, kind: FlowKind) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            kind,
            items: Vec::new(),
            index: HashMap::new(),
            links: Vec::new(),
            adjacency: HashMap::new(),
            retry: None,
        }
    }

    /// Flow whose items run sequentially.
    pub fn linear(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Linear)
    }

    /// Flow whose items have no ordering between them.
    pub fn unordered(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Unordered)
    }

    /// Flow whose ordering comes from data dependencies and explicit links.
    pub fn graph(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Graph)
    }

    /// Attach a retry controller owning everything inside this flow.
    pub fn with_retry(
        mut self,
        spec: AtomSpec,
        controller: Arc<dyn RetryController>,
    ) -> Self {
        self.retry = Some(Arc::new(RetryAtom { spec, controller }));
        self
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flow identity, assigned at construction.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The ordering pattern.
    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Number of direct items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the flow has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add a task.
    pub fn add_task(&mut self, spec: AtomSpec, handler: Arc<dyn Task>) -> Result<&mut Self> {
        self.add_item(FlowItem::Task(Arc::new(TaskAtom { spec, handler })))
    }

    /// Add a nested flow.
    pub fn add_flow(&mut self, flow: Flow) -> Result<&mut Self> {
        self.add_item(FlowItem::Flow(flow))
    }

    /// Add an item, resolving dependency edges for graph flows.
    pub fn add_item(&mut self, item: FlowItem) -> Result<&mut Self> {
        let name = item.name().to_string();
        if self.index.contains_key(&name) {
            return Err(EngineError::compilation(format!(
                "Flow '{}' already contains an item named '{name}'",
                self.name
            )));
        }
        if self.kind == FlowKind::Graph {
            self.resolve_into_adjacency(&item)?;
        }
        self.index.insert(name, self.items.len());
        self.items.push(item);
        Ok(self)
    }

    // Dependency resolution for graph flows: edges from providers to
    // requirers among sibling items, validated on a temporary copy before
    // replacing the adjacency.
    fn resolve_into_adjacency(&mut self, item: &FlowItem) -> Result<()> {
        let mut provided: HashMap<String, String> = HashMap::new();
        let mut required: HashMap<String, Vec<String>> = HashMap::new();
        for existing in &self.items {
            for symbol in existing.provides() {
                provided.insert(symbol, existing.name().to_string());
            }
            for symbol in existing.requires() {
                required
                    .entry(symbol)
                    .or_default()
                    .push(existing.name().to_string());
            }
        }

        let mut tmp = self.adjacency.clone();
        tmp.entry(item.name().to_string()).or_default();
        for symbol in item.provides() {
            if let Some(provider) = provided.get(&symbol) {
                return Err(EngineError::dependency(format!(
                    "'{}' provides '{symbol}' but it is already provided by \
                     '{provider}' and duplicate producers are disallowed",
                    item.name()
                )));
            }
            if let Some(requirers) = required.get(&symbol) {
                for requirer in requirers {
                    tmp.entry(item.name().to_string())
                        .or_default()
                        .insert(requirer.clone());
                }
            }
        }
        for symbol in item.requires() {
            if let Some(provider) = provided.get(&symbol) {
                tmp.entry(provider.clone())
                    .or_default()
                    .insert(item.name().to_string());
            }
        }
        self.swap_adjacency(tmp)?;
        Ok(())
    }

    /// Add an explicit ordering edge between two items of a graph flow.
    pub fn link(&mut self, from: &str, to: &str) -> Result<&mut Self> {
        self.link_impl(from, to, None, DeciderDepth::default())
    }

    /// Add an ordering edge gated by a decider predicate.
    pub fn link_with(
        &mut self,
        from: &str,
        to: &str,
        decider: DeciderFn,
        depth: DeciderDepth,
    ) -> Result<&mut Self> {
        self.link_impl(from, to, Some(decider), depth)
    }

    fn link_impl(
        &mut self,
        from: &str,
        to: &str,
        decider: Option<DeciderFn>,
        depth: DeciderDepth,
    ) -> Result<&mut Self> {
        if self.kind != FlowKind::Graph {
            return Err(EngineError::compilation(format!(
                "Flow '{}' is not a graph flow; only graph flows support explicit links",
                self.name
            )));
        }
        if !self.index.contains_key(from) {
            return Err(EngineError::compilation(format!(
                "Item '{from}' not found to link from"
            )));
        }
        if !self.index.contains_key(to) {
            return Err(EngineError::compilation(format!(
                "Item '{to}' not found to link to"
            )));
        }
        let already_linked = self
            .adjacency
            .get(from)
            .is_some_and(|targets| targets.contains(to));
        if !already_linked {
            let mut tmp = self.adjacency.clone();
            tmp.entry(from.to_string())
                .or_default()
                .insert(to.to_string());
            self.swap_adjacency(tmp)?;
        }
        self.links.push(FlowLink {
            from: from.to_string(),
            to: to.to_string(),
            decider,
            depth,
        });
        Ok(self)
    }

    fn swap_adjacency(&mut self, replacement: HashMap<String, HashSet<String>>) -> Result<()> {
        // The item being added is an adjacency key but not yet in `items`,
        // so the node set must take both into account.
        let names = self
            .items
            .iter()
            .map(FlowItem::name)
            .chain(replacement.keys().map(String::as_str));
        if !is_acyclic(names, &replacement) {
            return Err(EngineError::dependency(format!(
                "No path through the items in flow '{}' produces an ordering \
                 that allows for correct dependency resolution",
                self.name
            )));
        }
        self.adjacency = replacement;
        Ok(())
    }

    /// Output symbols produced anywhere inside this flow.
    pub fn provides(&self) -> HashSet<String> {
        let mut out: HashSet<String> = self
            .items
            .iter()
            .flat_map(FlowItem::provides)
            .collect();
        if let Some(retry) = &self.retry {
            out.extend(retry.spec.provides.iter().cloned());
        }
        out
    }

    /// Input symbols this flow needs from outside itself.
    pub fn requires(&self) -> HashSet<String> {
        let provides = self.provides();
        let mut out: HashSet<String> = self
            .items
            .iter()
            .flat_map(FlowItem::requires)
            .collect();
        if let Some(retry) = &self.retry {
            out.extend(retry.spec.requires.iter().cloned());
        }
        out.retain(|symbol| !provides.contains(symbol));
        out
    }

    pub(crate) fn items(&self) -> &[FlowItem] {
        &self.items
    }

    pub(crate) fn links(&self) -> &[FlowLink] {
        &self.links
    }

    pub(crate) fn retry(&self) -> Option<&Arc<RetryAtom>> {
        self.retry.as_ref()
    }

    pub(crate) fn adjacency(&self) -> &HashMap<String, HashSet<String>> {
        &self.adjacency
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("items", &self.items.len())
            .field("links", &self.links.len())
            .field("retry", &self.retry.as_ref().map(|r| r.spec.name.clone()))
            .finish()
    }
}

// Kahn's algorithm over the item-level adjacency.
fn is_acyclic<'a>(
    names: impl Iterator<Item = &'a str>,
    adjacency: &'a HashMap<String, HashSet<String>>,
) -> bool {
    let mut indegree: HashMap<&str, usize> = names.map(|n| (n, 0)).collect();
    for targets in adjacency.values() {
        for target in targets {
            if let Some(count) = indegree.get_mut(target.as_str()) {
                *count += 1;
            }
        }
    }
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut processed = 0;
    while let Some(name) = queue.pop() {
        processed += 1;
        if let Some(targets) = adjacency.get(name) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push(target.as_str());
                    }
                }
            }
        }
    }
    processed == indegree.len()
}
