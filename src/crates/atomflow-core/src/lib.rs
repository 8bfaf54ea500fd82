//! # atomflow-core - Action Engine for Workflow Orchestration
//!
//! A workflow is a directed acyclic graph of *atoms* (tasks and retry
//! controllers) organized in nested *flows*. This crate compiles flows into
//! an immutable execution graph and drives it in dependency order: atoms
//! run as soon as their predecessors finish, failures are captured into
//! envelopes, and recovery either compensates completed work (revert) or
//! re-drives a retry controller's subgraph.
//!
//! ## Core pieces
//!
//! - [`Flow`] - construction DSL: linear / unordered / graph patterns,
//!   deciders on links, retry controllers on flows
//! - [`compiler`] - flow expansion into the immutable [`ExecutionGraph`]
//! - [`Analyzer`] - ready-to-execute / ready-to-revert frontier computation
//! - [`deciders`] - edge predicates that can suppress subtrees via `IGNORE`
//! - [`actions`] / [`scheduler`] - per-kind state transitions and executor
//!   dispatch
//! - [`Completer`] - applies finished envelopes, consults retry controllers
//! - [`MachineBuilder`] - the schedule / wait-for-any / complete loop
//! - [`ActionEngine`] - the facade: compile, prepare, validate, run
//!
//! Persistence lives in the `atomflow-storage` crate; the engine only talks
//! to the [`Storage`](atomflow_storage::Storage) trait.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use atomflow_core::{ActionEngine, AtomSpec, Flow};
//! use atomflow_storage::MemoryStorage;
//! use std::sync::Arc;
//!
//! let mut flow = Flow::linear("pipeline");
//! flow.add_task(AtomSpec::new("fetch").provides(["document"]), Arc::new(Fetch))?;
//! flow.add_task(AtomSpec::new("index").requires(["document"]), Arc::new(Index))?;
//!
//! let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new()))?;
//! let verdict = engine.run().await?;
//! ```

pub mod actions;
pub mod analyzer;
pub mod atom;
pub mod builder;
pub mod compiler;
pub mod completer;
pub mod deciders;
pub mod engine;
pub mod error;
pub mod executor;
pub mod flow;
pub mod graph;
pub mod notifier;
pub mod runtime;
pub mod scheduler;
pub mod scopes;
pub mod traversal;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use actions::{RetryAction, TaskAction};
pub use analyzer::Analyzer;
pub use atom::{
    AlwaysRevert, AlwaysRevertAll, ArgMap, AtomResult, AtomSpec, RetryController,
    RetryDecision, RevertContext, Task, Times,
};
pub use builder::{EngineVerdict, MachineBuilder, MachineState};
pub use compiler::compile;
pub use completer::Completer;
pub use deciders::{DeciderDepth, DeciderFn, DeciderHistory, IgnoreDecider, NoOpDecider};
pub use engine::{ActionEngine, EngineOptions, Suspender};
pub use error::{EngineError, Result};
pub use executor::{
    AtomExecutor, AtomFuture, DirectExecutor, Envelope, Phase, Submission, TokioExecutor,
};
pub use flow::{Flow, FlowItem, FlowKind};
pub use graph::{ExecutionGraph, GraphNode, NodeIx, NodeKind, NodeUnit};
pub use notifier::{AtomEvent, AtomEventKind, Listener, Notifier};
pub use runtime::Runtime;
pub use scheduler::{RetryScheduler, Scheduler, TaskScheduler};
pub use scopes::ScopeWalker;
pub use traversal::{BreadthFirst, DepthFirst, Direction};
