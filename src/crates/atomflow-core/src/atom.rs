//! Atoms: the work units a workflow is made of.
//!
//! An atom is either a [`Task`] (does forward work, optionally knows how to
//! compensate it) or a [`RetryController`] (owns a subgraph and decides what
//! happens when something inside it fails). Both carry an [`AtomSpec`]
//! describing their name and argument/result wiring.

use async_trait::async_trait;
use atomflow_storage::Failure;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Arguments bound for one execution or reversion, keyed by required symbol.
pub type ArgMap = HashMap<String, Value>;

/// Outcome of running user code: a value, or a captured failure.
pub type AtomResult = std::result::Result<Value, Failure>;

/// Declarative metadata shared by tasks and retry controllers.
#[derive(Debug, Clone, Default)]
pub struct AtomSpec {
    /// Unique name within the workflow
    pub name: String,
    /// Input symbol names bound from storage before execution
    pub requires: Vec<String>,
    /// Output symbol names this atom's result satisfies
    pub provides: Vec<String>,
    /// Argument alias -> storage key overrides
    pub rebind: HashMap<String, String>,
    /// Constants bound without consulting storage
    pub inject: HashMap<String, Value>,
}

impl AtomSpec {
    /// Spec with a name and no wiring.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare required input symbols.
    pub fn requires(mut self, symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Declare provided output symbols.
    pub fn provides(mut self, symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.provides = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Bind the `argument` name to a different storage `key`.
    pub fn rebind(mut self, argument: impl Into<String>, key: impl Into<String>) -> Self {
        self.rebind.insert(argument.into(), key.into());
        self
    }

    /// Bind a constant directly, bypassing storage.
    pub fn inject(mut self, argument: impl Into<String>, value: Value) -> Self {
        self.inject.insert(argument.into(), value);
        self
    }
}

/// Everything a reversion sees: the original arguments plus whatever the
/// forward pass left behind.
#[derive(Debug, Clone)]
pub struct RevertContext {
    /// Arguments bound the same way the forward pass bound them
    pub args: ArgMap,
    /// The forward result, when execution got that far
    pub result: Option<Value>,
    /// The captured failure that triggered compensation
    pub failure: Option<Failure>,
}

/// A unit of forward work with optional compensation.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task. The returned value satisfies the spec's `provides`
    /// symbols (multi-output tasks return an object keyed by symbol).
    async fn execute(&self, args: ArgMap) -> AtomResult;

    /// Undo previously completed work. The default does nothing.
    async fn revert(&self, context: RevertContext) -> AtomResult {
        let _ = context;
        Ok(Value::Null)
    }
}

/// What a retry controller wants done about a failure in its subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Revert the subgraph, then re-drive it
    Retry,
    /// Revert the subgraph and give up on it
    Revert,
    /// Propagate past the retry boundary and revert the whole workflow
    RevertAll,
}

/// A controller atom owning a subgraph.
///
/// The controller executes before its subgraph on every attempt; its result
/// is stored like any task result (the default yields the 1-based attempt
/// number). When a subgraph atom fails, the completer asks
/// [`on_failure`](RetryController::on_failure) what to do next.
#[async_trait]
pub trait RetryController: Send + Sync {
    /// Runs at the start of every attempt. `history` holds the failures
    /// absorbed by earlier attempts, oldest first.
    async fn execute(&self, args: ArgMap, history: Vec<Failure>) -> AtomResult {
        let _ = args;
        Ok(json!(history.len() + 1))
    }

    /// Compensation for the controller itself. The default does nothing.
    async fn revert(&self, context: RevertContext) -> AtomResult {
        let _ = context;
        Ok(Value::Null)
    }

    /// Decide how to handle a failure of `atom` inside this controller's
    /// subgraph. `history` holds previously absorbed failures; the current
    /// one is not yet recorded.
    fn on_failure(&self, atom: &str, failure: &Failure, history: &[Failure]) -> RetryDecision;
}

/// A task bundled with its spec, as stored in the execution graph.
pub struct TaskAtom {
    /// Declarative metadata
    pub spec: AtomSpec,
    /// The user callable
    pub handler: Arc<dyn Task>,
}

/// A retry controller bundled with its spec.
pub struct RetryAtom {
    /// Declarative metadata
    pub spec: AtomSpec,
    /// The user controller
    pub controller: Arc<dyn RetryController>,
}

impl std::fmt::Debug for TaskAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAtom").field("spec", &self.spec).finish()
    }
}

impl std::fmt::Debug for RetryAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryAtom").field("spec", &self.spec).finish()
    }
}

/// Re-drive the subgraph for up to `attempts` total tries, then revert it.
#[derive(Debug, Clone)]
pub struct Times {
    attempts: usize,
    revert_all: bool,
}

impl Times {
    /// Allow `attempts` total tries of the subgraph.
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts,
            revert_all: false,
        }
    }

    /// Escalate to a whole-workflow revert once attempts are exhausted.
    pub fn revert_all_on_exhaustion(mut self) -> Self {
        self.revert_all = true;
        self
    }
}

#[async_trait]
impl RetryController for Times {
    fn on_failure(&self, _atom: &str, _failure: &Failure, history: &[Failure]) -> RetryDecision {
        if history.len() + 1 < self.attempts {
            RetryDecision::Retry
        } else if self.revert_all {
            RetryDecision::RevertAll
        } else {
            RetryDecision::Revert
        }
    }
}

/// Never re-drive; revert this controller's subgraph on any failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRevert;

#[async_trait]
impl RetryController for AlwaysRevert {
    fn on_failure(&self, _atom: &str, _failure: &Failure, _history: &[Failure]) -> RetryDecision {
        RetryDecision::Revert
    }
}

/// Never re-drive; revert the whole workflow on any failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRevertAll;

#[async_trait]
impl RetryController for AlwaysRevertAll {
    fn on_failure(&self, _atom: &str, _failure: &Failure, _history: &[Failure]) -> RetryDecision {
        RetryDecision::RevertAll
    }
}
