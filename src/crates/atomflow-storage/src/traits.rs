//! The storage adapter trait the engine mutates through.
//!
//! During execution the engine loop is the single writer; implementations
//! only need interior mutability that is safe for concurrent readers (the
//! bundled [`MemoryStorage`](crate::MemoryStorage) uses a `parking_lot`
//! read/write lock). The API is synchronous on purpose: the analyzer walks
//! atom states inside lazy iterators, and backends with slow media are
//! expected to buffer writes rather than block the scheduling cycle.

use crate::error::Result;
use crate::failure::Failure;
use crate::states::{AtomState, Intention};
use serde_json::Value;
use std::collections::HashMap;

/// Registration record for one atom.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRegistration {
    /// Unique atom name
    pub name: String,
    /// Output symbols this atom produces
    pub provides: Vec<String>,
}

impl AtomRegistration {
    /// Registration with no outputs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provides: Vec::new(),
        }
    }

    /// Declare the output symbols this atom produces.
    pub fn provides(mut self, provides: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.provides = provides.into_iter().map(Into::into).collect();
        self
    }
}

/// Persistence adapter for atom state, intention, results and failures.
pub trait Storage: Send + Sync {
    /// Register an atom (idempotent). New atoms start `PENDING`/`EXECUTE`;
    /// re-registering an existing atom keeps its current state. The atom's
    /// `provides` symbols are recorded in the provider index used by
    /// [`fetch`](Storage::fetch).
    fn ensure_atom(&self, registration: AtomRegistration) -> Result<()>;

    /// Whether an atom is registered under `name`.
    fn has_atom(&self, name: &str) -> bool;

    /// Names of all registered atoms.
    fn atom_names(&self) -> Vec<String>;

    /// Current state of one atom.
    fn get_atom_state(&self, name: &str) -> Result<AtomState>;

    /// Current intention of one atom.
    fn get_atom_intention(&self, name: &str) -> Result<Intention>;

    /// Batched state+intention lookup.
    fn get_atoms_states(&self, names: &[&str]) -> Result<HashMap<String, (AtomState, Intention)>>;

    /// Overwrite an atom's state. Transition legality is the engine's
    /// responsibility, not the backend's.
    fn set_atom_state(&self, name: &str, state: AtomState) -> Result<()>;

    /// Overwrite an atom's intention.
    fn set_atom_intention(&self, name: &str, intention: Intention) -> Result<()>;

    /// Persist an execution result, making the atom's `provides` symbols
    /// resolvable through [`fetch`](Storage::fetch).
    fn save_result(&self, name: &str, result: Value) -> Result<()>;

    /// Persist a captured failure.
    fn save_failure(&self, name: &str, failure: Failure) -> Result<()>;

    /// Last saved result, if any.
    fn get_result(&self, name: &str) -> Result<Option<Value>>;

    /// Last saved failure, if any.
    fn get_failure(&self, name: &str) -> Result<Option<Failure>>;

    /// Drop an atom's saved result and failure (used when resetting a retry
    /// controller's subgraph for another attempt).
    fn clear_result(&self, name: &str) -> Result<()>;

    /// Append to a retry controller's attempt history.
    fn record_retry_failure(&self, name: &str, failure: Failure) -> Result<()>;

    /// Failures a retry controller has absorbed so far, oldest first.
    fn retry_history(&self, name: &str) -> Result<Vec<Failure>>;

    /// Seed a value under a symbol name, independent of any producing atom.
    fn inject(&self, key: &str, value: Value) -> Result<()>;

    /// Whether `key` resolves to an injected value or a provider with a
    /// saved result.
    fn has_value(&self, key: &str) -> bool;

    /// Whether `key` could ever resolve: injected now, or provided by some
    /// registered atom that may still run.
    fn is_resolvable(&self, key: &str) -> bool;

    /// Resolve a symbol for argument binding: injected values first, then
    /// the provider index over saved results.
    fn fetch(&self, key: &str) -> Result<Value>;

    /// All currently persisted failures, keyed by atom name.
    fn failures(&self) -> Result<HashMap<String, Failure>>;
}
