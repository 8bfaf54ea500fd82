//! In-memory storage backend for development and testing.

use crate::error::{Result, StorageError};
use crate::failure::Failure;
use crate::states::{AtomState, Intention};
use crate::traits::{AtomRegistration, Storage};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct AtomRecord {
    state: AtomState,
    intention: Intention,
    provides: Vec<String>,
    result: Option<Value>,
    failure: Option<Failure>,
    retry_history: Vec<Failure>,
}

impl AtomRecord {
    fn new(provides: Vec<String>) -> Self {
        Self {
            state: AtomState::Pending,
            intention: Intention::Execute,
            provides,
            result: None,
            failure: None,
            retry_history: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    atoms: HashMap<String, AtomRecord>,
    injected: HashMap<String, Value>,
    // symbol -> producing atom name
    providers: HashMap<String, String>,
}

/// Thread-safe in-memory [`Storage`] implementation.
///
/// Everything lives behind one `RwLock`; all operations are microsecond
/// scale. Data is lost when the process exits, which is exactly what tests
/// and short-lived workflows want.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all atoms, injected values and providers (test isolation).
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.atoms.clear();
        inner.injected.clear();
        inner.providers.clear();
    }
}

fn lookup<'a>(inner: &'a Inner, name: &str) -> Result<&'a AtomRecord> {
    inner
        .atoms
        .get(name)
        .ok_or_else(|| StorageError::NotFound(name.to_string()))
}

fn lookup_mut<'a>(inner: &'a mut Inner, name: &str) -> Result<&'a mut AtomRecord> {
    inner
        .atoms
        .get_mut(name)
        .ok_or_else(|| StorageError::NotFound(name.to_string()))
}

impl Storage for MemoryStorage {
    fn ensure_atom(&self, registration: AtomRegistration) -> Result<()> {
        let mut inner = self.inner.write();
        for symbol in &registration.provides {
            match inner.providers.get(symbol) {
                Some(existing) if existing != &registration.name => {
                    return Err(StorageError::DuplicateProvider {
                        symbol: symbol.clone(),
                        provider: existing.clone(),
                    });
                }
                _ => {
                    inner
                        .providers
                        .insert(symbol.clone(), registration.name.clone());
                }
            }
        }
        inner
            .atoms
            .entry(registration.name)
            .or_insert_with(|| AtomRecord::new(registration.provides));
        Ok(())
    }

    fn has_atom(&self, name: &str) -> bool {
        self.inner.read().atoms.contains_key(name)
    }

    fn atom_names(&self) -> Vec<String> {
        self.inner.read().atoms.keys().cloned().collect()
    }

    fn get_atom_state(&self, name: &str) -> Result<AtomState> {
        Ok(lookup(&self.inner.read(), name)?.state)
    }

    fn get_atom_intention(&self, name: &str) -> Result<Intention> {
        Ok(lookup(&self.inner.read(), name)?.intention)
    }

    fn get_atoms_states(&self, names: &[&str]) -> Result<HashMap<String, (AtomState, Intention)>> {
        let inner = self.inner.read();
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            let record = lookup(&inner, name)?;
            out.insert((*name).to_string(), (record.state, record.intention));
        }
        Ok(out)
    }

    fn set_atom_state(&self, name: &str, state: AtomState) -> Result<()> {
        lookup_mut(&mut self.inner.write(), name)?.state = state;
        Ok(())
    }

    fn set_atom_intention(&self, name: &str, intention: Intention) -> Result<()> {
        lookup_mut(&mut self.inner.write(), name)?.intention = intention;
        Ok(())
    }

    fn save_result(&self, name: &str, result: Value) -> Result<()> {
        let mut inner = self.inner.write();
        let record = lookup_mut(&mut inner, name)?;
        record.result = Some(result);
        record.failure = None;
        Ok(())
    }

    fn save_failure(&self, name: &str, failure: Failure) -> Result<()> {
        lookup_mut(&mut self.inner.write(), name)?.failure = Some(failure);
        Ok(())
    }

    fn get_result(&self, name: &str) -> Result<Option<Value>> {
        Ok(lookup(&self.inner.read(), name)?.result.clone())
    }

    fn get_failure(&self, name: &str) -> Result<Option<Failure>> {
        Ok(lookup(&self.inner.read(), name)?.failure.clone())
    }

    fn clear_result(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let record = lookup_mut(&mut inner, name)?;
        record.result = None;
        record.failure = None;
        Ok(())
    }

    fn record_retry_failure(&self, name: &str, failure: Failure) -> Result<()> {
        lookup_mut(&mut self.inner.write(), name)?
            .retry_history
            .push(failure);
        Ok(())
    }

    fn retry_history(&self, name: &str) -> Result<Vec<Failure>> {
        Ok(lookup(&self.inner.read(), name)?.retry_history.clone())
    }

    fn inject(&self, key: &str, value: Value) -> Result<()> {
        self.inner.write().injected.insert(key.to_string(), value);
        Ok(())
    }

    fn has_value(&self, key: &str) -> bool {
        let inner = self.inner.read();
        if inner.injected.contains_key(key) {
            return true;
        }
        inner
            .providers
            .get(key)
            .and_then(|provider| inner.atoms.get(provider))
            .is_some_and(|record| record.result.is_some())
    }

    fn is_resolvable(&self, key: &str) -> bool {
        let inner = self.inner.read();
        inner.injected.contains_key(key) || inner.providers.contains_key(key)
    }

    fn fetch(&self, key: &str) -> Result<Value> {
        let inner = self.inner.read();
        if let Some(value) = inner.injected.get(key) {
            return Ok(value.clone());
        }
        let provider = inner
            .providers
            .get(key)
            .ok_or_else(|| StorageError::MissingSymbol(key.to_string()))?;
        let record = lookup(&inner, provider)?;
        let result = record
            .result
            .as_ref()
            .ok_or_else(|| StorageError::MissingSymbol(key.to_string()))?;
        if record.provides.len() == 1 {
            return Ok(result.clone());
        }
        // Multi-output atoms save an object keyed by symbol.
        result
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::MissingSymbol(key.to_string()))
    }

    fn failures(&self) -> Result<HashMap<String, Failure>> {
        Ok(self
            .inner
            .read()
            .atoms
            .iter()
            .filter_map(|(name, record)| {
                record.failure.clone().map(|f| (name.clone(), f))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_atoms_start_pending_execute() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("a")).unwrap();
        assert!(storage.has_atom("a"));
        assert!(!storage.has_atom("b"));
        assert_eq!(storage.atom_names(), vec!["a"]);
        assert_eq!(storage.get_atom_state("a").unwrap(), AtomState::Pending);
        assert_eq!(
            storage.get_atom_intention("a").unwrap(),
            Intention::Execute
        );
    }

    #[test]
    fn ensure_atom_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("a")).unwrap();
        storage.set_atom_state("a", AtomState::Success).unwrap();
        storage.ensure_atom(AtomRegistration::new("a")).unwrap();
        assert_eq!(storage.get_atom_state("a").unwrap(), AtomState::Success);
    }

    #[test]
    fn duplicate_providers_are_rejected() {
        let storage = MemoryStorage::new();
        storage
            .ensure_atom(AtomRegistration::new("a").provides(["x"]))
            .unwrap();
        let err = storage
            .ensure_atom(AtomRegistration::new("b").provides(["x"]))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateProvider { .. }));
    }

    #[test]
    fn fetch_resolves_single_output_results() {
        let storage = MemoryStorage::new();
        storage
            .ensure_atom(AtomRegistration::new("a").provides(["x"]))
            .unwrap();
        storage.save_result("a", json!(42)).unwrap();
        assert_eq!(storage.fetch("x").unwrap(), json!(42));
    }

    #[test]
    fn fetch_resolves_multi_output_results_by_key() {
        let storage = MemoryStorage::new();
        storage
            .ensure_atom(AtomRegistration::new("a").provides(["x", "y"]))
            .unwrap();
        storage
            .save_result("a", json!({"x": 1, "y": 2}))
            .unwrap();
        assert_eq!(storage.fetch("x").unwrap(), json!(1));
        assert_eq!(storage.fetch("y").unwrap(), json!(2));
    }

    #[test]
    fn injected_values_shadow_providers() {
        let storage = MemoryStorage::new();
        storage
            .ensure_atom(AtomRegistration::new("a").provides(["x"]))
            .unwrap();
        storage.save_result("a", json!("from-atom")).unwrap();
        storage.inject("x", json!("injected")).unwrap();
        assert_eq!(storage.fetch("x").unwrap(), json!("injected"));
    }

    #[test]
    fn fetch_of_unproduced_symbol_is_missing() {
        let storage = MemoryStorage::new();
        storage
            .ensure_atom(AtomRegistration::new("a").provides(["x"]))
            .unwrap();
        assert!(storage.is_resolvable("x"));
        assert!(!storage.has_value("x"));
        assert!(matches!(
            storage.fetch("x").unwrap_err(),
            StorageError::MissingSymbol(_)
        ));
    }

    #[test]
    fn clear_result_drops_result_and_failure() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("a")).unwrap();
        storage.save_result("a", json!(1)).unwrap();
        storage
            .save_failure("a", Failure::execution("boom"))
            .unwrap();
        storage.clear_result("a").unwrap();
        assert_eq!(storage.get_result("a").unwrap(), None);
        assert_eq!(storage.get_failure("a").unwrap(), None);
    }

    #[test]
    fn retry_history_accumulates_in_order() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("r")).unwrap();
        storage
            .record_retry_failure("r", Failure::execution("first"))
            .unwrap();
        storage
            .record_retry_failure("r", Failure::execution("second"))
            .unwrap();
        let history = storage.retry_history("r").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "first");
        assert_eq!(history[1].message, "second");
    }

    #[test]
    fn failures_collects_all_failed_atoms() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("a")).unwrap();
        storage.ensure_atom(AtomRegistration::new("b")).unwrap();
        storage
            .save_failure("b", Failure::execution("boom"))
            .unwrap();
        let failures = storage.failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key("b"));
    }
}
