//! Per-kind actions: the state transitions and executor dispatch for tasks
//! and retry controllers.

pub mod retry;
pub mod task;

pub use retry::RetryAction;
pub use task::TaskAction;

use crate::atom::{ArgMap, AtomSpec};
use atomflow_storage::{Failure, Storage};

// Bind one atom's arguments: injected constants win, everything else goes
// through storage under the (possibly rebound) symbol name. A symbol that
// cannot be resolved is a dependency failure for this atom, not an engine
// error.
pub(crate) fn bind_args(
    storage: &dyn Storage,
    spec: &AtomSpec,
) -> std::result::Result<ArgMap, Failure> {
    let mut args = ArgMap::with_capacity(spec.requires.len());
    for symbol in &spec.requires {
        if let Some(value) = spec.inject.get(symbol) {
            args.insert(symbol.clone(), value.clone());
            continue;
        }
        let key = spec
            .rebind
            .get(symbol)
            .map(String::as_str)
            .unwrap_or(symbol);
        match storage.fetch(key) {
            Ok(value) => {
                args.insert(symbol.clone(), value);
            }
            Err(error) => {
                return Err(Failure::dependency(format!(
                    "binding argument '{symbol}' for atom '{}': {error}",
                    spec.name
                )));
            }
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_storage::{AtomRegistration, MemoryStorage};
    use serde_json::json;

    #[test]
    fn bind_args_prefers_injected_then_rebound_then_plain() {
        let storage = MemoryStorage::new();
        storage.inject("alias_key", json!("rebound")).unwrap();
        storage.inject("plain", json!("stored")).unwrap();
        let spec = AtomSpec::new("t")
            .requires(["fixed", "aliased", "plain"])
            .inject("fixed", json!(7))
            .rebind("aliased", "alias_key");

        let args = bind_args(&storage, &spec).unwrap();
        assert_eq!(args["fixed"], json!(7));
        assert_eq!(args["aliased"], json!("rebound"));
        assert_eq!(args["plain"], json!("stored"));
    }

    #[test]
    fn missing_symbols_become_dependency_failures() {
        let storage = MemoryStorage::new();
        storage.ensure_atom(AtomRegistration::new("t")).unwrap();
        let spec = AtomSpec::new("t").requires(["nowhere"]);
        let failure = bind_args(&storage, &spec).unwrap_err();
        assert_eq!(failure.kind, "DependencyFailure");
        assert!(failure.message.contains("nowhere"));
    }
}
