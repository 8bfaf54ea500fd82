//! Error types for engine operations
//!
//! Structural errors (bad graph shape, illegal transitions, storage trouble)
//! surface as [`EngineError`] and abort the workflow. Failures raised by user
//! task code are *not* errors at this level; they are captured into
//! [`Failure`](atomflow_storage::Failure) envelopes and drive the
//! revert/retry machinery instead.

use atomflow_storage::{AtomState, StorageError};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort workflow compilation or execution
#[derive(Error, Debug)]
pub enum EngineError {
    /// Static error in graph shape: cycle, duplicate name, unlinkable item
    #[error("Compilation failed: {0}")]
    Compilation(String),

    /// Required symbols cannot be resolved by any provider or injected value
    #[error("Dependency resolution failed: {0}")]
    Dependency(String),

    /// Attempted illegal state transition; fatal
    #[error("Illegal transition for atom '{atom}': {from} -> {to}")]
    InvalidState {
        /// The atom whose transition was rejected
        atom: String,
        /// State the atom is currently in
        from: AtomState,
        /// State the engine tried to move it to
        to: AtomState,
    },

    /// The engine asked itself to do something inconsistent
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Storage adapter error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Create a compilation error.
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation(message.into())
    }

    /// Create a dependency-resolution error.
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency(message.into())
    }

    /// Create an invalid-transition error.
    pub fn invalid_state(atom: impl Into<String>, from: AtomState, to: AtomState) -> Self {
        Self::InvalidState {
            atom: atom.into(),
            from,
            to,
        }
    }
}
