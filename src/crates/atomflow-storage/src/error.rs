//! Error types for storage operations

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// No atom registered under the given name
    #[error("Atom not found: {0}")]
    NotFound(String),

    /// A symbol requested for argument binding could not be resolved
    #[error("Symbol '{0}' could not be resolved from injected values or any provider")]
    MissingSymbol(String),

    /// Two atoms registered the same output symbol
    #[error("Symbol '{symbol}' is already provided by atom '{provider}'")]
    DuplicateProvider {
        /// The contested output symbol
        symbol: String,
        /// The atom that registered it first
        provider: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
