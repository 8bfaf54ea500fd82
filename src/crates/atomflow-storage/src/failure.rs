//! Serializable failure envelopes.
//!
//! User-code failures never unwind into the engine loop; they are captured
//! into a [`Failure`], persisted, and drive the revert/retry machinery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A captured failure: what kind of thing went wrong, where, and why.
///
/// `causes` carries the chain for failures that wrap other failures, such as
/// an aggregation of several parallel revert failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    /// Failure classification, e.g. `"ExecutionFailure"`
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// When the engine captured this failure
    pub captured_at: DateTime<Utc>,
    /// Underlying failures, outermost first
    pub causes: Vec<Failure>,
}

impl Failure {
    /// Create a failure with an explicit kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            captured_at: Utc::now(),
            causes: Vec::new(),
        }
    }

    /// A failure raised by user task code.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new("ExecutionFailure", message)
    }

    /// A missing symbol at argument-binding time.
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new("DependencyFailure", message)
    }

    /// User code panicked inside the executor.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("Panic", message)
    }

    /// Attach an underlying cause.
    pub fn caused_by(mut self, cause: Failure) -> Self {
        self.causes.push(cause);
        self
    }

    /// Aggregate several failures into one wrapped failure.
    ///
    /// A single failure is returned as-is; an empty input produces a
    /// placeholder wrapped failure so callers never lose the fact that
    /// something went wrong.
    pub fn wrap_all(mut failures: Vec<Failure>) -> Failure {
        match failures.len() {
            1 => failures.remove(0),
            0 => Self::new("WrappedFailure", "wrapped failure with no recorded causes"),
            n => {
                let mut wrapped =
                    Self::new("WrappedFailure", format!("{n} failures occurred"));
                wrapped.causes = failures;
                wrapped
            }
        }
    }

    /// Structural comparison ignoring capture timestamps.
    pub fn matches(&self, other: &Failure) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.causes.len() == other.causes.len()
            && self
                .causes
                .iter()
                .zip(other.causes.iter())
                .all(|(a, b)| a.matches(b))
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for cause in &self.causes {
            write!(f, "; caused by {cause}")?;
        }
        Ok(())
    }
}
