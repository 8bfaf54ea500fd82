//! Atom lifecycle states, intentions and the allowed-transition tables.
//!
//! A state describes where an atom currently is in its lifecycle; an
//! intention describes what the engine wants it to do next. The pair is the
//! unit of truth the analyzer schedules from, so every mutation goes through
//! [`check_task_transition`] / [`check_retry_transition`] first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomState {
    /// Not yet executed (or reset for re-execution)
    Pending,
    /// Execution submitted, result outstanding
    Running,
    /// Execution finished and produced a result
    Success,
    /// Execution or reversion raised a failure
    Failure,
    /// Reversion submitted, result outstanding
    Reverting,
    /// Compensation finished
    Reverted,
    /// Retry controller preparing its subgraph for another attempt
    Retrying,
    /// Suppressed by a decider; treated as satisfied by dependents
    Ignore,
}

/// What the engine wants an atom to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intention {
    /// Run the atom forward
    Execute,
    /// Run the atom's compensation
    Revert,
    /// Re-drive the atom's subgraph (retry controllers only)
    Retry,
    /// Leave the atom untouched
    Ignore,
}

impl fmt::Display for AtomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomState::Pending => "PENDING",
            AtomState::Running => "RUNNING",
            AtomState::Success => "SUCCESS",
            AtomState::Failure => "FAILURE",
            AtomState::Reverting => "REVERTING",
            AtomState::Reverted => "REVERTED",
            AtomState::Retrying => "RETRYING",
            AtomState::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Intention::Execute => "EXECUTE",
            Intention::Revert => "REVERT",
            Intention::Retry => "RETRY",
            Intention::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// Transitions legal for task atoms.
///
/// Forward path, compensation path (a failed atom compensates its partial
/// work too), and the reset edges a retry re-drive uses.
const TASK_TRANSITIONS: &[(AtomState, AtomState)] = &[
    (AtomState::Pending, AtomState::Running),
    (AtomState::Pending, AtomState::Ignore),
    (AtomState::Running, AtomState::Success),
    (AtomState::Running, AtomState::Failure),
    (AtomState::Success, AtomState::Reverting),
    (AtomState::Failure, AtomState::Reverting),
    (AtomState::Reverting, AtomState::Reverted),
    (AtomState::Reverting, AtomState::Failure),
    (AtomState::Reverted, AtomState::Pending),
    (AtomState::Failure, AtomState::Pending),
    (AtomState::Ignore, AtomState::Pending),
];

/// Transitions legal only for retry controllers, on top of the task table.
const RETRY_ONLY_TRANSITIONS: &[(AtomState, AtomState)] = &[
    (AtomState::Success, AtomState::Retrying),
    (AtomState::Retrying, AtomState::Running),
    (AtomState::Retrying, AtomState::Reverting),
];

/// Returns whether a task atom may move from `current` to `target`.
pub fn check_task_transition(current: AtomState, target: AtomState) -> bool {
    TASK_TRANSITIONS.contains(&(current, target))
}

/// Returns whether a retry controller may move from `current` to `target`.
pub fn check_retry_transition(current: AtomState, target: AtomState) -> bool {
    check_task_transition(current, target)
        || RETRY_ONLY_TRANSITIONS.contains(&(current, target))
}
