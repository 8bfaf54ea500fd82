//! # atomflow-storage - Atom State Persistence
//!
//! Persisted data model and storage abstractions for the atomflow action
//! engine. This crate owns everything the engine writes down about a
//! workflow while it runs:
//!
//! - **States and intentions** - per-atom lifecycle position and desired
//!   next direction, with the allowed-transition tables
//! - **Failures** - serializable failure envelopes with cause chains
//! - **The [`Storage`] trait** - the adapter the engine mutates through
//! - **[`MemoryStorage`]** - a thread-safe in-memory reference backend
//!
//! The engine core (`atomflow-core`) is the only writer during execution;
//! backends only need to be safe for concurrent reads. Implement [`Storage`]
//! against a database to persist workflows across processes.

pub mod error;
pub mod failure;
pub mod memory;
pub mod states;
pub mod traits;

pub use error::{Result, StorageError};
pub use failure::Failure;
pub use memory::MemoryStorage;
pub use states::{
    check_retry_transition, check_task_transition, AtomState, Intention,
};
pub use traits::{AtomRegistration, Storage};
