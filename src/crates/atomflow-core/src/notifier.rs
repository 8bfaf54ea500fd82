//! Lifecycle notifications.
//!
//! The engine publishes an [`AtomEvent`] on every state change it applies.
//! Events for a single atom arrive in causal order (EXECUTING before
//! SUCCESS/FAILURE, REVERTING before REVERTED) because the engine loop is
//! the only publisher.

use atomflow_storage::AtomState;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// What happened to an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomEventKind {
    /// Reset to pending
    Pending,
    /// Execution submitted
    Executing,
    /// Execution produced a result
    Success,
    /// Execution or reversion failed
    Failure,
    /// Reversion submitted
    Reverting,
    /// Compensation finished
    Reverted,
    /// Retry controller re-driving its subgraph
    Retrying,
    /// Suppressed by a decider
    Ignored,
}

impl From<AtomState> for AtomEventKind {
    fn from(state: AtomState) -> Self {
        match state {
            AtomState::Pending => AtomEventKind::Pending,
            AtomState::Running => AtomEventKind::Executing,
            AtomState::Success => AtomEventKind::Success,
            AtomState::Failure => AtomEventKind::Failure,
            AtomState::Reverting => AtomEventKind::Reverting,
            AtomState::Reverted => AtomEventKind::Reverted,
            AtomState::Retrying => AtomEventKind::Retrying,
            AtomState::Ignore => AtomEventKind::Ignored,
        }
    }
}

/// One lifecycle notification.
#[derive(Debug, Clone, Serialize)]
pub struct AtomEvent {
    /// The atom the event concerns
    pub atom: String,
    /// What happened
    pub kind: AtomEventKind,
    /// Coarse progress marker, when the action reports one
    pub progress: Option<f64>,
    /// When the engine applied the change
    pub at: DateTime<Utc>,
}

impl AtomEvent {
    pub(crate) fn new(atom: &str, state: AtomState, progress: Option<f64>) -> Self {
        Self {
            atom: atom.to_string(),
            kind: state.into(),
            progress,
            at: Utc::now(),
        }
    }
}

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&AtomEvent) + Send + Sync>;

/// Fan-out sink for lifecycle events.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<Listener>>,
}

impl Notifier {
    /// Sink with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener; it sees every event published afterwards.
    pub fn register(&self, listener: Listener) {
        self.listeners.write().push(listener);
    }

    /// Publish one event to all listeners.
    pub fn notify(&self, event: &AtomEvent) {
        tracing::debug!(
            atom = event.atom,
            kind = ?event.kind,
            progress = event.progress,
            "atom event"
        );
        for listener in self.listeners.read().iter() {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn listeners_observe_published_events() {
        let notifier = Notifier::new();
        let seen: Arc<Mutex<Vec<AtomEventKind>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.register(Arc::new(move |event| sink.lock().push(event.kind)));

        notifier.notify(&AtomEvent::new("a", AtomState::Running, Some(0.0)));
        notifier.notify(&AtomEvent::new("a", AtomState::Success, Some(1.0)));

        assert_eq!(
            *seen.lock(),
            vec![AtomEventKind::Executing, AtomEventKind::Success]
        );
    }
}
