//! Executor adapters: how atom work becomes futures.
//!
//! Actions hand the executor a submission (which atom, which phase) and the
//! work future; the executor returns a future resolving to an [`Envelope`]
//! the completer can consume. User-code failures and panics never escape an
//! envelope.

use crate::graph::NodeKind;
use atomflow_storage::Failure;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Which half of an atom's contract is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Forward execution
    Execute,
    /// Compensation
    Revert,
}

/// Identity of one submitted piece of work.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Atom name
    pub atom: String,
    /// Task or retry
    pub kind: NodeKind,
    /// Execute or revert
    pub phase: Phase,
}

/// Result envelope produced when a submission finishes.
#[derive(Debug)]
pub struct Envelope {
    /// Atom name
    pub atom: String,
    /// Task or retry
    pub kind: NodeKind,
    /// Execute or revert
    pub phase: Phase,
    /// The value produced, or the captured failure
    pub outcome: Result<Value, Failure>,
}

/// Future resolving to a completed envelope.
pub type AtomFuture = BoxFuture<'static, Envelope>;

/// Work future as built by an action.
pub type WorkFuture = BoxFuture<'static, Result<Value, Failure>>;

/// Adapter that turns submitted work into envelope futures.
pub trait AtomExecutor: Send + Sync {
    /// Submit work; the returned future resolves when the work is done.
    fn submit(&self, submission: Submission, work: WorkFuture) -> AtomFuture;
}

/// Worker-pool executor backed by `tokio::spawn` and a semaphore.
///
/// At most `workers` submissions run at once; the rest queue on the
/// semaphore inside their spawned tasks. A panic in user code surfaces as a
/// failure envelope, not as an engine crash.
pub struct TokioExecutor {
    semaphore: Arc<Semaphore>,
}

impl TokioExecutor {
    /// Executor allowing `workers` concurrent submissions.
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

impl AtomExecutor for TokioExecutor {
    fn submit(&self, submission: Submission, work: WorkFuture) -> AtomFuture {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => work.await,
                Err(_) => Err(Failure::execution("executor shut down before work ran")),
            }
        });
        Box::pin(async move {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(Failure::panic(format!(
                    "atom '{}' worker aborted: {join_error}",
                    submission.atom
                ))),
            };
            Envelope {
                atom: submission.atom,
                kind: submission.kind,
                phase: submission.phase,
                outcome,
            }
        })
    }
}

/// Inline executor: the work runs on the engine loop when the future is
/// polled, one piece at a time. Used for retry controllers, whose work is
/// bookkeeping rather than heavy lifting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl DirectExecutor {
    /// Create an inline executor.
    pub fn new() -> Self {
        Self
    }
}

impl AtomExecutor for DirectExecutor {
    fn submit(&self, submission: Submission, work: WorkFuture) -> AtomFuture {
        Box::pin(async move {
            let outcome = work.await;
            Envelope {
                atom: submission.atom,
                kind: submission.kind,
                phase: submission.phase,
                outcome,
            }
        })
    }
}

/// Wait until at least one outstanding future completes, then drain every
/// other future that is already done. Returns completed envelopes in
/// completion order; empty only when the set is empty.
pub async fn wait_for_any(outstanding: &mut FuturesUnordered<AtomFuture>) -> Vec<Envelope> {
    let Some(first) = outstanding.next().await else {
        return Vec::new();
    };
    let mut done = vec![first];
    loop {
        match outstanding.next().now_or_never() {
            Some(Some(envelope)) => done.push(envelope),
            Some(None) | None => break,
        }
    }
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn submission(atom: &str) -> Submission {
        Submission {
            atom: atom.to_string(),
            kind: NodeKind::Task,
            phase: Phase::Execute,
        }
    }

    #[tokio::test]
    async fn tokio_executor_returns_the_work_outcome() {
        let executor = TokioExecutor::new(2);
        let envelope = executor
            .submit(submission("a"), Box::pin(async { Ok(json!(5)) }))
            .await;
        assert_eq!(envelope.atom, "a");
        assert_eq!(envelope.outcome.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn panics_become_failure_envelopes() {
        let executor = TokioExecutor::new(1);
        let envelope = executor
            .submit(
                submission("bad"),
                Box::pin(async { panic!("user code exploded") }),
            )
            .await;
        let failure = envelope.outcome.unwrap_err();
        assert_eq!(failure.kind, "Panic");
        assert!(failure.message.contains("bad"));
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let executor = TokioExecutor::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut outstanding: FuturesUnordered<AtomFuture> = FuturesUnordered::new();
        for i in 0..5 {
            let current = current.clone();
            let peak = peak.clone();
            outstanding.push(executor.submit(
                submission(&format!("t{i}")),
                Box::pin(async move {
                    let running = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(running, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }),
            ));
        }
        let mut completed = 0;
        while !outstanding.is_empty() {
            completed += wait_for_any(&mut outstanding).await.len();
        }
        assert_eq!(completed, 5);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak concurrency exceeded pool size");
    }

    #[tokio::test]
    async fn wait_for_any_drains_everything_already_done() {
        let executor = DirectExecutor::new();
        let mut outstanding: FuturesUnordered<AtomFuture> = FuturesUnordered::new();
        for i in 0..3 {
            outstanding.push(executor.submit(
                submission(&format!("t{i}")),
                Box::pin(async move { Ok(json!(i)) }),
            ));
        }
        let done = wait_for_any(&mut outstanding).await;
        assert_eq!(done.len(), 3);
        assert!(outstanding.is_empty());
    }
}
