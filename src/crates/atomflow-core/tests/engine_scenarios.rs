//! End-to-end engine scenarios: success, parallelism, compensation, retry
//! re-drives, decider skips and cooperative suspension.

use async_trait::async_trait;
use atomflow_core::{
    ActionEngine, ArgMap, AtomEventKind, AtomResult, AtomSpec, DeciderDepth, DeciderHistory,
    EngineError, EngineOptions, EngineVerdict, Flow, RevertContext, Task, Times,
};
use atomflow_storage::{AtomState, MemoryStorage, Storage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type SharedValues = Arc<Mutex<Vec<String>>>;

struct SaveOrderTask {
    name: String,
    values: SharedValues,
}

impl SaveOrderTask {
    fn new(name: &str, values: &SharedValues) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            values: values.clone(),
        })
    }
}

#[async_trait]
impl Task for SaveOrderTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        self.values.lock().push(self.name.clone());
        Ok(json!(5))
    }

    async fn revert(&self, _context: RevertContext) -> AtomResult {
        self.values.lock().push(format!("{} reverted", self.name));
        Ok(Value::Null)
    }
}

struct FailingTask {
    name: String,
    values: SharedValues,
}

#[async_trait]
impl Task for FailingTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        self.values.lock().push(self.name.clone());
        Err(atomflow_storage::Failure::execution("Woot!"))
    }

    async fn revert(&self, _context: RevertContext) -> AtomResult {
        self.values.lock().push(format!("{} reverted", self.name));
        Ok(Value::Null)
    }
}

struct FailOnceTask {
    name: String,
    values: SharedValues,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for FailOnceTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        self.values.lock().push(self.name.clone());
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(atomflow_storage::Failure::execution("not yet"));
        }
        Ok(json!(5))
    }

    async fn revert(&self, _context: RevertContext) -> AtomResult {
        self.values.lock().push(format!("{} reverted", self.name));
        Ok(Value::Null)
    }
}

struct ProbeTask {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for ProbeTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

fn state_of(engine: &ActionEngine, atom: &str) -> AtomState {
    engine.storage().get_atom_state(atom).unwrap()
}

fn count(values: &SharedValues, entry: &str) -> usize {
    values.lock().iter().filter(|v| v.as_str() == entry).count()
}

#[tokio::test]
async fn linear_flow_runs_in_order_and_succeeds() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::linear("lin");
    for name in ["a", "b", "c"] {
        flow.add_task(AtomSpec::new(name), SaveOrderTask::new(name, &values))
            .unwrap();
    }

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(*values.lock(), vec!["a", "b", "c"]);
    for atom in ["a", "b", "c"] {
        assert_eq!(state_of(&engine, atom), AtomState::Success);
        assert_eq!(engine.storage().get_result(atom).unwrap(), Some(json!(5)));
    }
}

#[tokio::test]
async fn unordered_flow_runs_in_parallel_bounded_by_workers() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut flow = Flow::unordered("par");
    for name in ["a", "b", "c"] {
        flow.add_task(
            AtomSpec::new(name),
            Arc::new(ProbeTask {
                current: current.clone(),
                peak: peak.clone(),
            }),
        )
        .unwrap();
    }

    let engine = ActionEngine::with_options(
        &flow,
        Arc::new(MemoryStorage::new()),
        EngineOptions { workers: 2 },
    )
    .unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    for atom in ["a", "b", "c"] {
        assert_eq!(state_of(&engine, atom), AtomState::Success);
    }
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {peak}");
}

#[tokio::test]
async fn failure_reverts_completed_ancestors() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::linear("lin");
    flow.add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    flow.add_task(
        AtomSpec::new("boom"),
        Arc::new(FailingTask {
            name: "boom".to_string(),
            values: values.clone(),
        }),
    )
    .unwrap();
    flow.add_task(AtomSpec::new("c"), SaveOrderTask::new("c", &values))
        .unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let events: Arc<Mutex<Vec<(String, AtomEventKind)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine
        .notifier()
        .register(Arc::new(move |event| {
            sink.lock().push((event.atom.clone(), event.kind))
        }));
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Reverted);
    assert_eq!(state_of(&engine, "a"), AtomState::Reverted);
    assert_eq!(state_of(&engine, "boom"), AtomState::Reverted);
    // The downstream task never ran.
    assert_eq!(state_of(&engine, "c"), AtomState::Pending);
    assert_eq!(count(&values, "c"), 0);

    // The failure was observed, and compensation ran failed-atom-first.
    let events = events.lock();
    assert!(events.contains(&("boom".to_string(), AtomEventKind::Failure)));
    let a_revert = values
        .lock()
        .iter()
        .position(|v| v.as_str() == "a reverted")
        .unwrap();
    let boom_revert = values
        .lock()
        .iter()
        .position(|v| v.as_str() == "boom reverted")
        .unwrap();
    assert!(boom_revert < a_revert);

    // The captured failure is still available after compensation.
    let failure = engine.storage().get_failure("boom").unwrap().unwrap();
    assert_eq!(failure.message, "Woot!");
}

#[tokio::test]
async fn retry_controller_redrives_its_subgraph() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::linear("guarded");
    flow.add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    flow.add_task(
        AtomSpec::new("b"),
        Arc::new(FailOnceTask {
            name: "b".to_string(),
            values: values.clone(),
            failures_left: Arc::new(AtomicUsize::new(1)),
        }),
    )
    .unwrap();
    let flow = flow.with_retry(AtomSpec::new("r"), Arc::new(Times::new(2)));

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let retrying_events = Arc::new(AtomicUsize::new(0));
    let counter = retrying_events.clone();
    engine
        .notifier()
        .register(Arc::new(move |event| {
            if event.kind == AtomEventKind::Retrying {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    for atom in ["r", "a", "b"] {
        assert_eq!(state_of(&engine, atom), AtomState::Success);
    }
    // Both tasks ran twice with a full compensation pass in between.
    assert_eq!(count(&values, "a"), 2);
    assert_eq!(count(&values, "b"), 2);
    assert_eq!(count(&values, "a reverted"), 1);
    assert_eq!(count(&values, "b reverted"), 1);
    assert_eq!(retrying_events.load(Ordering::SeqCst), 1);
    // One absorbed failure in the controller's history.
    assert_eq!(engine.storage().retry_history("r").unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_retry_reverts_scope_and_fails_the_run() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut guarded = Flow::linear("guarded");
    guarded
        .add_task(
            AtomSpec::new("always_fails"),
            Arc::new(FailingTask {
                name: "always_fails".to_string(),
                values: values.clone(),
            }),
        )
        .unwrap();
    let guarded = guarded.with_retry(AtomSpec::new("r"), Arc::new(Times::new(2)));

    let mut outer = Flow::linear("outer");
    outer
        .add_task(AtomSpec::new("before"), SaveOrderTask::new("before", &values))
        .unwrap();
    outer.add_flow(guarded).unwrap();

    let engine = ActionEngine::new(&outer, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    // Two attempts, then the controller gives up and reverts only its scope.
    assert_eq!(count(&values, "always_fails"), 2);
    assert_eq!(state_of(&engine, "before"), AtomState::Success);
    assert_eq!(state_of(&engine, "always_fails"), AtomState::Reverted);
    assert_eq!(state_of(&engine, "r"), AtomState::Reverted);
    match verdict {
        EngineVerdict::Failed { failures } => {
            assert!(!failures.is_empty());
            assert_eq!(failures[0].message, "Woot!");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn edge_decider_skips_the_target_atom() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::graph("g");
    flow.add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    flow.add_task(AtomSpec::new("b"), SaveOrderTask::new("b", &values))
        .unwrap();
    flow.link_with(
        "a",
        "b",
        // False once a has produced its usual result.
        Arc::new(|history: &DeciderHistory<'_>| history.result("a") != Some(json!(5))),
        DeciderDepth::Atom,
    )
    .unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(state_of(&engine, "a"), AtomState::Success);
    assert_eq!(state_of(&engine, "b"), AtomState::Ignore);
    assert_eq!(count(&values, "b"), 0);
}

#[tokio::test]
async fn decider_cascade_frees_downstream_atoms_in_the_same_run() {
    // a -> b -> c with the decider only on a -> b: once b is ignored, c must
    // still run (its predecessor counts as satisfied).
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::graph("g");
    for name in ["a", "b", "c"] {
        flow.add_task(AtomSpec::new(name), SaveOrderTask::new(name, &values))
            .unwrap();
    }
    flow.link_with(
        "a",
        "b",
        Arc::new(|_: &DeciderHistory<'_>| false),
        DeciderDepth::Neighbor,
    )
    .unwrap();
    flow.link("b", "c").unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(state_of(&engine, "b"), AtomState::Ignore);
    assert_eq!(state_of(&engine, "c"), AtomState::Success);
    assert_eq!(count(&values, "c"), 1);
}

#[tokio::test]
async fn flow_level_decider_ignores_the_whole_inner_flow() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut inner = Flow::unordered("inner");
    inner
        .add_task(AtomSpec::new("b"), SaveOrderTask::new("b", &values))
        .unwrap();
    inner
        .add_task(AtomSpec::new("c"), SaveOrderTask::new("c", &values))
        .unwrap();

    let mut outer = Flow::graph("outer");
    outer
        .add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    outer.add_flow(inner).unwrap();
    outer
        .link_with(
            "a",
            "inner",
            Arc::new(|_: &DeciderHistory<'_>| false),
            DeciderDepth::Flow,
        )
        .unwrap();

    let engine = ActionEngine::new(&outer, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(state_of(&engine, "a"), AtomState::Success);
    assert_eq!(state_of(&engine, "b"), AtomState::Ignore);
    assert_eq!(state_of(&engine, "c"), AtomState::Ignore);
    assert_eq!(*values.lock(), vec!["a"]);
}

struct EchoTask;

#[async_trait]
impl Task for EchoTask {
    async fn execute(&self, args: ArgMap) -> AtomResult {
        Ok(args.get("x").cloned().unwrap_or(Value::Null))
    }
}

struct ConstTask(Value);

#[async_trait]
impl Task for ConstTask {
    async fn execute(&self, _args: ArgMap) -> AtomResult {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn arguments_flow_through_provides_requires_and_rebinds() {
    let mut flow = Flow::graph("g");
    flow.add_task(
        AtomSpec::new("producer").provides(["x"]),
        Arc::new(ConstTask(json!(42))),
    )
    .unwrap();
    flow.add_task(
        AtomSpec::new("consumer")
            .requires(["x"])
            .provides(["echoed"]),
        Arc::new(EchoTask),
    )
    .unwrap();
    flow.add_task(
        AtomSpec::new("aliased")
            .requires(["x"])
            .rebind("x", "echoed")
            .provides(["final"]),
        Arc::new(EchoTask),
    )
    .unwrap();
    // The alias still orders after its real source.
    flow.link("consumer", "aliased").unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(engine.storage().fetch("x").unwrap(), json!(42));
    assert_eq!(engine.storage().fetch("echoed").unwrap(), json!(42));
    assert_eq!(engine.storage().fetch("final").unwrap(), json!(42));
}

#[tokio::test]
async fn injected_storage_values_satisfy_requirements() {
    let mut flow = Flow::linear("lin");
    flow.add_task(
        AtomSpec::new("consumer").requires(["x"]).provides(["out"]),
        Arc::new(EchoTask),
    )
    .unwrap();

    let storage = Arc::new(MemoryStorage::new());
    storage.inject("x", json!("seeded")).unwrap();
    let engine = ActionEngine::new(&flow, storage).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(engine.storage().fetch("out").unwrap(), json!("seeded"));
}

#[tokio::test]
async fn unresolvable_requirements_fail_validation() {
    let mut flow = Flow::linear("lin");
    flow.add_task(AtomSpec::new("consumer").requires(["nowhere"]), Arc::new(EchoTask))
        .unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Dependency(_)));
}

#[tokio::test]
async fn nested_flows_respect_outer_ordering() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut inner = Flow::unordered("inner");
    inner
        .add_task(AtomSpec::new("b"), SaveOrderTask::new("b", &values))
        .unwrap();
    inner
        .add_task(AtomSpec::new("c"), SaveOrderTask::new("c", &values))
        .unwrap();

    let mut outer = Flow::linear("outer");
    outer
        .add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    outer.add_flow(inner).unwrap();
    outer
        .add_task(AtomSpec::new("d"), SaveOrderTask::new("d", &values))
        .unwrap();

    let engine = ActionEngine::new(&outer, Arc::new(MemoryStorage::new())).unwrap();
    let verdict = engine.run().await.unwrap();

    assert_eq!(verdict, EngineVerdict::Success);
    let recorded = values.lock();
    assert_eq!(recorded.len(), 4);
    assert_eq!(recorded[0], "a");
    assert_eq!(recorded[3], "d");
}

#[tokio::test]
async fn suspension_stops_scheduling_and_a_rerun_resumes() {
    let values: SharedValues = Arc::new(Mutex::new(Vec::new()));
    let mut flow = Flow::linear("lin");
    flow.add_task(AtomSpec::new("a"), SaveOrderTask::new("a", &values))
        .unwrap();
    flow.add_task(AtomSpec::new("b"), SaveOrderTask::new("b", &values))
        .unwrap();

    let engine = ActionEngine::new(&flow, Arc::new(MemoryStorage::new())).unwrap();
    let suspender = engine.suspender();
    engine
        .notifier()
        .register(Arc::new(move |event| {
            if event.atom == "a" && event.kind == AtomEventKind::Success {
                suspender.suspend();
            }
        }));

    let verdict = engine.run().await.unwrap();
    assert_eq!(verdict, EngineVerdict::Suspended);
    assert_eq!(state_of(&engine, "a"), AtomState::Success);
    assert_eq!(state_of(&engine, "b"), AtomState::Pending);

    // A fresh run clears the flag and picks up where storage left off.
    let verdict = engine.run().await.unwrap();
    assert_eq!(verdict, EngineVerdict::Success);
    assert_eq!(*values.lock(), vec!["a", "b"]);
}
