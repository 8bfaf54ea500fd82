//! The engine state machine: schedule, wait for any, complete, repeat.
//!
//! The loop is single-threaded and is the only mutator of storage; workers
//! only produce envelopes. Waiting uses a wait-for-any primitive, so newly
//! unblocked atoms are scheduled as soon as any predecessor finishes rather
//! than after the whole batch drains.

use crate::analyzer::Analyzer;
use crate::completer::Completer;
use crate::error::Result;
use crate::executor::{wait_for_any, AtomFuture};
use crate::graph::NodeIx;
use crate::runtime::Runtime;
use crate::scheduler::Scheduler;
use atomflow_storage::{AtomState, Failure};
use futures::stream::FuturesUnordered;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coarse states of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Not started
    Undefined,
    /// Computing the ready frontier
    Analyzing,
    /// Submitting the current frontier
    Scheduling,
    /// Blocked on the wait-for-any primitive
    Waiting,
    /// No work left; computing the verdict
    GameOver,
    /// Cooperatively suspended
    Suspended,
}

/// Terminal outcome of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineVerdict {
    /// Every atom finished `SUCCESS` or `IGNORE`
    Success,
    /// A failure occurred and compensation completed cleanly
    Reverted,
    /// Unresolved failures remain
    Failed {
        /// The collected failures, ordered by atom name
        failures: Vec<Failure>,
    },
    /// A cooperative suspend stopped scheduling; atom states persist
    Suspended,
}

/// Drives one workflow run over a runtime.
pub struct MachineBuilder<'a> {
    runtime: &'a Runtime,
    suspend: Arc<AtomicBool>,
}

impl<'a> MachineBuilder<'a> {
    /// Builder over a runtime with a cooperative suspend flag.
    pub fn new(runtime: &'a Runtime, suspend: Arc<AtomicBool>) -> Self {
        Self { runtime, suspend }
    }

    /// Run until terminal or suspended.
    pub async fn run(&self) -> Result<EngineVerdict> {
        let analyzer = Analyzer::new(self.runtime);
        let completer = Completer::new(self.runtime);
        let scheduler = Scheduler::new(self.runtime);
        let graph = self.runtime.graph();

        let mut outstanding: FuturesUnordered<AtomFuture> = FuturesUnordered::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut seeds: Vec<NodeIx> = Vec::new();
        let mut global_pass = true;
        let mut state = MachineState::Undefined;
        transition(&mut state, MachineState::Analyzing);

        loop {
            if self.suspend.load(Ordering::SeqCst) {
                transition(&mut state, MachineState::Suspended);
                // No new scheduling, but in-flight work is never cancelled;
                // record whatever it produces before handing back control.
                while !outstanding.is_empty() {
                    for envelope in wait_for_any(&mut outstanding).await {
                        in_flight.remove(&envelope.atom);
                        completer.complete(envelope)?;
                    }
                }
                return Ok(EngineVerdict::Suspended);
            }

            let mut to_schedule: Vec<NodeIx> = Vec::new();
            let mut seen: HashSet<NodeIx> = HashSet::new();
            let pass_seeds: Vec<Option<NodeIx>> = if global_pass {
                vec![None]
            } else {
                seeds.iter().map(|&seed| Some(seed)).collect()
            };
            for seed in pass_seeds {
                // The frontier is consumed lazily on purpose: a decider that
                // just suppressed an atom changes what deeper atoms report.
                for item in analyzer.iter_next_atoms(seed)? {
                    let (ix, decider) = item?;
                    if !seen.insert(ix) {
                        continue;
                    }
                    if decider.check_and_affect(self.runtime)? {
                        to_schedule.push(ix);
                    }
                }
            }
            seeds.clear();

            if !to_schedule.is_empty() {
                transition(&mut state, MachineState::Scheduling);
                for ix in to_schedule {
                    let name = graph.node(ix).name.clone();
                    let future = scheduler.schedule(ix)?;
                    let first = in_flight.insert(name.clone());
                    debug_assert!(first, "atom '{name}' already has an outstanding future");
                    outstanding.push(future);
                }
                transition(&mut state, MachineState::Waiting);
            } else if !outstanding.is_empty() {
                transition(&mut state, MachineState::Waiting);
            } else if !global_pass {
                // Seeded passes can miss work freed up by an ignore cascade;
                // confirm emptiness with one global look before finishing.
                global_pass = true;
                continue;
            } else {
                transition(&mut state, MachineState::GameOver);
                break;
            }

            let completed = wait_for_any(&mut outstanding).await;
            global_pass = false;
            for envelope in completed {
                in_flight.remove(&envelope.atom);
                let ix = completer.complete(envelope)?;
                seeds.push(ix);
            }
            transition(&mut state, MachineState::Analyzing);
        }

        self.verdict(&analyzer)
    }

    // The final verdict reflects terminal storage state.
    fn verdict(&self, analyzer: &Analyzer<'_>) -> Result<EngineVerdict> {
        if analyzer.is_success()? {
            return Ok(EngineVerdict::Success);
        }
        let graph = self.runtime.graph();
        let mut any_failure_state = false;
        let mut compensated = true;
        for ix in graph.iter_atoms() {
            let state = self.runtime.storage().get_atom_state(&graph.node(ix).name)?;
            any_failure_state |= state == AtomState::Failure;
            compensated &= matches!(
                state,
                AtomState::Reverted | AtomState::Pending | AtomState::Ignore
            );
        }
        if compensated && !any_failure_state {
            return Ok(EngineVerdict::Reverted);
        }
        let mut collected: Vec<(String, Failure)> =
            self.runtime.storage().failures()?.into_iter().collect();
        collected.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(EngineVerdict::Failed {
            failures: collected.into_iter().map(|(_, failure)| failure).collect(),
        })
    }
}

fn transition(state: &mut MachineState, to: MachineState) {
    tracing::debug!(from = ?state, to = ?to, "engine state");
    *state = to;
}
