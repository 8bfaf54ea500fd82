//! The action engine facade: compile, prepare, validate, run.

use crate::builder::{EngineVerdict, MachineBuilder};
use crate::compiler::compile;
use crate::error::{EngineError, Result};
use crate::executor::{DirectExecutor, TokioExecutor};
use crate::flow::Flow;
use crate::notifier::Notifier;
use crate::runtime::Runtime;
use atomflow_storage::{AtomRegistration, Failure, Storage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_WORKERS: usize = 4;

/// Tunables for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Parallel task workers in the executor pool
    pub workers: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Handle for cooperatively suspending a running engine.
///
/// Safe to clone into listeners or other tasks; suspension takes effect at
/// the engine's next analysis pass and never cancels in-flight atoms.
#[derive(Debug, Clone)]
pub struct Suspender {
    flag: Arc<AtomicBool>,
}

impl Suspender {
    /// Ask the engine to stop scheduling new atoms.
    pub fn suspend(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Compiles a flow and drives it to a terminal verdict.
pub struct ActionEngine {
    runtime: Runtime,
    options: EngineOptions,
    suspend: Arc<AtomicBool>,
}

impl ActionEngine {
    /// Engine with default options.
    pub fn new(flow: &Flow, storage: Arc<dyn Storage>) -> Result<Self> {
        Self::with_options(flow, storage, EngineOptions::default())
    }

    /// Engine with explicit options. Compiles the flow and registers every
    /// atom (and its provided symbols) with storage.
    pub fn with_options(
        flow: &Flow,
        storage: Arc<dyn Storage>,
        options: EngineOptions,
    ) -> Result<Self> {
        let graph = Arc::new(compile(flow)?);
        for ix in graph.iter_atoms() {
            let spec = graph.node(ix).spec().expect("atom nodes carry a spec");
            storage.ensure_atom(
                AtomRegistration::new(&spec.name).provides(spec.provides.clone()),
            )?;
        }
        let notifier = Arc::new(Notifier::new());
        let runtime = Runtime::new(
            graph,
            storage,
            notifier,
            Arc::new(TokioExecutor::new(options.workers)),
            Arc::new(DirectExecutor::new()),
        );
        Ok(Self {
            runtime,
            options,
            suspend: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The engine's tunables.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The notification sink; register listeners here before running.
    pub fn notifier(&self) -> &Arc<Notifier> {
        self.runtime.notifier()
    }

    /// The storage adapter backing this engine.
    pub fn storage(&self) -> &dyn Storage {
        self.runtime.storage()
    }

    /// The assembled runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// A handle that can suspend this engine from anywhere.
    pub fn suspender(&self) -> Suspender {
        Suspender {
            flag: self.suspend.clone(),
        }
    }

    /// Check that every required symbol is resolvable before running:
    /// injected on the atom, injected into storage, or produced by some
    /// registered atom.
    pub fn validate(&self) -> Result<()> {
        let graph = self.runtime.graph();
        let mut missing: Vec<String> = Vec::new();
        for ix in graph.iter_atoms() {
            let spec = graph.node(ix).spec().expect("atom nodes carry a spec");
            for symbol in &spec.requires {
                if spec.inject.contains_key(symbol) {
                    continue;
                }
                let key = spec
                    .rebind
                    .get(symbol)
                    .map(String::as_str)
                    .unwrap_or(symbol);
                if !self.runtime.storage().is_resolvable(key) {
                    missing.push(format!("'{key}' (required by '{}')", spec.name));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::dependency(format!(
                "unresolvable symbols: {}",
                missing.join(", ")
            )))
        }
    }

    /// Validate, then run the workflow to a terminal verdict. A prior
    /// suspension is cleared on entry, so calling `run` again resumes from
    /// whatever states storage holds.
    pub async fn run(&self) -> Result<EngineVerdict> {
        self.validate()?;
        self.suspend.store(false, Ordering::SeqCst);
        tracing::info!(
            atoms = self.runtime.graph().iter_atoms().count(),
            workers = self.options.workers,
            "running workflow"
        );
        let verdict = MachineBuilder::new(&self.runtime, self.suspend.clone())
            .run()
            .await?;
        if let EngineVerdict::Failed { failures } = &verdict {
            let wrapped = Failure::wrap_all(failures.clone());
            tracing::warn!(failure = %wrapped, "workflow failed");
        }
        tracing::info!(verdict = ?verdict, "workflow finished");
        Ok(verdict)
    }
}

impl std::fmt::Debug for ActionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEngine")
            .field("options", &self.options)
            .field("runtime", &self.runtime)
            .finish()
    }
}
