//! Registry of live runs
//!
//! The RunManager admits new runs (capacity, singleton rule, security
//! token, engine instance, syntax, per-action authorization, chains),
//! tracks them in a concurrent map until they end and answers queries over
//! them. Every query works on a snapshot of the live set, so cancelling
//! from inside a query never touches a map entry that is being iterated.

use crate::config::EngineConfig;
use crate::observer::{ObserverSet, SequenceEvent};
use crate::registry::{Extensions, LifecycleEvent};
use crate::running::{panic_message, RunId, RunInfo, RunningSequence};
use crate::scheduler::Scheduler;
use crate::syntax::ActionValidator;
use dashmap::DashMap;
use sequencer_types::{
    ConfigSequence, ErrorKind, RunOptions, SequenceError, SequenceResult, Token,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ── Shared State ─────────────────────────────────────────────────────

/// State shared between the manager and its runs
///
/// Runs only hold a `Weak` to this, so dropping the engine stops them.
pub(crate) struct RunManagerInner {
    pub(crate) config: EngineConfig,
    pub(crate) extensions: Arc<Extensions>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) observers: Arc<ObserverSet>,
    validator: ActionValidator,
    live: DashMap<RunId, Arc<RunningSequence>>,
    /// Serializes the final admission checks with registration
    admission: Mutex<()>,
    disabled: AtomicBool,
}

impl RunManagerInner {
    pub(crate) fn notify(&self, event: &SequenceEvent) {
        self.observers.notify(event);
    }

    /// Publish a step failure; the run itself goes on
    pub(crate) fn report(&self, run: &RunningSequence, err: &SequenceError) {
        self.notify(&SequenceEvent::ExecutionError {
            run_id: run.id().clone(),
            sequence: run.sequence().name().to_string(),
            step: err.context.step,
            kind: err.kind,
            message: err.cascade(),
        });
    }

    pub(crate) fn remove(&self, run_id: &RunId) {
        self.live.remove(run_id);
    }

    fn snapshot(&self) -> Vec<Arc<RunningSequence>> {
        self.live
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn singleton_running(&self, sequence: &Arc<ConfigSequence>) -> bool {
        self.snapshot()
            .iter()
            .any(|run| Arc::ptr_eq(run.sequence(), sequence) && run.is_running())
    }

    /// Capacity and singleton rule
    fn check_admission(
        &self,
        sequence: &Arc<ConfigSequence>,
        options: &RunOptions,
    ) -> SequenceResult<()> {
        if self.live.len() >= self.config.max_running_sequences {
            return Err(SequenceError::new(ErrorKind::TooMany)
                .with_detail(format!(
                    "limit of {} running sequences reached",
                    self.config.max_running_sequences
                ))
                .in_section(sequence.section_name())
                .in_sequence(sequence.name()));
        }
        if options.singleton && self.singleton_running(sequence) {
            return Err(SequenceError::new(ErrorKind::SingletonRunning)
                .in_section(sequence.section_name())
                .in_sequence(sequence.name()));
        }
        Ok(())
    }

    fn check_disabled(&self) -> SequenceResult<()> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(SequenceError::new(ErrorKind::Disabled).with_detail("engine is shutting down"))
        } else {
            Ok(())
        }
    }
}

// ── Run Manager ──────────────────────────────────────────────────────

/// Creates, tracks and cancels runs
#[derive(Clone)]
pub struct RunManager {
    inner: Arc<RunManagerInner>,
}

impl RunManager {
    pub fn new(
        config: EngineConfig,
        extensions: Arc<Extensions>,
        validator: ActionValidator,
        scheduler: Arc<dyn Scheduler>,
        observers: Arc<ObserverSet>,
    ) -> Self {
        Self {
            inner: Arc::new(RunManagerInner {
                config,
                extensions,
                scheduler,
                observers,
                validator,
                live: DashMap::new(),
                admission: Mutex::new(()),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a run of `sequence`
    ///
    /// `security` must be the sequence's current security token; `runner`
    /// identifies the caller for later cancellation queries. The first step
    /// runs `first_step_delay_ticks` later, never inside this call.
    pub fn execute(
        &self,
        runner: &Token,
        sequence: &Arc<ConfigSequence>,
        security: &Token,
        options: RunOptions,
    ) -> SequenceResult<Arc<RunningSequence>> {
        let inner = &self.inner;

        inner.check_disabled()?;
        inner.check_admission(sequence, &options)?;

        if !sequence.authorizes(security) {
            return Err(SequenceError::not_authorized()
                .with_detail("security token does not match")
                .in_section(sequence.section_name())
                .in_sequence(sequence.name()));
        }
        inner.validator.ensure_same_instance(sequence)?;
        sequence.validate_syntax(&inner.validator)?;

        for step in sequence.steps() {
            let action = inner.extensions.actions.get(step.action())?;
            let authorized =
                catch_unwind(AssertUnwindSafe(|| action.is_authorized(step, &options))).map_err(
                    |panic| {
                        step.error(ErrorKind::Unexpected, panic_message(panic.as_ref()))
                            .in_section(sequence.section_name())
                    },
                )?;
            if !authorized {
                return Err(step
                    .error(
                        ErrorKind::ActionAuthFailed,
                        format!("action '{}' refused this run", step.action()),
                    )
                    .in_section(sequence.section_name()));
            }
        }

        let options = self.resolve_chains(sequence, options)?;

        let run = {
            let _admission = inner
                .admission
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            inner.check_disabled()?;
            inner.check_admission(sequence, &options)?;

            let run = Arc::new(RunningSequence::new(
                Arc::clone(sequence),
                options,
                *runner,
                Arc::downgrade(inner),
            ));
            inner.live.insert(run.id().clone(), Arc::clone(&run));
            run
        };

        let info = run.info();
        inner
            .extensions
            .fire_lifecycle(LifecycleEvent::Init, &info);
        inner.notify(&SequenceEvent::Started {
            run_id: info.run_id.clone(),
            section: info.section.clone(),
            sequence: info.sequence.clone(),
            initiator: info.initiator.clone(),
        });
        run.schedule(inner, inner.config.first_step_delay());

        Ok(run)
    }

    /// First chain returning new options wins
    fn resolve_chains(
        &self,
        sequence: &ConfigSequence,
        options: RunOptions,
    ) -> SequenceResult<RunOptions> {
        for (name, chain) in self.inner.extensions.chains.handlers() {
            let wrap = |e: SequenceError| {
                e.wrap(ErrorKind::Config)
                    .with_detail(format!("chain '{}' failed", name))
                    .in_section(sequence.section_name())
                    .in_sequence(sequence.name())
            };
            let rewritten = catch_unwind(AssertUnwindSafe(|| chain.resolve(sequence, &options)))
                .map_err(|panic| {
                    wrap(SequenceError::new(ErrorKind::Unexpected)
                        .with_detail(panic_message(panic.as_ref())))
                })?
                .map_err(wrap)?;
            if let Some(rewritten) = rewritten {
                tracing::debug!(sequence = %sequence.name(), chain = %name, "Run options rewritten");
                return Ok(rewritten);
            }
        }
        Ok(options)
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Cancel one run; only its runner may do so
    pub fn cancel_run(&self, run_id: &RunId, runner: &Token) -> SequenceResult<()> {
        let run = self.get(run_id).ok_or_else(|| {
            SequenceError::new(ErrorKind::NotRunning).with_detail(format!("no run '{}'", run_id))
        })?;
        if !run.runner().matches(runner) {
            return Err(SequenceError::not_authorized()
                .in_section(run.sequence().section_name())
                .in_sequence(run.sequence().name()));
        }
        if run.cancel() {
            Ok(())
        } else {
            Err(SequenceError::new(ErrorKind::NotRunning)
                .with_detail(format!("run '{}' already ended", run_id)))
        }
    }

    /// Cancel every run of sequence `name` started by `runner`
    pub fn cancel_by_name(&self, runner: &Token, name: &str) -> usize {
        self.cancel_where(|run| run.runner().matches(runner) && run.sequence().name() == name)
    }

    /// Cancel every run started by `runner`
    pub fn cancel_by_runner(&self, runner: &Token) -> usize {
        self.cancel_where(|run| run.runner().matches(runner))
    }

    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    fn cancel_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RunningSequence) -> bool,
    {
        self.inner
            .snapshot()
            .into_iter()
            .filter(|run| predicate(run.as_ref()))
            .filter(|run| run.cancel())
            .count()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Snapshot of all live runs, oldest first
    pub fn running(&self) -> Vec<RunInfo> {
        self.infos(|_| true)
    }

    /// Snapshot of the live runs started by `runner`
    pub fn running_for(&self, runner: &Token) -> Vec<RunInfo> {
        self.infos(|run| run.runner().matches(runner))
    }

    fn infos<F>(&self, predicate: F) -> Vec<RunInfo>
    where
        F: Fn(&RunningSequence) -> bool,
    {
        let mut infos: Vec<RunInfo> = self
            .inner
            .snapshot()
            .into_iter()
            .filter(|run| predicate(run.as_ref()))
            .map(|run| run.info())
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<RunningSequence>> {
        self.inner.live.get(run_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn running_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Is any live run executing this very sequence object?
    pub fn is_running(&self, sequence: &Arc<ConfigSequence>) -> bool {
        self.inner.singleton_running(sequence)
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Refuse new runs and cancel every live one
    pub fn shutdown(&self) -> usize {
        self.inner.disabled.store(true, Ordering::SeqCst);
        let cancelled = self.cancel_all();
        tracing::info!(cancelled = cancelled, "Run manager shut down");
        cancelled
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunManager")
            .field("running", &self.running_count())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
