//! One live execution of a sequence
//!
//! A [`RunningSequence`] is a small state machine:
//!
//! ```text
//! Running ──cancel()──▶ Cancelled
//!    │
//!    └──past last step──▶ Finished
//! ```
//!
//! Each scheduled callback runs exactly one step and reschedules itself.
//! The status under the per-run mutex is the single source of truth: it is
//! checked at the top of every callback and again before a rescheduled
//! handle is stored. The mutex is never held while calling extensions,
//! observers or the scheduler, so an action may cancel its own run.

use crate::extension::Action;
use crate::observer::SequenceEvent;
use crate::placeholder;
use crate::registry::LifecycleEvent;
use crate::run_manager::RunManagerInner;
use crate::scheduler::TaskHandle;
use crate::syntax::{CHECK_ATTRIBUTE, CONDITION_ATTRIBUTE, INCLUDE_ATTRIBUTE};
use chrono::{DateTime, Utc};
use sequencer_types::{
    ConfigSequence, ConfigStep, ErrorKind, PrincipalRef, RunOptions, SequenceError,
    SequenceResult, Token,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

// ── Run Identifier ───────────────────────────────────────────────────

/// Unique identifier of one execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Run Status ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Cancelled,
    Finished,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Serializable snapshot of a run, for listings and lifecycle hooks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub section: String,
    pub sequence: String,
    /// Last step started, 0 before the first one
    pub step_nr: u32,
    pub step_count: usize,
    pub status: RunStatus,
    pub initiator: Option<String>,
    pub singleton: bool,
    pub started_at: DateTime<Utc>,
}

// ── Running Sequence ─────────────────────────────────────────────────

struct RunState {
    step_nr: u32,
    status: RunStatus,
    pending: Option<Box<dyn TaskHandle>>,
    /// Bumped on every schedule call; only the latest call may store its handle
    generation: u64,
}

/// A live execution
pub struct RunningSequence {
    id: RunId,
    sequence: Arc<ConfigSequence>,
    options: RunOptions,
    runner: Token,
    started_at: DateTime<Utc>,
    state: Mutex<RunState>,
    manager: Weak<RunManagerInner>,
}

impl RunningSequence {
    pub(crate) fn new(
        sequence: Arc<ConfigSequence>,
        options: RunOptions,
        runner: Token,
        manager: Weak<RunManagerInner>,
    ) -> Self {
        Self {
            id: RunId::generate(),
            sequence,
            options,
            runner,
            started_at: Utc::now(),
            state: Mutex::new(RunState {
                step_nr: 0,
                status: RunStatus::Running,
                pending: None,
                generation: 0,
            }),
            manager,
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn sequence(&self) -> &Arc<ConfigSequence> {
        &self.sequence
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn runner(&self) -> &Token {
        &self.runner
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn step_nr(&self) -> u32 {
        self.lock().step_nr
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    pub fn is_singleton(&self) -> bool {
        self.options.singleton
    }

    pub fn info(&self) -> RunInfo {
        let (step_nr, status) = {
            let state = self.lock();
            (state.step_nr, state.status)
        };
        RunInfo {
            run_id: self.id.clone(),
            section: self.sequence.section_name().to_string(),
            sequence: self.sequence.name().to_string(),
            step_nr,
            step_count: self.sequence.len(),
            status,
            initiator: self.options.initiator_name().map(String::from),
            singleton: self.options.singleton,
            started_at: self.started_at,
        }
    }

    /// Stop the run before its next step
    ///
    /// Returns `true` if this call cancelled the run, `false` if it had
    /// already ended.
    pub fn cancel(&self) -> bool {
        let (pending, step_nr) = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = RunStatus::Cancelled;
            (state.pending.take(), state.step_nr)
        };
        if let Some(handle) = pending {
            handle.cancel();
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.id);
            manager.notify(&SequenceEvent::Cancelled {
                run_id: self.id.clone(),
                sequence: self.sequence.name().to_string(),
                step: step_nr,
            });
            manager
                .extensions
                .fire_lifecycle(LifecycleEvent::Cancel, &self.info());
        }
        true
    }

    // ── Scheduling ───────────────────────────────────────────────────

    /// Schedule the next callback `delay` ticks from now
    ///
    /// The callback may already have fired, and even rescheduled, by the
    /// time the scheduler hands back its handle. That handle is then stale
    /// and is dropped instead of replacing the newer one.
    pub(crate) fn schedule(self: &Arc<Self>, manager: &RunManagerInner, delay: u64) {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.generation
        };

        let run = Arc::clone(self);
        let handle = manager
            .scheduler
            .schedule(delay, Box::new(move || run.advance()));

        let mut state = self.lock();
        if state.status != RunStatus::Running {
            drop(state);
            handle.cancel();
        } else if state.generation == generation {
            state.pending = Some(handle);
        }
    }

    /// Scheduled callback: run the next step or finish
    fn advance(self: &Arc<Self>) {
        let Some(manager) = self.manager.upgrade() else {
            tracing::debug!(run_id = %self.id, "Engine gone, run abandoned");
            return;
        };

        let step_nr = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            state.pending = None;
            let next = state.step_nr + 1;
            if next as usize <= self.sequence.len() {
                state.step_nr = next;
            }
            next
        };

        let Some(step) = self.sequence.step(step_nr) else {
            self.finish(&manager);
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_step(&manager, step)));
        if let Err(panic) = outcome {
            let err = step
                .error(ErrorKind::Unexpected, panic_message(panic.as_ref()))
                .in_section(self.sequence.section_name());
            manager.report(self, &err);
            self.cancel();
            return;
        }

        if self.is_running() {
            let delay = manager.config.step_delay_ticks(step.wait());
            self.schedule(&manager, delay);
        }
    }

    fn finish(&self, manager: &RunManagerInner) {
        let pending = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = RunStatus::Finished;
            state.pending.take()
        };
        if let Some(handle) = pending {
            handle.cancel();
        }

        manager.remove(&self.id);
        manager.notify(&SequenceEvent::Finished {
            run_id: self.id.clone(),
            sequence: self.sequence.name().to_string(),
        });
        manager
            .extensions
            .fire_lifecycle(LifecycleEvent::Finish, &self.info());
    }

    // ── Step Pipeline ────────────────────────────────────────────────

    fn run_step(&self, manager: &RunManagerInner, step: &ConfigStep) {
        manager.notify(&SequenceEvent::StepReached {
            run_id: self.id.clone(),
            sequence: self.sequence.name().to_string(),
            step: step.step_nr(),
            action: step.action().to_string(),
        });

        // Any collaborator below may cancel the run; nothing after that
        // point may take effect.
        let resolved =
            placeholder::resolve_attributes(self, step, &manager.extensions.placeholders);
        if !self.is_running() {
            return;
        }
        for name in resolved.unresolved {
            manager.notify(&SequenceEvent::PlaceholderWarn {
                run_id: self.id.clone(),
                sequence: self.sequence.name().to_string(),
                step: step.step_nr(),
                placeholder: name,
            });
        }
        for err in &resolved.errors {
            manager.report(self, err);
        }

        let ctx = StepContext::new(self, step, &resolved.attributes, &[]);

        for name in step.get_list(CHECK_ATTRIBUTE) {
            let passed = manager
                .extensions
                .checks
                .get(&name)
                .and_then(|check| check.check(&ctx));
            if !self.is_running() {
                return;
            }
            match passed {
                Ok(true) => {}
                Ok(false) => {
                    manager.notify(&SequenceEvent::CheckFailed {
                        run_id: self.id.clone(),
                        sequence: self.sequence.name().to_string(),
                        step: step.step_nr(),
                        check: name,
                    });
                    return;
                }
                Err(err) => {
                    manager.report(
                        self,
                        &self.located(
                            step,
                            err.wrap(ErrorKind::Check)
                                .with_detail(format!("check '{}'", name)),
                        ),
                    );
                    return;
                }
            }
        }

        let targets = match self.resolve_targets(manager, step, &ctx) {
            Ok(targets) => targets,
            Err(err) => {
                manager.report(self, &self.located(step, err));
                return;
            }
        };
        if !self.is_running() {
            return;
        }
        let ctx = ctx.with_targets(&targets);

        let action: Arc<dyn Action> = match manager.extensions.actions.get(step.action()) {
            Ok(action) => action,
            Err(err) => {
                manager.report(self, &self.located(step, err));
                return;
            }
        };
        if let Err(err) = action.execute(&ctx) {
            manager.report(self, &self.located(step, err));
        }
    }

    /// Principals a step targets: its include filtered by its conditions,
    /// or the initiator when no include is named
    fn resolve_targets(
        &self,
        manager: &RunManagerInner,
        step: &ConfigStep,
        ctx: &StepContext<'_>,
    ) -> SequenceResult<Vec<PrincipalRef>> {
        let mut targets = match step.get(INCLUDE_ATTRIBUTE).map(str::trim) {
            Some(name) => manager
                .extensions
                .includes
                .get(name)
                .and_then(|include| include.include(ctx))
                .map_err(|e| {
                    e.wrap(ErrorKind::Include)
                        .with_detail(format!("include '{}'", name))
                })?,
            None => self.options.initiator.iter().cloned().collect(),
        };

        for name in step.get_list(CONDITION_ATTRIBUTE) {
            let wrap = |e: SequenceError| {
                e.wrap(ErrorKind::Condition)
                    .with_detail(format!("condition '{}'", name))
            };
            let condition = manager.extensions.conditions.get(&name).map_err(wrap)?;
            let mut kept = Vec::with_capacity(targets.len());
            for target in targets {
                if condition.test(&target, ctx).map_err(wrap)? {
                    kept.push(target);
                }
            }
            targets = kept;
        }
        Ok(targets)
    }

    /// Fill in section, sequence and step where the error left them open
    fn located(&self, step: &ConfigStep, mut err: SequenceError) -> SequenceError {
        if err.context.section.is_none() {
            err.context.section = Some(self.sequence.section_name().to_string());
        }
        if err.context.sequence.is_none() {
            err.context.sequence = Some(self.sequence.name().to_string());
        }
        if err.context.step.is_none() {
            err.context.step = Some(step.step_nr());
        }
        err
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RunningSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RunningSequence")
            .field("id", &self.id)
            .field("sequence", &self.sequence.name())
            .field("step_nr", &state.step_nr)
            .field("status", &state.status)
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

// ── Step Context ─────────────────────────────────────────────────────

/// Everything an extension sees while a step executes
///
/// Attribute reads return placeholder-resolved values.
pub struct StepContext<'a> {
    run: &'a RunningSequence,
    step: &'a ConfigStep,
    attributes: &'a HashMap<String, String>,
    targets: &'a [PrincipalRef],
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        run: &'a RunningSequence,
        step: &'a ConfigStep,
        attributes: &'a HashMap<String, String>,
        targets: &'a [PrincipalRef],
    ) -> Self {
        Self {
            run,
            step,
            attributes,
            targets,
        }
    }

    fn with_targets<'b>(&self, targets: &'b [PrincipalRef]) -> StepContext<'b>
    where
        'a: 'b,
    {
        StepContext {
            run: self.run,
            step: self.step,
            attributes: self.attributes,
            targets,
        }
    }

    pub fn run(&self) -> &RunningSequence {
        self.run
    }

    pub fn run_id(&self) -> &RunId {
        self.run.id()
    }

    pub fn sequence(&self) -> &ConfigSequence {
        self.run.sequence()
    }

    /// The step as configured, before placeholder resolution
    pub fn step(&self) -> &ConfigStep {
        self.step
    }

    pub fn step_nr(&self) -> u32 {
        self.step.step_nr()
    }

    pub fn options(&self) -> &RunOptions {
        self.run.options()
    }

    pub fn initiator(&self) -> Option<&PrincipalRef> {
        self.run.options().initiator.as_ref()
    }

    /// Targets selected by include and conditions; empty while checks run
    pub fn targets(&self) -> &[PrincipalRef] {
        self.targets
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attribute_or<'s>(&'s self, key: &str, default: &'s str) -> &'s str {
        self.attribute(key).unwrap_or(default)
    }

    pub fn attribute_int(&self, key: &str) -> SequenceResult<Option<i64>> {
        match self.attribute(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                self.error(
                    ErrorKind::Action,
                    format!("attribute '{}' must be an integer, got '{}'", key, raw),
                )
            }),
        }
    }

    /// Comma-separated list, empty entries dropped
    pub fn attribute_list(&self, key: &str) -> Vec<String> {
        self.attribute(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Request cancellation of this run; the next step never executes
    pub fn cancel(&self) -> bool {
        self.run.cancel()
    }

    /// An error located at this step
    pub fn error(&self, kind: ErrorKind, detail: impl Into<String>) -> SequenceError {
        self.step
            .error(kind, detail)
            .in_section(self.run.sequence().section_name())
    }
}
