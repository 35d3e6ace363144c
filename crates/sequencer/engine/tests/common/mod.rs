//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use sequencer_engine::{
    Action, Check, Condition, EngineConfig, Include, Lifecycle, ManualScheduler, Placeholder,
    PlaceholderScope, RunInfo, RunningSequence, SequenceEvent, SequenceObserver, Sequencer,
    StepContext,
};
use sequencer_types::{
    ConfigSection, ErrorKind, Principal, PrincipalKind, PrincipalRef, RunOptions, SequenceError,
    SequenceResult, Token,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SequenceEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SequenceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    /// Step numbers reached, in order
    pub fn steps(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SequenceEvent::StepReached { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ErrorKind, Option<u32>, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SequenceEvent::ExecutionError {
                    kind,
                    step,
                    message,
                    ..
                } => Some((kind, step, message)),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SequenceEvent::PlaceholderWarn { placeholder, .. } => Some(placeholder),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl SequenceObserver for RecordingObserver {
    fn notify(&self, event: &SequenceEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Player {
    name: String,
}

impl Player {
    pub fn new(name: &str) -> PrincipalRef {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

impl Principal for Player {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.name == "alice" && permission == "vip"
    }

    fn kind(&self) -> PrincipalKind {
        PrincipalKind::Player
    }
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

pub type Log = Arc<Mutex<Vec<String>>>;

/// Records its (resolved) `message`
pub struct InfoAction {
    pub log: Log,
}

impl Lifecycle for InfoAction {}

impl Action for InfoAction {
    fn optional_attributes(&self) -> &[&'static str] {
        &["message"]
    }

    fn execute(&self, ctx: &StepContext<'_>) -> SequenceResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(ctx.attribute_or("message", "").to_string());
        Ok(())
    }
}

/// Records `target:message` for every target
pub struct TellAction {
    pub log: Log,
}

impl Lifecycle for TellAction {}

impl Action for TellAction {
    fn required_attributes(&self) -> &[&'static str] {
        &["message"]
    }

    fn execute(&self, ctx: &StepContext<'_>) -> SequenceResult<()> {
        let message = ctx.attribute_or("message", "");
        let mut log = self.log.lock().unwrap();
        for target in ctx.targets() {
            log.push(format!("{}:{}", target.name(), message));
        }
        Ok(())
    }
}

pub struct FailAction;

impl Lifecycle for FailAction {}

impl Action for FailAction {
    fn execute(&self, ctx: &StepContext<'_>) -> SequenceResult<()> {
        Err(ctx.error(ErrorKind::Action, "target world is offline"))
    }
}

pub struct PanicAction;

impl Lifecycle for PanicAction {}

impl Action for PanicAction {
    fn execute(&self, _ctx: &StepContext<'_>) -> SequenceResult<()> {
        panic!("scripted panic");
    }
}

/// Cancels the run it belongs to
pub struct StopAction;

impl Lifecycle for StopAction {}

impl Action for StopAction {
    fn execute(&self, ctx: &StepContext<'_>) -> SequenceResult<()> {
        ctx.cancel();
        Ok(())
    }
}

/// Only runs for options carrying the `vip` authorization key
pub struct GuardedAction;

impl Lifecycle for GuardedAction {}

impl Action for GuardedAction {
    fn is_authorized(&self, _step: &sequencer_types::ConfigStep, options: &RunOptions) -> bool {
        options.has_authorization_key("vip")
    }

    fn execute(&self, _ctx: &StepContext<'_>) -> SequenceResult<()> {
        Ok(())
    }
}

/// Counts lifecycle hooks
#[derive(Default)]
pub struct Hooks {
    pub inits: AtomicUsize,
    pub cancels: AtomicUsize,
    pub finishes: AtomicUsize,
}

impl Hooks {
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.inits.load(Ordering::SeqCst),
            self.cancels.load(Ordering::SeqCst),
            self.finishes.load(Ordering::SeqCst),
        )
    }
}

pub struct HookAction {
    pub hooks: Arc<Hooks>,
}

impl Lifecycle for HookAction {
    fn on_init(&self, _run: &RunInfo) {
        self.hooks.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancel(&self, _run: &RunInfo) {
        self.hooks.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finish(&self, _run: &RunInfo) {
        self.hooks.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Action for HookAction {
    fn execute(&self, _ctx: &StepContext<'_>) -> SequenceResult<()> {
        Ok(())
    }
}

/// Passes when the run has an initiator
pub struct HasInitiator;

impl Lifecycle for HasInitiator {}

impl Check for HasInitiator {
    fn check(&self, ctx: &StepContext<'_>) -> SequenceResult<bool> {
        Ok(ctx.initiator().is_some())
    }
}

pub struct BrokenCheck;

impl Lifecycle for BrokenCheck {}

impl Check for BrokenCheck {
    fn check(&self, ctx: &StepContext<'_>) -> SequenceResult<bool> {
        Err(ctx.error(ErrorKind::Check, "backend unavailable"))
    }
}

/// Cancels the run it gates, then lets the step through
pub struct CancellingCheck;

impl Lifecycle for CancellingCheck {}

impl Check for CancellingCheck {
    fn check(&self, ctx: &StepContext<'_>) -> SequenceResult<bool> {
        ctx.cancel();
        Ok(true)
    }
}

/// alice, bob and carol
pub struct Everyone;

impl Lifecycle for Everyone {}

impl Include for Everyone {
    fn include(&self, _ctx: &StepContext<'_>) -> SequenceResult<Vec<PrincipalRef>> {
        Ok(vec![Player::new("alice"), Player::new("bob"), Player::new("carol")])
    }
}

pub struct NotBob;

impl Lifecycle for NotBob {}

impl Condition for NotBob {
    fn test(&self, principal: &PrincipalRef, _ctx: &StepContext<'_>) -> SequenceResult<bool> {
        Ok(principal.name() != "bob")
    }
}

/// Cancels the run while filtering, keeping every target
pub struct CancellingCondition;

impl Lifecycle for CancellingCondition {}

impl Condition for CancellingCondition {
    fn test(&self, _principal: &PrincipalRef, ctx: &StepContext<'_>) -> SequenceResult<bool> {
        ctx.cancel();
        Ok(true)
    }
}

pub struct IsVip;

impl Lifecycle for IsVip {}

impl Condition for IsVip {
    fn test(&self, principal: &PrincipalRef, _ctx: &StepContext<'_>) -> SequenceResult<bool> {
        Ok(principal.has_permission("vip"))
    }
}

/// `%online%`
pub struct OnlineCount;

impl Lifecycle for OnlineCount {}

impl Placeholder for OnlineCount {
    fn resolve(&self, _scope: &PlaceholderScope<'_>) -> SequenceResult<Option<String>> {
        Ok(Some("3".to_string()))
    }
}

/// `%weather%` always fails
pub struct BrokenPlaceholder;

impl Lifecycle for BrokenPlaceholder {}

impl Placeholder for BrokenPlaceholder {
    fn resolve(&self, _scope: &PlaceholderScope<'_>) -> SequenceResult<Option<String>> {
        Err(SequenceError::new(ErrorKind::Placeholder).with_detail("no forecast"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Sequencer,
    pub scheduler: ManualScheduler,
    pub events: Arc<RecordingObserver>,
    pub log: Log,
    pub hooks: Arc<Hooks>,
    pub owner: Token,
    pub runner: Token,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let scheduler = ManualScheduler::new();
        let engine = Sequencer::new(config, Arc::new(scheduler.clone()));
        let events = Arc::new(RecordingObserver::default());
        engine.add_observer(events.clone());

        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let hooks = Arc::new(Hooks::default());
        register_all(&engine, &log, &hooks);

        Self {
            engine,
            scheduler,
            events,
            log,
            hooks,
            owner: Token::new(),
            runner: Token::new(),
        }
    }

    /// Install `yaml` as the owner's section `lobby`
    pub fn load(&self, yaml: &str) -> Arc<ConfigSection> {
        self.engine
            .configs()
            .set_section_yaml(&self.owner, "lobby", yaml)
            .unwrap()
    }

    pub fn token(&self, sequence: &str) -> Token {
        self.engine
            .configs()
            .section(&self.owner)
            .unwrap()
            .security_token(&self.owner, sequence)
            .unwrap()
    }

    pub fn start(&self, sequence: &str, options: RunOptions) -> SequenceResult<Arc<RunningSequence>> {
        self.engine.start(&self.runner, &self.token(sequence), options)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

pub fn register_all(engine: &Sequencer, log: &Log, hooks: &Arc<Hooks>) {
    engine
        .register_action("info", InfoAction { log: log.clone() })
        .unwrap();
    engine
        .register_action("tell", TellAction { log: log.clone() })
        .unwrap();
    engine.register_action("fail", FailAction).unwrap();
    engine.register_action("panic", PanicAction).unwrap();
    engine.register_action("stop", StopAction).unwrap();
    engine.register_action("guarded", GuardedAction).unwrap();
    engine
        .register_action(
            "hook",
            HookAction {
                hooks: hooks.clone(),
            },
        )
        .unwrap();
    engine
        .register_check("check_initiator", HasInitiator)
        .unwrap();
    engine.register_check("check_broken", BrokenCheck).unwrap();
    engine.register_check("check_cancel", CancellingCheck).unwrap();
    engine.register_include("include_all", Everyone).unwrap();
    engine
        .register_condition("condition_not_bob", NotBob)
        .unwrap();
    engine.register_condition("condition_vip", IsVip).unwrap();
    engine
        .register_condition("condition_cancel", CancellingCondition)
        .unwrap();
    engine.register_placeholder("online", OnlineCount).unwrap();
    engine
        .register_placeholder("weather", BrokenPlaceholder)
        .unwrap();
}
