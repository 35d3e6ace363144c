//! The engine façade
//!
//! A [`Sequencer`] wires one set of registries, one syntax manager, one
//! config manager and one run manager around an injected scheduler.
//! Engines are plain values: several may live side by side in one process
//! and a sequence validated by one is refused by the others.

use crate::config::EngineConfig;
use crate::config_manager::ConfigManager;
use crate::extension::{Action, Chain, Check, Condition, Include, Placeholder};
use crate::observer::{ObserverSet, SequenceObserver, TracingObserver};
use crate::registry::Extensions;
use crate::run_manager::RunManager;
use crate::running::RunningSequence;
use crate::scheduler::Scheduler;
use crate::syntax::{ActionValidator, SyntaxManager};
use sequencer_types::{InstanceId, RunOptions, SequenceError, SequenceResult, Token};
use std::sync::Arc;

/// One engine instance
pub struct Sequencer {
    config: EngineConfig,
    extensions: Arc<Extensions>,
    syntax: Arc<SyntaxManager>,
    observers: Arc<ObserverSet>,
    config_manager: ConfigManager,
    run_manager: RunManager,
}

impl Sequencer {
    /// Build an engine that logs every event through `tracing`
    pub fn new(config: EngineConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let engine = Self::without_observers(config, scheduler);
        engine.add_observer(Arc::new(TracingObserver));
        engine
    }

    /// Build an engine with no observer attached
    pub fn without_observers(config: EngineConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let extensions = Arc::new(Extensions::new());
        let syntax = Arc::new(SyntaxManager::new(Arc::clone(&extensions)));
        let validator = ActionValidator::new(&syntax);
        let observers = Arc::new(ObserverSet::new());

        let config_manager = ConfigManager::new(validator.clone());
        let run_manager = RunManager::new(
            config.clone(),
            Arc::clone(&extensions),
            validator,
            scheduler,
            Arc::clone(&observers),
        );

        tracing::info!(
            instance = %syntax.instance().short(),
            max_running = config.max_running_sequences,
            ticks_per_second = config.ticks_per_second,
            "Sequencer created"
        );

        Self {
            config,
            extensions,
            syntax,
            observers,
            config_manager,
            run_manager,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.syntax.instance()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn syntax(&self) -> &SyntaxManager {
        &self.syntax
    }

    /// A validator for building config objects outside the config manager
    pub fn validator(&self) -> ActionValidator {
        ActionValidator::new(&self.syntax)
    }

    pub fn configs(&self) -> &ConfigManager {
        &self.config_manager
    }

    pub fn runs(&self) -> &RunManager {
        &self.run_manager
    }

    pub fn add_observer(&self, observer: Arc<dyn SequenceObserver>) {
        self.observers.add(observer);
    }

    // ── Registration ─────────────────────────────────────────────────

    pub fn register_action(&self, name: &str, action: impl Action + 'static) -> SequenceResult<()> {
        self.extensions.actions.register(name, Arc::new(action))
    }

    pub fn register_check(&self, name: &str, check: impl Check + 'static) -> SequenceResult<()> {
        self.extensions.checks.register(name, Arc::new(check))
    }

    pub fn register_include(
        &self,
        name: &str,
        include: impl Include + 'static,
    ) -> SequenceResult<()> {
        self.extensions.includes.register(name, Arc::new(include))
    }

    pub fn register_condition(
        &self,
        name: &str,
        condition: impl Condition + 'static,
    ) -> SequenceResult<()> {
        self.extensions.conditions.register(name, Arc::new(condition))
    }

    pub fn register_placeholder(
        &self,
        name: &str,
        placeholder: impl Placeholder + 'static,
    ) -> SequenceResult<()> {
        self.extensions
            .placeholders
            .register(name, Arc::new(placeholder))
    }

    pub fn register_chain(&self, name: &str, chain: impl Chain + 'static) -> SequenceResult<()> {
        self.extensions.chains.register(name, Arc::new(chain))
    }

    // ── Running ──────────────────────────────────────────────────────

    /// Start the sequence `security` authorizes
    ///
    /// An unknown token is reported as `NotAuthorized`, the same as a
    /// known sequence with the wrong token.
    pub fn start(
        &self,
        runner: &Token,
        security: &Token,
        options: RunOptions,
    ) -> SequenceResult<Arc<RunningSequence>> {
        let sequence = self
            .config_manager
            .find_by_token(security)
            .ok_or_else(SequenceError::not_authorized)?;
        self.run_manager.execute(runner, &sequence, security, options)
    }

    /// Refuse new runs and cancel every live one
    pub fn shutdown(&self) -> usize {
        self.run_manager.shutdown()
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("instance", &self.instance())
            .field("sections", &self.config_manager.len())
            .field("running", &self.run_manager.running_count())
            .finish()
    }
}
