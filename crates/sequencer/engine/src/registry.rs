//! Name → handler registries for every extension kind
//!
//! Registries are append-mostly and read on every step, so they sit behind
//! an `RwLock` and hand out `Arc` clones. Registration order is kept; it is
//! the order chains are tried in and the order of `names()`.

use crate::extension::{Action, Chain, Check, Condition, Include, Lifecycle, Placeholder};
use crate::running::RunInfo;
use sequencer_types::{ErrorKind, SequenceError, SequenceResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

// ── Extension Kind ───────────────────────────────────────────────────

/// Which registry a handler belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Action,
    Check,
    Include,
    Condition,
    Placeholder,
    Chain,
}

impl ExtensionKind {
    /// Mandatory name prefix, if any
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Check => Some("check_"),
            Self::Include => Some("include_"),
            Self::Condition => Some("condition_"),
            Self::Chain => Some("chain_"),
            Self::Action | Self::Placeholder => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Check => "check",
            Self::Include => "include",
            Self::Condition => "condition",
            Self::Placeholder => "placeholder",
            Self::Chain => "chain",
        }
    }

    /// Check a registration name against the naming rules of this kind
    pub fn validate_name(&self, name: &str) -> SequenceResult<()> {
        let invalid = |detail: String| SequenceError::new(ErrorKind::InvalidName).with_detail(detail);

        if name.is_empty() {
            return Err(invalid(format!("{} name is empty", self.as_str())));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-'))
        {
            return Err(invalid(format!(
                "{} name '{}' contains '{}'; only a-z, 0-9, '_' and '-' are allowed",
                self.as_str(),
                name,
                bad
            )));
        }
        if let Some(prefix) = self.prefix() {
            if !name.starts_with(prefix) || name.len() == prefix.len() {
                return Err(invalid(format!(
                    "{} name '{}' must start with '{}'",
                    self.as_str(),
                    name,
                    prefix
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle hook to fan out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Init,
    Cancel,
    Finish,
}

// ── Handler Registry ─────────────────────────────────────────────────

/// Registry of one extension kind
pub struct HandlerRegistry<H: ?Sized> {
    kind: ExtensionKind,
    handlers: RwLock<Vec<(String, Arc<H>)>>,
}

impl<H: ?Sized + Lifecycle> HandlerRegistry<H> {
    pub fn new(kind: ExtensionKind) -> Self {
        Self {
            kind,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    /// Register a handler under `name`
    pub fn register(&self, name: impl Into<String>, handler: Arc<H>) -> SequenceResult<()> {
        let name = name.into();
        self.kind.validate_name(&name)?;

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|(existing, _)| *existing == name) {
            return Err(SequenceError::new(ErrorKind::Duplicate)
                .with_detail(format!("{} '{}' is already registered", self.kind, name)));
        }
        handlers.push((name.clone(), handler));

        tracing::debug!(kind = %self.kind, name = %name, "Handler registered");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> SequenceResult<Arc<H>> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let index = handlers
            .iter()
            .position(|(existing, _)| existing == name)
            .ok_or_else(|| self.not_found(name))?;
        let (_, handler) = handlers.remove(index);

        tracing::debug!(kind = %self.kind, name = %name, "Handler unregistered");
        Ok(handler)
    }

    pub fn get(&self, name: &str) -> SequenceResult<Arc<H>> {
        self.read()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| self.not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|(existing, _)| existing == name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Snapshot of all handlers, in registration order
    pub fn handlers(&self) -> Vec<(String, Arc<H>)> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Call one lifecycle hook on every handler
    ///
    /// A panicking hook is logged and does not stop the fan-out.
    pub fn fire(&self, event: LifecycleEvent, run: &RunInfo) {
        for (name, handler) in self.handlers() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                LifecycleEvent::Init => handler.on_init(run),
                LifecycleEvent::Cancel => handler.on_cancel(run),
                LifecycleEvent::Finish => handler.on_finish(run),
            }));
            if outcome.is_err() {
                tracing::error!(
                    kind = %self.kind,
                    name = %name,
                    run_id = %run.run_id,
                    event = ?event,
                    "Lifecycle hook panicked"
                );
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, Arc<H>)>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(&self, name: &str) -> SequenceError {
        SequenceError::not_found(format!("no {} named '{}'", self.kind, name))
    }
}

impl<H: ?Sized + Lifecycle> std::fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

// ── Extensions ───────────────────────────────────────────────────────

/// All registries of one engine
#[derive(Debug)]
pub struct Extensions {
    pub actions: HandlerRegistry<dyn Action>,
    pub checks: HandlerRegistry<dyn Check>,
    pub includes: HandlerRegistry<dyn Include>,
    pub conditions: HandlerRegistry<dyn Condition>,
    pub placeholders: HandlerRegistry<dyn Placeholder>,
    pub chains: HandlerRegistry<dyn Chain>,
}

impl Extensions {
    pub fn new() -> Self {
        Self {
            actions: HandlerRegistry::new(ExtensionKind::Action),
            checks: HandlerRegistry::new(ExtensionKind::Check),
            includes: HandlerRegistry::new(ExtensionKind::Include),
            conditions: HandlerRegistry::new(ExtensionKind::Condition),
            placeholders: HandlerRegistry::new(ExtensionKind::Placeholder),
            chains: HandlerRegistry::new(ExtensionKind::Chain),
        }
    }

    /// Fan a lifecycle hook out to every handler of every kind
    pub fn fire_lifecycle(&self, event: LifecycleEvent, run: &RunInfo) {
        self.actions.fire(event, run);
        self.checks.fire(event, run);
        self.includes.fire(event, run);
        self.conditions.fire(event, run);
        self.placeholders.fire(event, run);
        self.chains.fire(event, run);
    }
}

impl Default for Extensions {
    fn default() -> Self {
        Self::new()
    }
}
