//! Extension points consumed by the engine
//!
//! Concrete step behaviour lives in the host. The engine only knows these
//! traits and looks implementations up by name in the
//! [`Extensions`](crate::Extensions) registries. Every call happens
//! synchronously inside a step callback.

use crate::placeholder::PlaceholderScope;
use crate::running::{RunInfo, StepContext};
use sequencer_types::{ConfigSequence, ConfigStep, PrincipalRef, RunOptions, SequenceResult};

/// Hooks fired once per handler when any run starts, is cancelled or finishes
pub trait Lifecycle: Send + Sync {
    fn on_init(&self, _run: &RunInfo) {}

    fn on_cancel(&self, _run: &RunInfo) {}

    fn on_finish(&self, _run: &RunInfo) {}
}

// ── Action ───────────────────────────────────────────────────────────

/// Performs the effect of a step (`action: <name>`)
pub trait Action: Lifecycle {
    /// Attributes a step using this action must carry
    fn required_attributes(&self) -> &[&'static str] {
        &[]
    }

    /// Attributes a step may carry besides the required and common ones
    fn optional_attributes(&self) -> &[&'static str] {
        &[]
    }

    /// Skip the unknown-attribute rule entirely
    fn accepts_any_attribute(&self) -> bool {
        false
    }

    /// Action-specific syntax rules, run when the step is built
    fn validate_syntax(&self, _step: &ConfigStep) -> SequenceResult<()> {
        Ok(())
    }

    /// May this run use the step at all? Consulted once per step at start.
    fn is_authorized(&self, _step: &ConfigStep, _options: &RunOptions) -> bool {
        true
    }

    fn execute(&self, ctx: &StepContext<'_>) -> SequenceResult<()>;
}

// ── Gating and Targeting ─────────────────────────────────────────────

/// Gate on a step (`check: check_a, check_b`); `false` skips the action
pub trait Check: Lifecycle {
    fn check(&self, ctx: &StepContext<'_>) -> SequenceResult<bool>;
}

/// Selects the principals a step targets (`include: include_x`)
pub trait Include: Lifecycle {
    fn include(&self, ctx: &StepContext<'_>) -> SequenceResult<Vec<PrincipalRef>>;
}

/// Filters targets (`condition: condition_a, condition_b`)
pub trait Condition: Lifecycle {
    fn test(&self, principal: &PrincipalRef, ctx: &StepContext<'_>) -> SequenceResult<bool>;
}

// ── Resolution ───────────────────────────────────────────────────────

/// Supplies the value of `%name%` where `name` is the registration name
pub trait Placeholder: Lifecycle {
    /// `Ok(None)` leaves the placeholder unresolved
    fn resolve(&self, scope: &PlaceholderScope<'_>) -> SequenceResult<Option<String>>;
}

/// May rewrite the options of a run before it starts
///
/// Chains run in registration order; the first one returning `Some` wins.
pub trait Chain: Lifecycle {
    fn resolve(
        &self,
        sequence: &ConfigSequence,
        options: &RunOptions,
    ) -> SequenceResult<Option<RunOptions>>;
}
