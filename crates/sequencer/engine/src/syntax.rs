//! Step validation against the engine's registries
//!
//! [`SyntaxManager`] owns the rules. The config tree never sees it directly:
//! it is handed an [`ActionValidator`], which carries the engine's
//! [`InstanceId`] and only a weak reference back to the rules, so a section
//! never keeps an engine alive.

use crate::registry::Extensions;
use sequencer_types::{
    ConfigSequence, ConfigStep, ErrorKind, InstanceId, SequenceError, SequenceResult,
    StepValidator, ACTION_ATTRIBUTE, WAIT_ATTRIBUTE,
};
use std::sync::{Arc, Weak};

/// Comma list of checks gating the step
pub const CHECK_ATTRIBUTE: &str = "check";

/// Include selecting the step's targets
pub const INCLUDE_ATTRIBUTE: &str = "include";

/// Comma list of conditions filtering the targets
pub const CONDITION_ATTRIBUTE: &str = "condition";

/// Attributes every step may carry regardless of its action
pub const COMMON_ATTRIBUTES: &[&str] = &[
    ACTION_ATTRIBUTE,
    WAIT_ATTRIBUTE,
    CHECK_ATTRIBUTE,
    INCLUDE_ATTRIBUTE,
    CONDITION_ATTRIBUTE,
];

// ── Syntax Manager ───────────────────────────────────────────────────

/// Validation rules of one engine instance
#[derive(Debug)]
pub struct SyntaxManager {
    instance: InstanceId,
    extensions: Arc<Extensions>,
}

impl SyntaxManager {
    pub fn new(extensions: Arc<Extensions>) -> Self {
        Self {
            instance: InstanceId::generate(),
            extensions,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Validate one step against the registered extensions
    pub fn validate(&self, step: &ConfigStep) -> SequenceResult<()> {
        let action_name = step.action();
        let action = self.extensions.actions.get(action_name).map_err(|_| {
            step.error(
                ErrorKind::Syntax,
                format!("unknown action '{}'", action_name),
            )
        })?;

        for required in action.required_attributes() {
            if !step.has(required) {
                return Err(step.error(
                    ErrorKind::Syntax,
                    format!(
                        "action '{}' requires attribute '{}'",
                        action_name, required
                    ),
                ));
            }
        }

        if !action.accepts_any_attribute() {
            let mut keys: Vec<&String> = step.attributes().keys().collect();
            keys.sort();
            for key in keys {
                let known = COMMON_ATTRIBUTES
                    .iter()
                    .chain(action.required_attributes())
                    .chain(action.optional_attributes())
                    .any(|allowed| *allowed == key.as_str());
                if !known {
                    return Err(step.error(
                        ErrorKind::Syntax,
                        format!("unknown attribute '{}' for action '{}'", key, action_name),
                    ));
                }
            }
        }

        for check in step.get_list(CHECK_ATTRIBUTE) {
            if !self.extensions.checks.contains(&check) {
                return Err(step.error(ErrorKind::Syntax, format!("unknown check '{}'", check)));
            }
        }

        if let Some(include) = step.get(INCLUDE_ATTRIBUTE) {
            let include = include.trim();
            if !self.extensions.includes.contains(include) {
                return Err(step.error(
                    ErrorKind::Syntax,
                    format!("unknown include '{}'", include),
                ));
            }
        }

        for condition in step.get_list(CONDITION_ATTRIBUTE) {
            if !self.extensions.conditions.contains(&condition) {
                return Err(step.error(
                    ErrorKind::Syntax,
                    format!("unknown condition '{}'", condition),
                ));
            }
        }

        action.validate_syntax(step)
    }
}

impl StepValidator for SyntaxManager {
    fn instance(&self) -> InstanceId {
        self.instance
    }

    fn validate_step(&self, step: &ConfigStep) -> SequenceResult<()> {
        self.validate(step)
    }
}

// ── Action Validator ─────────────────────────────────────────────────

/// The validator handed to the config tree
#[derive(Clone, Debug)]
pub struct ActionValidator {
    instance: InstanceId,
    syntax: Weak<SyntaxManager>,
}

impl ActionValidator {
    pub fn new(syntax: &Arc<SyntaxManager>) -> Self {
        Self {
            instance: syntax.instance(),
            syntax: Arc::downgrade(syntax),
        }
    }

    /// Is the engine behind this validator still alive?
    pub fn is_alive(&self) -> bool {
        self.syntax.strong_count() > 0
    }

    pub fn is_same_instance(&self, other: &ActionValidator) -> bool {
        self.instance == other.instance
    }

    /// Refuse a sequence validated by another engine instance
    pub fn ensure_same_instance(&self, sequence: &ConfigSequence) -> SequenceResult<()> {
        if sequence.validated_by() == self.instance {
            Ok(())
        } else {
            Err(SequenceError::new(ErrorKind::WrongInstance)
                .with_detail(format!(
                    "validated by engine {}, not {}",
                    sequence.validated_by().short(),
                    self.instance.short()
                ))
                .in_section(sequence.section_name())
                .in_sequence(sequence.name()))
        }
    }
}

impl StepValidator for ActionValidator {
    fn instance(&self) -> InstanceId {
        self.instance
    }

    fn validate_step(&self, step: &ConfigStep) -> SequenceResult<()> {
        match self.syntax.upgrade() {
            Some(syntax) => syntax.validate(step),
            None => Err(step.error(ErrorKind::Disabled, "engine is gone")),
        }
    }
}
