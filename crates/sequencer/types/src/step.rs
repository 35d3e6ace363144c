//! Config steps: one validated unit of a sequence
//!
//! A step is an attribute bag. The bag stays dynamic because it is the
//! end-user configuration surface, but every read goes through the typed
//! accessors below and every step passes one syntax pass at construction.

use crate::{ErrorKind, SequenceError, SequenceResult, StepValidator};
use serde::Serialize;
use std::collections::HashMap;

/// Attribute naming the step's action
pub const ACTION_ATTRIBUTE: &str = "action";

/// Attribute holding the delay after the step, in seconds
pub const WAIT_ATTRIBUTE: &str = "wait-after-action";

/// An immutable, validated step
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigStep {
    sequence_name: String,
    step_nr: u32,
    attributes: HashMap<String, String>,
}

impl ConfigStep {
    /// Build a step and run the full syntax pass on it
    pub fn new(
        sequence_name: impl Into<String>,
        step_nr: u32,
        attributes: HashMap<String, String>,
        validator: &dyn StepValidator,
    ) -> SequenceResult<Self> {
        let step = Self {
            sequence_name: sequence_name.into(),
            step_nr,
            attributes,
        };
        step.validate_syntax(validator)?;
        Ok(step)
    }

    /// Structural rules plus whatever the validator's engine requires
    pub fn validate_syntax(&self, validator: &dyn StepValidator) -> SequenceResult<()> {
        self.validate_structure()?;
        validator
            .validate_step(self)
            .map_err(|e| self.contextualize(e))
    }

    fn validate_structure(&self) -> SequenceResult<()> {
        if self.step_nr == 0 {
            return Err(self.error(ErrorKind::Syntax, "step numbers start at 1"));
        }
        match self.attributes.get(ACTION_ATTRIBUTE) {
            Some(action) if !action.trim().is_empty() => {}
            Some(_) => {
                return Err(self.error(ErrorKind::Syntax, "attribute 'action' is empty"))
            }
            None => {
                return Err(self.error(ErrorKind::Syntax, "missing attribute 'action'"))
            }
        }
        if let Some(wait) = self.attributes.get(WAIT_ATTRIBUTE) {
            if wait.trim().parse::<u64>().is_err() {
                return Err(self.error(
                    ErrorKind::Syntax,
                    format!(
                        "attribute '{}' must be a non-negative integer, got '{}'",
                        WAIT_ATTRIBUTE, wait
                    ),
                ));
            }
        }
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub fn step_nr(&self) -> u32 {
        self.step_nr
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// The action name (trimmed)
    pub fn action(&self) -> &str {
        self.attributes
            .get(ACTION_ATTRIBUTE)
            .map(|a| a.trim())
            .unwrap_or_default()
    }

    /// Seconds to wait after this step, 0 when absent
    pub fn wait(&self) -> u64 {
        self.attributes
            .get(WAIT_ATTRIBUTE)
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str) -> SequenceResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                self.error(
                    ErrorKind::Syntax,
                    format!("attribute '{}' must be an integer, got '{}'", key, raw),
                )
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> SequenceResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(Some(true)),
                "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(self.error(
                    ErrorKind::Syntax,
                    format!("attribute '{}' must be a boolean, got '{}'", key, raw),
                )),
            },
        }
    }

    /// Comma-separated list, empty entries dropped
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// An error located at this step
    pub fn error(&self, kind: ErrorKind, detail: impl Into<String>) -> SequenceError {
        SequenceError::new(kind)
            .with_detail(detail)
            .in_sequence(self.sequence_name.clone())
            .at_step(self.step_nr)
    }

    fn contextualize(&self, mut err: SequenceError) -> SequenceError {
        if err.context.sequence.is_none() {
            err.context.sequence = Some(self.sequence_name.clone());
        }
        if err.context.step.is_none() {
            err.context.step = Some(self.step_nr);
        }
        err
    }
}
