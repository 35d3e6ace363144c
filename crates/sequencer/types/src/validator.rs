//! The validation seam between the config tree and an engine
//!
//! The config tree never references the engine. Instead the engine injects a
//! [`StepValidator`] downward when a section is built; the tree keeps only the
//! validator's [`InstanceId`].

use crate::{ConfigStep, InstanceId, SequenceResult};

/// Validates steps against an engine's registries
pub trait StepValidator: Send + Sync {
    /// Identity of the engine instance behind this validator
    fn instance(&self) -> InstanceId;

    /// Check one step beyond the structural rules the step enforces itself
    fn validate_step(&self, step: &ConfigStep) -> SequenceResult<()>;

    fn is_same_instance(&self, other: &dyn StepValidator) -> bool {
        self.instance() == other.instance()
    }
}

/// Accepts every structurally valid step
///
/// Useful for tooling that inspects sequence files without an engine.
#[derive(Clone, Copy, Debug)]
pub struct StructuralValidator {
    instance: InstanceId,
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self {
            instance: InstanceId::generate(),
        }
    }
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StepValidator for StructuralValidator {
    fn instance(&self) -> InstanceId {
        self.instance
    }

    fn validate_step(&self, _step: &ConfigStep) -> SequenceResult<()> {
        Ok(())
    }
}
