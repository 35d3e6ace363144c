//! Config sequences: ordered, validated steps plus a security token
//!
//! A sequence is only observable once every step has passed validation.
//! Its security token is the capability needed to start it; the owner of
//! the sequence is the only one who can read or regenerate that token.

use crate::{
    ConfigStep, ErrorKind, InstanceId, SequenceDefinition, SequenceError, SequenceResult,
    StepValidator, Token,
};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// A named, linear list of steps
#[derive(Debug)]
pub struct ConfigSequence {
    name: String,
    section_name: String,
    steps: Vec<ConfigStep>,
    owner: Token,
    security: RwLock<Token>,
    validated_by: InstanceId,
}

impl ConfigSequence {
    /// Validate a definition and build the sequence
    pub fn new(
        section_name: impl Into<String>,
        definition: &SequenceDefinition,
        owner: Token,
        validator: &dyn StepValidator,
    ) -> SequenceResult<Self> {
        let section_name = section_name.into();
        let name = definition.name.trim().to_string();
        let fail = |detail: String| {
            SequenceError::new(ErrorKind::Config)
                .with_detail(detail)
                .in_section(section_name.clone())
                .in_sequence(name.clone())
        };

        if name.is_empty() {
            return Err(fail("sequence name is empty".into()));
        }
        if definition.steps.is_empty() {
            return Err(fail("sequence has no steps".into()));
        }

        let mut ordered: Vec<_> = definition.steps.iter().collect();
        ordered.sort_by_key(|s| s.number);

        let mut seen = HashSet::new();
        for step in &ordered {
            if !seen.insert(step.number) {
                return Err(fail(format!("step {} defined twice", step.number)));
            }
        }
        for (index, step) in ordered.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.number != expected {
                return Err(fail(format!(
                    "steps must be numbered 1..{} without gaps, found {} where {} was expected",
                    ordered.len(),
                    step.number,
                    expected
                )));
            }
        }

        let mut steps = Vec::with_capacity(ordered.len());
        for step in ordered {
            let built = ConfigStep::new(name.clone(), step.number, step.attributes.clone(), validator)
                .map_err(|e| {
                    e.wrap(ErrorKind::Config)
                        .in_section(section_name.clone())
                        .in_sequence(name.clone())
                })?;
            steps.push(built);
        }

        Ok(Self {
            name,
            section_name,
            steps,
            owner,
            security: RwLock::new(Token::new()),
            validated_by: validator.instance(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section_name(&self) -> &str {
        &self.section_name
    }

    pub fn steps(&self) -> &[ConfigStep] {
        &self.steps
    }

    /// Step by 1-based number
    pub fn step(&self, step_nr: u32) -> Option<&ConfigStep> {
        let index = usize::try_from(step_nr).ok()?.checked_sub(1)?;
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The engine instance whose validator accepted this sequence
    pub fn validated_by(&self) -> InstanceId {
        self.validated_by
    }

    pub fn is_owned_by(&self, owner: &Token) -> bool {
        self.owner.matches(owner)
    }

    /// Read the security token (owner only)
    pub fn security_token(&self, owner: &Token) -> SequenceResult<Token> {
        self.require_owner(owner)?;
        Ok(*self.security.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the security token, invalidating every copy of the old one
    pub fn recreate_security_token(&self, owner: &Token) -> SequenceResult<Token> {
        self.require_owner(owner)?;
        let fresh = Token::new();
        *self.security.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::debug!(sequence = %self.name, "Security token recreated");
        Ok(fresh)
    }

    /// Does `token` authorize starting this sequence?
    pub fn authorizes(&self, token: &Token) -> bool {
        self.security
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matches(token)
    }

    /// Re-run the syntax pass over every step
    pub fn validate_syntax(&self, validator: &dyn StepValidator) -> SequenceResult<()> {
        if self.steps.is_empty() {
            return Err(SequenceError::config("sequence has no steps").in_sequence(self.name.clone()));
        }
        for step in &self.steps {
            step.validate_syntax(validator)?;
        }
        Ok(())
    }

    fn require_owner(&self, owner: &Token) -> SequenceResult<()> {
        if self.is_owned_by(owner) {
            Ok(())
        } else {
            Err(SequenceError::not_authorized()
                .in_section(self.section_name.clone())
                .in_sequence(self.name.clone()))
        }
    }
}
