//! Config sections: named groups of sequences owned by one token

use crate::{
    ConfigSequence, ErrorKind, SectionDefinition, SequenceError, SequenceResult, StepValidator,
    Token,
};
use std::collections::HashSet;
use std::sync::Arc;

/// A named collection of sequences with a single owner
#[derive(Debug)]
pub struct ConfigSection {
    name: String,
    owner: Token,
    sequences: Vec<Arc<ConfigSequence>>,
}

impl ConfigSection {
    /// Build a section, failing if any sequence is invalid
    pub fn new(
        definition: &SectionDefinition,
        owner: Token,
        validator: &dyn StepValidator,
    ) -> SequenceResult<Self> {
        let name = section_name(definition)?;
        let mut names = HashSet::new();
        let mut sequences = Vec::with_capacity(definition.sequences.len());

        for sequence in &definition.sequences {
            if !names.insert(sequence.name.trim().to_string()) {
                return Err(duplicate(&name, &sequence.name));
            }
            let built = ConfigSequence::new(name.clone(), sequence, owner, validator)?;
            sequences.push(Arc::new(built));
        }

        Ok(Self {
            name,
            owner,
            sequences,
        })
    }

    /// Build a section from the valid sequences only
    ///
    /// Invalid sequences are left out (and therefore never listed or
    /// runnable); their errors are returned next to the section.
    pub fn new_lenient(
        definition: &SectionDefinition,
        owner: Token,
        validator: &dyn StepValidator,
    ) -> SequenceResult<(Self, Vec<SequenceError>)> {
        let name = section_name(definition)?;
        let mut names = HashSet::new();
        let mut sequences = Vec::new();
        let mut rejected = Vec::new();

        for sequence in &definition.sequences {
            if !names.insert(sequence.name.trim().to_string()) {
                rejected.push(duplicate(&name, &sequence.name));
                continue;
            }
            match ConfigSequence::new(name.clone(), sequence, owner, validator) {
                Ok(built) => sequences.push(Arc::new(built)),
                Err(err) => {
                    tracing::warn!(
                        section = %name,
                        sequence = %sequence.name,
                        error = %err.cascade(),
                        "Sequence rejected"
                    );
                    rejected.push(err);
                }
            }
        }

        Ok((
            Self {
                name,
                owner,
                sequences,
            },
            rejected,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owned_by(&self, owner: &Token) -> bool {
        self.owner.matches(owner)
    }

    pub fn sequences(&self) -> &[Arc<ConfigSequence>] {
        &self.sequences
    }

    pub fn sequence(&self, name: &str) -> Option<&Arc<ConfigSequence>> {
        self.sequences.iter().find(|s| s.name() == name)
    }

    pub fn sequence_names(&self) -> Vec<&str> {
        self.sequences.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Security token of one of this section's sequences (owner only)
    pub fn security_token(&self, owner: &Token, sequence: &str) -> SequenceResult<Token> {
        self.owned_sequence(owner, sequence)?.security_token(owner)
    }

    pub fn recreate_security_token(&self, owner: &Token, sequence: &str) -> SequenceResult<Token> {
        self.owned_sequence(owner, sequence)?
            .recreate_security_token(owner)
    }

    /// Resolve a security token to its sequence
    ///
    /// Every sequence is compared; the scan does not stop at the first hit.
    pub fn find_by_token(&self, token: &Token) -> Option<Arc<ConfigSequence>> {
        let mut found = None;
        for sequence in &self.sequences {
            if sequence.authorizes(token) && found.is_none() {
                found = Some(Arc::clone(sequence));
            }
        }
        found
    }

    fn owned_sequence(&self, owner: &Token, sequence: &str) -> SequenceResult<&Arc<ConfigSequence>> {
        if !self.is_owned_by(owner) {
            return Err(SequenceError::not_authorized().in_section(self.name.clone()));
        }
        self.sequence(sequence).ok_or_else(|| {
            SequenceError::not_found(format!("no sequence named '{}'", sequence))
                .in_section(self.name.clone())
        })
    }
}

fn section_name(definition: &SectionDefinition) -> SequenceResult<String> {
    let name = definition.name.trim();
    if name.is_empty() {
        return Err(SequenceError::config("section name is empty"));
    }
    Ok(name.to_string())
}

fn duplicate(section: &str, sequence: &str) -> SequenceError {
    SequenceError::new(ErrorKind::Config)
        .with_detail("sequence defined twice")
        .in_section(section)
        .in_sequence(sequence)
}
