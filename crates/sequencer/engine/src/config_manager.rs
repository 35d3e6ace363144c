//! Sections registered with one engine, keyed by owner token
//!
//! Every section is validated through the engine's [`ActionValidator`]
//! before it becomes visible. Replacing a section builds the new one first
//! and swaps it in only on success; runs already in flight keep the
//! sequence objects they started with.

use crate::syntax::ActionValidator;
use sequencer_types::{
    ConfigSection, ConfigSequence, ErrorKind, SectionDefinition, SequenceError, SequenceResult,
    Token,
};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

type Entries = Vec<(Token, Arc<ConfigSection>)>;

/// All sections of one engine
#[derive(Debug)]
pub struct ConfigManager {
    validator: ActionValidator,
    sections: RwLock<Entries>,
}

impl ConfigManager {
    pub fn new(validator: ActionValidator) -> Self {
        Self {
            validator,
            sections: RwLock::new(Vec::new()),
        }
    }

    pub fn validator(&self) -> &ActionValidator {
        &self.validator
    }

    /// Register the first section of `owner`
    pub fn add_section(
        &self,
        owner: &Token,
        definition: &SectionDefinition,
    ) -> SequenceResult<Arc<ConfigSection>> {
        let section = Arc::new(ConfigSection::new(definition, *owner, &self.validator)?);

        let mut sections = self.write();
        if position(&sections, owner).is_some() {
            return Err(SequenceError::new(ErrorKind::Duplicate)
                .with_detail("owner already has a section")
                .in_section(section.name()));
        }
        ensure_unique_name(&sections, owner, section.name())?;
        sections.push((*owner, Arc::clone(&section)));

        tracing::info!(section = %section.name(), sequences = section.len(), "Section added");
        Ok(section)
    }

    /// Add or replace the section of `owner`; all sequences must be valid
    ///
    /// On failure the previous section stays in place.
    pub fn set_section(
        &self,
        owner: &Token,
        definition: &SectionDefinition,
    ) -> SequenceResult<Arc<ConfigSection>> {
        let section = ConfigSection::new(definition, *owner, &self.validator).map_err(|e| {
            tracing::warn!(section = %definition.name, error = %e.cascade(), "Section rejected");
            e
        })?;
        self.install(owner, section)
    }

    /// Add or replace the section of `owner`, leaving out invalid sequences
    ///
    /// The rejected sequences' errors are returned next to the section.
    pub fn set_section_lenient(
        &self,
        owner: &Token,
        definition: &SectionDefinition,
    ) -> SequenceResult<(Arc<ConfigSection>, Vec<SequenceError>)> {
        let (section, rejected) = ConfigSection::new_lenient(definition, *owner, &self.validator)?;
        let section = self.install(owner, section)?;
        Ok((section, rejected))
    }

    /// Parse a YAML section and install it strictly
    pub fn set_section_yaml(
        &self,
        owner: &Token,
        name: &str,
        yaml: &str,
    ) -> SequenceResult<Arc<ConfigSection>> {
        let definition = SectionDefinition::from_yaml_str(name, yaml)?;
        self.set_section(owner, &definition)
    }

    /// Load a YAML file as a section named after the file stem
    pub fn set_section_file(&self, owner: &Token, path: &Path) -> SequenceResult<Arc<ConfigSection>> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                SequenceError::config(format!("cannot derive a section name from {}", path.display()))
            })?;
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            SequenceError::config(format!("cannot read {}: {}", path.display(), e)).in_section(name)
        })?;
        self.set_section_yaml(owner, name, &yaml)
    }

    fn install(&self, owner: &Token, section: ConfigSection) -> SequenceResult<Arc<ConfigSection>> {
        let section = Arc::new(section);
        let mut sections = self.write();
        ensure_unique_name(&sections, owner, section.name())?;

        match position(&sections, owner) {
            Some(index) => {
                sections[index].1 = Arc::clone(&section);
                tracing::info!(section = %section.name(), sequences = section.len(), "Section replaced");
            }
            None => {
                sections.push((*owner, Arc::clone(&section)));
                tracing::info!(section = %section.name(), sequences = section.len(), "Section added");
            }
        }
        Ok(section)
    }

    pub fn remove_section(&self, owner: &Token) -> SequenceResult<Arc<ConfigSection>> {
        let mut sections = self.write();
        let index = position(&sections, owner)
            .ok_or_else(|| SequenceError::not_found("owner has no section"))?;
        let (_, section) = sections.remove(index);

        tracing::info!(section = %section.name(), "Section removed");
        Ok(section)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn section(&self, owner: &Token) -> Option<Arc<ConfigSection>> {
        let sections = self.read();
        position(&sections, owner).map(|index| Arc::clone(&sections[index].1))
    }

    /// All sections, in registration order
    pub fn sections(&self) -> Vec<Arc<ConfigSection>> {
        self.read()
            .iter()
            .map(|(_, section)| Arc::clone(section))
            .collect()
    }

    /// Every runnable sequence of every section
    pub fn sequences(&self) -> Vec<Arc<ConfigSequence>> {
        self.read()
            .iter()
            .flat_map(|(_, section)| section.sequences().iter().cloned())
            .collect()
    }

    /// Look a sequence up by name, for listings; starting it still needs its token
    pub fn find_sequence(&self, section: &str, sequence: &str) -> Option<Arc<ConfigSequence>> {
        self.read()
            .iter()
            .find(|(_, s)| s.name() == section)
            .and_then(|(_, s)| s.sequence(sequence).cloned())
    }

    /// Resolve a security token to its sequence
    ///
    /// Every section is scanned; the result only says found or not found.
    pub fn find_by_token(&self, security: &Token) -> Option<Arc<ConfigSequence>> {
        let mut found = None;
        for (_, section) in self.read().iter() {
            let hit = section.find_by_token(security);
            if found.is_none() {
                found = hit;
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.sections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.sections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn position(sections: &Entries, owner: &Token) -> Option<usize> {
    sections.iter().position(|(existing, _)| existing.matches(owner))
}

/// Section names are unique across owners
fn ensure_unique_name(sections: &Entries, owner: &Token, name: &str) -> SequenceResult<()> {
    let taken = sections
        .iter()
        .any(|(existing, section)| !existing.matches(owner) && section.name() == name);
    if taken {
        Err(SequenceError::new(ErrorKind::Duplicate)
            .with_detail("section name is used by another owner")
            .in_section(name))
    } else {
        Ok(())
    }
}
