//! `%name%` substitution in attribute values
//!
//! Lookup order for a name: the run's ad-hoc placeholders, the built-ins
//! (`initiator`, `section`, `sequence`, `step`, `run`), then the registered
//! [`Placeholder`](crate::Placeholder) handlers. Anything still unresolved is
//! left verbatim. `%%` renders a single `%`.

use crate::extension::Placeholder;
use crate::registry::HandlerRegistry;
use crate::running::RunningSequence;
use regex::{Captures, Regex};
use sequencer_types::{ConfigStep, ErrorKind, PrincipalRef, RunOptions, SequenceError, SequenceResult};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%%|%([A-Za-z0-9_.\-]+)%").expect("placeholder regex is valid")
});

/// What a placeholder handler may look at
pub struct PlaceholderScope<'a> {
    run: &'a RunningSequence,
    step: &'a ConfigStep,
}

impl<'a> PlaceholderScope<'a> {
    pub(crate) fn new(run: &'a RunningSequence, step: &'a ConfigStep) -> Self {
        Self { run, step }
    }

    pub fn run(&self) -> &RunningSequence {
        self.run
    }

    pub fn step(&self) -> &ConfigStep {
        self.step
    }

    pub fn options(&self) -> &RunOptions {
        self.run.options()
    }

    pub fn initiator(&self) -> Option<&PrincipalRef> {
        self.run.options().initiator.as_ref()
    }

    fn builtin(&self, name: &str) -> Option<String> {
        match name {
            "initiator" => self.run.options().initiator_name().map(String::from),
            "section" => Some(self.run.sequence().section_name().to_string()),
            "sequence" => Some(self.run.sequence().name().to_string()),
            "step" => Some(self.step.step_nr().to_string()),
            "run" => Some(self.run.id().to_string()),
            _ => None,
        }
    }
}

/// Outcome of resolving one step's attributes
#[derive(Debug, Default)]
pub struct Resolved {
    pub attributes: HashMap<String, String>,
    /// Names left verbatim, each reported once
    pub unresolved: Vec<String>,
    /// Handler failures; the placeholder stays verbatim
    pub errors: Vec<SequenceError>,
}

/// Substitute every `%name%` in `text` using `lookup`
///
/// Returns the expanded text, the names `lookup` did not resolve and the
/// errors it returned.
pub fn expand<F>(text: &str, mut lookup: F) -> (String, Vec<String>, Vec<SequenceError>)
where
    F: FnMut(&str) -> SequenceResult<Option<String>>,
{
    let mut unresolved = Vec::new();
    let mut errors = Vec::new();

    let expanded = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "%".to_string();
        };
        match lookup(name) {
            Ok(Some(value)) => value,
            Ok(None) => {
                if !unresolved.iter().any(|n| n == name) {
                    unresolved.push(name.to_string());
                }
                caps[0].to_string()
            }
            Err(err) => {
                errors.push(err);
                caps[0].to_string()
            }
        }
    });

    (expanded.into_owned(), unresolved, errors)
}

/// Resolve all attribute values of `step` for `run`
pub(crate) fn resolve_attributes(
    run: &RunningSequence,
    step: &ConfigStep,
    registry: &HandlerRegistry<dyn Placeholder>,
) -> Resolved {
    let scope = PlaceholderScope::new(run, step);
    let mut resolved = Resolved::default();

    let mut lookup = |name: &str| -> SequenceResult<Option<String>> {
        if let Some(value) = run.options().placeholders.get(name) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = scope.builtin(name) {
            return Ok(Some(value));
        }
        match registry.get(name) {
            Ok(handler) => handler.resolve(&scope).map_err(|e| {
                e.wrap(ErrorKind::Placeholder)
                    .with_detail(format!("placeholder '{}'", name))
                    .in_sequence(step.sequence_name())
                    .at_step(step.step_nr())
            }),
            Err(_) => Ok(None),
        }
    };

    let mut keys: Vec<&String> = step.attributes().keys().collect();
    keys.sort();
    for key in keys {
        let raw = &step.attributes()[key];
        let (value, unresolved, errors) = expand(raw, &mut lookup);
        for name in unresolved {
            if !resolved.unresolved.contains(&name) {
                resolved.unresolved.push(name);
            }
        }
        resolved.errors.extend(errors);
        resolved.attributes.insert(key.clone(), value);
    }
    resolved
}
