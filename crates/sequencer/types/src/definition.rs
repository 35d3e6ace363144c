//! Unvalidated definitions: the raw input to the config tree
//!
//! Definitions come either from an in-memory builder or from a key/value
//! source such as a YAML document:
//!
//! ```yaml
//! greet:
//!   1:
//!     action: info
//!     message: hi
//!     wait-after-action: 0
//!   2:
//!     action: info
//!     message: bye
//! ```
//!
//! Nothing here is checked beyond "can it be read"; validation happens when a
//! [`ConfigSection`](crate::ConfigSection) is built from a definition.

use crate::{SequenceError, SequenceResult};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;

// ── Step Definition ──────────────────────────────────────────────────

/// One step as read from the source, with its declared number
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub number: u32,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl StepDefinition {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            attributes: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ── Sequence Definition ──────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl SequenceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step numbered after the current last one
    pub fn step<K, V, I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let number = self.steps.iter().map(|s| s.number).max().unwrap_or(0) + 1;
        let mut step = StepDefinition::new(number);
        for (key, value) in attributes {
            step.attributes.insert(key.into(), value.into());
        }
        self.steps.push(step);
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }
}

// ── Section Definition ───────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDefinition {
    pub name: String,
    #[serde(default)]
    pub sequences: Vec<SequenceDefinition>,
}

impl SectionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequences: Vec::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: SequenceDefinition) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Read a section from YAML text
    pub fn from_yaml_str(name: impl Into<String>, text: &str) -> SequenceResult<Self> {
        let name = name.into();
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| SequenceError::from(e).in_section(name.clone()))?;
        Self::from_yaml_value(name, &value)
    }

    /// Read a section from an already parsed YAML tree
    ///
    /// The tree maps sequence names to steps. Steps are either a mapping
    /// keyed by step number or a plain list numbered from 1.
    pub fn from_yaml_value(name: impl Into<String>, value: &Value) -> SequenceResult<Self> {
        let name = name.into();
        let mut section = SectionDefinition::new(name.clone());

        let sequences = match value {
            Value::Null => return Ok(section),
            Value::Mapping(map) => map,
            _ => {
                return Err(SequenceError::config("expected a mapping of sequences")
                    .in_section(name))
            }
        };

        for (key, steps) in sequences {
            let sequence_name = scalar_key(key).ok_or_else(|| {
                SequenceError::config("sequence names must be scalars").in_section(name.clone())
            })?;
            let sequence = read_sequence(&sequence_name, steps)
                .map_err(|e| e.in_section(name.clone()))?;
            section.sequences.push(sequence);
        }

        Ok(section)
    }
}

fn read_sequence(name: &str, value: &Value) -> SequenceResult<SequenceDefinition> {
    let mut sequence = SequenceDefinition::new(name);

    match value {
        Value::Mapping(steps) => {
            for (key, attributes) in steps {
                let number = step_number(key).ok_or_else(|| {
                    SequenceError::config(format!("invalid step number {:?}", key))
                        .in_sequence(name)
                })?;
                sequence
                    .steps
                    .push(read_step(name, number, attributes)?);
            }
        }
        Value::Sequence(steps) => {
            for (index, attributes) in steps.iter().enumerate() {
                let number = u32::try_from(index + 1).map_err(|_| {
                    SequenceError::config("too many steps").in_sequence(name)
                })?;
                sequence
                    .steps
                    .push(read_step(name, number, attributes)?);
            }
        }
        Value::Null => {}
        _ => {
            return Err(SequenceError::config("expected a mapping or list of steps")
                .in_sequence(name))
        }
    }

    Ok(sequence)
}

fn read_step(sequence: &str, number: u32, value: &Value) -> SequenceResult<StepDefinition> {
    let map = match value {
        Value::Mapping(map) => map,
        _ => {
            return Err(SequenceError::config("expected a mapping of attributes")
                .in_sequence(sequence)
                .at_step(number))
        }
    };

    let mut step = StepDefinition::new(number);
    for (key, value) in map {
        let key = scalar_key(key).ok_or_else(|| {
            SequenceError::config("attribute names must be scalars")
                .in_sequence(sequence)
                .at_step(number)
        })?;
        let value = attribute_value(value).ok_or_else(|| {
            SequenceError::config(format!("unsupported value for attribute '{}'", key))
                .in_sequence(sequence)
                .at_step(number)
        })?;
        if step.attributes.insert(key.clone(), value).is_some() {
            return Err(
                SequenceError::config(format!("attribute '{}' given twice", key))
                    .in_sequence(sequence)
                    .at_step(number),
            );
        }
    }
    Ok(step)
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn step_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn attribute_value(value: &Value) -> Option<String> {
    match value {
        Value::Sequence(items) => {
            let parts: Option<Vec<String>> = items.iter().map(scalar_key).collect();
            parts.map(|p| p.join(","))
        }
        other => scalar_key(other),
    }
}
