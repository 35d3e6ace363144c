//! Error types for the Sequencer
//!
//! Every failure is a [`SequenceError`]: a kind, the place it happened
//! (section / sequence / step), an optional detail and an optional cause.
//! Wrapping builds a cascade that renders as `outer >>> inner >>> innermost`.

use serde::{Deserialize, Serialize};

// ── Error Kind ───────────────────────────────────────────────────────

/// What went wrong
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed section, sequence or step
    Config,
    /// Missing, unknown or unparsable attribute
    Syntax,
    NotFound,
    NotAuthorized,
    TooMany,
    SingletonRunning,
    NotRunning,
    ActionAuthFailed,
    /// The engine is shutting down or gone
    Disabled,
    /// A step's own execution failure
    Action,
    /// Panic caught at the step callback boundary
    Unexpected,
    Check,
    Include,
    Condition,
    Placeholder,
    Duplicate,
    InvalidName,
    /// A config object was handed to an engine instance that did not validate it
    WrongInstance,
}

/// Coarse grouping of [`ErrorKind`]s
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Config,
    Syntax,
    Run,
    Action,
    Check,
    Include,
    Registry,
    WrongInstance,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config => ErrorCategory::Config,
            Self::Syntax => ErrorCategory::Syntax,
            Self::NotFound
            | Self::NotAuthorized
            | Self::TooMany
            | Self::SingletonRunning
            | Self::NotRunning
            | Self::ActionAuthFailed
            | Self::Disabled => ErrorCategory::Run,
            Self::Action | Self::Unexpected => ErrorCategory::Action,
            Self::Check => ErrorCategory::Check,
            Self::Include | Self::Condition | Self::Placeholder => ErrorCategory::Include,
            Self::Duplicate | Self::InvalidName => ErrorCategory::Registry,
            Self::WrongInstance => ErrorCategory::WrongInstance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "configuration error",
            Self::Syntax => "syntax error",
            Self::NotFound => "not found",
            Self::NotAuthorized => "not authorized",
            Self::TooMany => "too many running sequences",
            Self::SingletonRunning => "singleton sequence already running",
            Self::NotRunning => "sequence not running",
            Self::ActionAuthFailed => "action refused authorization",
            Self::Disabled => "engine disabled",
            Self::Action => "action failed",
            Self::Unexpected => "unexpected failure",
            Self::Check => "check failed",
            Self::Include => "include failed",
            Self::Condition => "condition failed",
            Self::Placeholder => "placeholder failed",
            Self::Duplicate => "duplicate name",
            Self::InvalidName => "invalid name",
            Self::WrongInstance => "wrong engine instance",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Error Context ────────────────────────────────────────────────────

/// Where an error happened
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        self.section.is_none() && self.sequence.is_none() && self.step.is_none()
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(section) = &self.section {
            parts.push(format!("section '{}'", section));
        }
        if let Some(sequence) = &self.sequence {
            parts.push(format!("sequence '{}'", sequence));
        }
        if let Some(step) = self.step {
            parts.push(format!("step {}", step));
        }
        f.write_str(&parts.join(", "))
    }
}

// ── Sequence Error ───────────────────────────────────────────────────

/// The single error type of the Sequencer
#[derive(Clone, Debug, thiserror::Error)]
#[error("{}", headline(.context, .kind, .detail))]
pub struct SequenceError {
    pub kind: ErrorKind,
    pub context: ErrorContext,
    pub detail: Option<String>,
    #[source]
    pub cause: Option<Box<SequenceError>>,
}

fn headline(context: &ErrorContext, kind: &ErrorKind, detail: &Option<String>) -> String {
    let mut out = String::new();
    if !context.is_empty() {
        out.push_str(&context.to_string());
        out.push_str(": ");
    }
    out.push_str(kind.as_str());
    if let Some(detail) = detail {
        out.push_str(": ");
        out.push_str(detail);
    }
    out
}

impl SequenceError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: ErrorContext::default(),
            detail: None,
            cause: None,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_detail(detail)
    }

    pub fn syntax(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax).with_detail(detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound).with_detail(detail)
    }

    pub fn not_authorized() -> Self {
        Self::new(ErrorKind::NotAuthorized)
    }

    pub fn action(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Action).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn in_section(mut self, section: impl Into<String>) -> Self {
        self.context.section = Some(section.into());
        self
    }

    pub fn in_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.context.sequence = Some(sequence.into());
        self
    }

    pub fn at_step(mut self, step: u32) -> Self {
        self.context.step = Some(step);
        self
    }

    pub fn caused_by(mut self, cause: SequenceError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap `self` as the cause of a new outer error
    pub fn wrap(self, kind: ErrorKind) -> Self {
        SequenceError::new(kind).caused_by(self)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The innermost error of the cascade
    pub fn root_cause(&self) -> &SequenceError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Render the whole chain as `outer >>> inner >>> innermost`
    pub fn cascade(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut current = self.cause.as_deref();
        while let Some(cause) = current {
            parts.push(cause.to_string());
            current = cause.cause.as_deref();
        }
        parts.join(" >>> ")
    }
}

impl From<serde_yaml::Error> for SequenceError {
    fn from(err: serde_yaml::Error) -> Self {
        SequenceError::config(err.to_string())
    }
}

/// Result type alias for sequencer operations
pub type SequenceResult<T> = Result<T, SequenceError>;
