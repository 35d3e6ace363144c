//! Sequencer Engine
//!
//! Runs the sequences described by `sequencer-types` on a host scheduler.
//!
//! # Architecture
//!
//! ```text
//! Sequencer
//!   ├── Extensions      name → handler registries (action, check, include,
//!   │                   condition, placeholder, chain)
//!   ├── SyntaxManager   step rules; reached by the config tree only through
//!   │                   a weak ActionValidator
//!   ├── ConfigManager   sections keyed by owner token
//!   ├── RunManager      live runs, admission, cancellation queries
//!   │     └── RunningSequence  one run: one step per scheduled callback
//!   └── ObserverSet     SequenceEvent fan-out (tracing, broadcast, custom)
//! ```
//!
//! Nothing blocks. Waiting between steps is rescheduling on the injected
//! [`Scheduler`]; tests drive a [`ManualScheduler`] tick by tick.

#![deny(unsafe_code)]

pub mod config;
pub mod config_manager;
pub mod extension;
pub mod logging;
pub mod observer;
pub mod placeholder;
pub mod registry;
pub mod run_manager;
pub mod running;
pub mod scheduler;
pub mod sequencer;
pub mod syntax;

pub use config::{ConfigLoadError, EngineConfig, LoggingConfig};
pub use config_manager::ConfigManager;
pub use extension::{Action, Chain, Check, Condition, Include, Lifecycle, Placeholder};
pub use logging::init_tracing;
pub use observer::{
    BroadcastObserver, ObserverSet, SequenceEvent, SequenceObserver, TracingObserver,
};
pub use placeholder::PlaceholderScope;
pub use registry::{Extensions, ExtensionKind, HandlerRegistry, LifecycleEvent};
pub use run_manager::RunManager;
pub use running::{RunId, RunInfo, RunStatus, RunningSequence, StepContext};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TaskHandle, TokioScheduler};
pub use sequencer::Sequencer;
pub use syntax::{
    ActionValidator, SyntaxManager, CHECK_ATTRIBUTE, COMMON_ATTRIBUTES, CONDITION_ATTRIBUTE,
    INCLUDE_ATTRIBUTE,
};

pub use sequencer_types as types;
