//! Run notifications
//!
//! Every state change of a run is published as a [`SequenceEvent`] to the
//! engine's [`ObserverSet`]. The default observer writes structured
//! `tracing` events; [`BroadcastObserver`] feeds a tokio broadcast channel
//! for any number of subscribers.

use crate::running::RunId;
use sequencer_types::ErrorKind;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

// ── Events ───────────────────────────────────────────────────────────

/// Something that happened to a run
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SequenceEvent {
    Started {
        run_id: RunId,
        section: String,
        sequence: String,
        initiator: Option<String>,
    },
    StepReached {
        run_id: RunId,
        sequence: String,
        step: u32,
        action: String,
    },
    /// A check returned `false`; the step's action was skipped
    CheckFailed {
        run_id: RunId,
        sequence: String,
        step: u32,
        check: String,
    },
    /// `%name%` could not be resolved and was left verbatim
    PlaceholderWarn {
        run_id: RunId,
        sequence: String,
        step: u32,
        placeholder: String,
    },
    ExecutionError {
        run_id: RunId,
        sequence: String,
        step: Option<u32>,
        kind: ErrorKind,
        /// Full error cascade
        message: String,
    },
    Cancelled {
        run_id: RunId,
        sequence: String,
        step: u32,
    },
    Finished {
        run_id: RunId,
        sequence: String,
    },
}

impl SequenceEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Started { run_id, .. }
            | Self::StepReached { run_id, .. }
            | Self::CheckFailed { run_id, .. }
            | Self::PlaceholderWarn { run_id, .. }
            | Self::ExecutionError { run_id, .. }
            | Self::Cancelled { run_id, .. }
            | Self::Finished { run_id, .. } => run_id,
        }
    }

    pub fn sequence(&self) -> &str {
        match self {
            Self::Started { sequence, .. }
            | Self::StepReached { sequence, .. }
            | Self::CheckFailed { sequence, .. }
            | Self::PlaceholderWarn { sequence, .. }
            | Self::ExecutionError { sequence, .. }
            | Self::Cancelled { sequence, .. }
            | Self::Finished { sequence, .. } => sequence,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepReached { .. } => "step_reached",
            Self::CheckFailed { .. } => "check_failed",
            Self::PlaceholderWarn { .. } => "placeholder_warn",
            Self::ExecutionError { .. } => "execution_error",
            Self::Cancelled { .. } => "cancelled",
            Self::Finished { .. } => "finished",
        }
    }

    /// Does this event end the run?
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Finished { .. })
    }
}

// ── Observers ────────────────────────────────────────────────────────

/// Receives run notifications
///
/// Called synchronously from step callbacks; implementations must not block.
pub trait SequenceObserver: Send + Sync {
    fn notify(&self, event: &SequenceEvent);
}

/// Writes every event as a structured `tracing` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SequenceObserver for TracingObserver {
    fn notify(&self, event: &SequenceEvent) {
        match event {
            SequenceEvent::Started {
                run_id,
                section,
                sequence,
                initiator,
            } => tracing::info!(
                run_id = %run_id,
                section = %section,
                sequence = %sequence,
                initiator = initiator.as_deref().unwrap_or("-"),
                "Sequence started"
            ),
            SequenceEvent::StepReached {
                run_id,
                sequence,
                step,
                action,
            } => tracing::debug!(
                run_id = %run_id,
                sequence = %sequence,
                step = step,
                action = %action,
                "Step reached"
            ),
            SequenceEvent::CheckFailed {
                run_id,
                sequence,
                step,
                check,
            } => tracing::debug!(
                run_id = %run_id,
                sequence = %sequence,
                step = step,
                check = %check,
                "Check failed, action skipped"
            ),
            SequenceEvent::PlaceholderWarn {
                run_id,
                sequence,
                step,
                placeholder,
            } => tracing::warn!(
                run_id = %run_id,
                sequence = %sequence,
                step = step,
                placeholder = %placeholder,
                "Unresolved placeholder"
            ),
            SequenceEvent::ExecutionError {
                run_id,
                sequence,
                step,
                kind,
                message,
            } => tracing::error!(
                run_id = %run_id,
                sequence = %sequence,
                step = ?step,
                kind = ?kind,
                error = %message,
                "Step execution failed"
            ),
            SequenceEvent::Cancelled {
                run_id,
                sequence,
                step,
            } => tracing::info!(
                run_id = %run_id,
                sequence = %sequence,
                step = step,
                "Sequence cancelled"
            ),
            SequenceEvent::Finished { run_id, sequence } => tracing::info!(
                run_id = %run_id,
                sequence = %sequence,
                "Sequence finished"
            ),
        }
    }
}

/// Republishes events on a tokio broadcast channel
#[derive(Clone, Debug)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<SequenceEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SequenceObserver for BroadcastObserver {
    fn notify(&self, event: &SequenceEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

// ── Observer Set ─────────────────────────────────────────────────────

/// Fan-out to every registered observer
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn SequenceObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn SequenceObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Deliver `event` to every observer; a panicking observer is skipped
    pub fn notify(&self, event: &SequenceEvent) {
        for observer in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| observer.notify(event))).is_err() {
                tracing::error!(event = event.name(), run_id = %event.run_id(), "Observer panicked");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn SequenceObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .finish()
    }
}
