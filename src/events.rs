//! Activation records handed to the system log.
//!
//! The scheduler emits one [`ActivationEvent`] per settled tick through an
//! injected [`EventSink`]. The daemon uses [`TracingSink`]; tests record
//! events in memory.

use std::fmt;

use tracing::info;

use crate::verification::ActivationState;

/// Tag attached to every record.
pub const PROGRAM_NAME: &str = "activationd";

/// One settled-tick record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    pub state: ActivationState,
    pub documentation_url: String,
}

impl ActivationEvent {
    pub fn new(state: ActivationState, documentation_url: impl Into<String>) -> Self {
        Self {
            state,
            documentation_url: documentation_url.into(),
        }
    }
}

impl fmt::Display for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ActivationState::Activated => write!(
                f,
                "This system is activated. See {} for details.",
                self.documentation_url
            ),
            ActivationState::NotActivated => write!(
                f,
                "This system is not activated. See {} to activate it.",
                self.documentation_url
            ),
        }
    }
}

/// Write-only destination for activation records.
pub trait EventSink {
    fn record(&self, event: &ActivationEvent);
}

/// Emits records as `info` events under the [`PROGRAM_NAME`] target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ActivationEvent) {
        info!(
            target: PROGRAM_NAME,
            state = %event.state,
            documentation = %event.documentation_url,
            "{}",
            event
        );
    }
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn record(&self, event: &ActivationEvent) {
        (**self).record(event)
    }
}
