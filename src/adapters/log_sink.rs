//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured orchestration events to
//! the process logger.  A diagnostics-socket adapter would implement the
//! same trait.

use log::{info, warn};

use crate::app::events::PowerEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`PowerEvent`].
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &PowerEvent) {
        match event {
            PowerEvent::PhaseChanged { from, to } => {
                info!("PHASE | {:?} -> {:?}", from, to);
            }
            PowerEvent::RequestDropped { current, requested } => {
                warn!("PHASE | dropped request {:?} while in {:?}", requested, current);
            }
            PowerEvent::CompletionTimedOut { phase } => {
                warn!("ROUND | {:?} timed out, proceeding", phase);
            }
            PowerEvent::PolicyApplied { id } => {
                info!("POLICY | applied '{}'", id);
            }
            PowerEvent::SuspendAttemptFailed { attempt } => {
                warn!("SUSPEND | attempt {} failed", attempt);
            }
            PowerEvent::SuspendEscalated => {
                warn!("SUSPEND | wait budget exhausted, escalating to shutdown");
            }
            PowerEvent::WakeTimerCleared { wake_after_secs } => {
                info!("WAKE | stale {}s wake timer cleared", wake_after_secs);
            }
        }
    }
}
