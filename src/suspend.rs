//! Suspend retry engine.
//!
//! Platform suspend failures are usually transient (firmware busy, a
//! driver racing resume).  The retrier re-attempts the low-power entry
//! with exponential backoff, bounded twice over: a per-retry interval cap
//! and a total wait budget.  Exhausting the budget escalates to a full
//! shutdown so the platform always reaches a safe terminal action instead
//! of looping.
//!
//! The retry loop runs on the dispatcher's stack — by the time the
//! `Suspending` phase is entered no other queued work may proceed — but it
//! re-checks the request queue between attempts: a newer pending phase
//! request invalidates the attempt and the loop aborts without escalating.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::app::events::PowerEvent;
use crate::app::ports::{EventSink, HardwarePort};
use crate::config::PowerConfig;
use crate::machine::ShutdownKind;
use crate::request::RequestQueue;

/// Attempts to place the platform into a low-power mode.
pub struct SuspendRetrier {
    hardware: Arc<dyn HardwarePort>,
    queue: Arc<RequestQueue>,
    sink: Arc<dyn EventSink>,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_total_wait: Duration,
}

impl SuspendRetrier {
    pub fn new(
        hardware: Arc<dyn HardwarePort>,
        queue: Arc<RequestQueue>,
        sink: Arc<dyn EventSink>,
        config: &PowerConfig,
    ) -> Self {
        Self {
            hardware,
            queue,
            sink,
            initial_backoff: Duration::from_millis(config.suspend_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.suspend_max_backoff_ms),
            max_total_wait: Duration::from_millis(config.suspend_max_total_wait_ms),
        }
    }

    /// Enter the requested low-power mode, retrying on failure.
    ///
    /// Returns `true` once the platform suspended and resumed.  Returns
    /// `false` when a newer pending request preempted the attempt, or when
    /// the wait budget ran out — in which case `shutdown_now()` has been
    /// invoked exactly once.
    pub fn attempt_suspend(&self, kind: ShutdownKind) -> bool {
        let mut backoff = self.initial_backoff;
        let mut waited = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let entered = match kind {
                ShutdownKind::DeepSleep => self.hardware.enter_deep_sleep(),
                ShutdownKind::Hibernate => self.hardware.enter_hibernation(),
                _ => {
                    warn!("suspend requested with non-suspend kind {kind:?}");
                    return false;
                }
            };
            if entered {
                info!("platform suspend succeeded on attempt {attempt}");
                return true;
            }

            self.sink.emit(&PowerEvent::SuspendAttemptFailed { attempt });

            // A request queued since the Suspending transition (which
            // cleared the queue) is newer work; do not fight it.
            if !self.queue.is_empty() {
                warn!("suspend attempt {attempt} preempted by a newer phase request");
                return false;
            }

            if waited >= self.max_total_wait {
                error!(
                    "suspend failed after {attempt} attempts and {waited:?} — \
                     escalating to full shutdown"
                );
                self.sink.emit(&PowerEvent::SuspendEscalated);
                self.hardware.shutdown_now();
                return false;
            }

            let nap = backoff.min(self.max_backoff).min(self.max_total_wait - waited);
            warn!("suspend attempt {attempt} failed, retrying in {nap:?}");
            thread::sleep(nap);
            waited += nap;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
