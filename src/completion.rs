//! Bounded-time listener completion synchronisation.
//!
//! A broadcast *round* opens with the set of completion-required listener
//! ids that must acknowledge before the round finishes.  A dedicated
//! worker thread then waits until one of:
//!
//! * every token is cleared (acknowledged, or discarded for a dead
//!   listener) — the completion callback fires with `timed_out = false`;
//! * the caller cancels (a newer, overriding phase request arrived) — the
//!   worker exits without invoking the completion callback;
//! * the deadline elapses — the timeout is non-fatal: it is logged and the
//!   completion callback fires with `timed_out = true`.
//!
//! While waiting, an optional interval callback fires periodically (used
//! to emit postpone signals to the platform while listeners are still
//! working).  Completion fires **exactly once** per round, enforced with
//! an atomic guard, even when an acknowledgement races the deadline.
//!
//! If the token set is already empty when the round starts, the completion
//! callback runs synchronously on the caller's stack and no worker is
//! spawned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::listeners::ListenerId;
use crate::machine::ListenerPhase;

const POISON: &str = "ack tracker mutex poisoned";

// ───────────────────────────────────────────────────────────────
// AckTracker — the pending-acknowledgement set
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct RoundState {
    /// Monotonically increasing round number; stale waiters compare it.
    round: u64,
    /// Listener phase the open round was broadcast with.
    phase: Option<ListenerPhase>,
    /// Tokens still outstanding.
    pending: Vec<ListenerId>,
    /// Set when a newer phase request overrides the round mid-wait.
    cancelled: bool,
}

/// Shared pending-acknowledgement set.  Populated by the dispatcher at
/// round start, drained by concurrent acknowledgers, cleared wholesale on
/// cancellation.
pub struct AckTracker {
    state: Mutex<RoundState>,
    cond: Condvar,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RoundState::default()),
            cond: Condvar::new(),
        }
    }

    /// Open a new round, superseding whatever round was open before.
    /// Returns the round number the waiter watches.
    pub(crate) fn open(&self, phase: ListenerPhase, pending: Vec<ListenerId>) -> u64 {
        let mut state = self.state.lock().expect(POISON);
        state.round += 1;
        state.phase = Some(phase);
        state.pending = pending;
        state.cancelled = false;
        state.round
    }

    /// Clear one listener's token.  Ignored when `phase` does not match
    /// the currently open round (stale acknowledgement) or the token is
    /// already gone (acknowledgements are idempotent per listener).
    /// Returns whether the token was actually cleared.
    pub fn acknowledge(&self, phase: ListenerPhase, id: ListenerId) -> bool {
        let mut state = self.state.lock().expect(POISON);
        if state.cancelled || state.phase != Some(phase) {
            debug!("stale acknowledgement from {id} for {phase:?} — ignored");
            return false;
        }
        let before = state.pending.len();
        state.pending.retain(|p| *p != id);
        if state.pending.len() == before {
            return false;
        }
        if state.pending.is_empty() {
            self.cond.notify_all();
        }
        true
    }

    /// Drop a token unconditionally (dead listener).  A dead listener
    /// cannot block progress; if it was the last outstanding token the
    /// waiter is woken to complete the round.
    pub fn discard(&self, id: ListenerId) {
        let mut state = self.state.lock().expect(POISON);
        let before = state.pending.len();
        state.pending.retain(|p| *p != id);
        if state.pending.len() != before && state.pending.is_empty() {
            self.cond.notify_all();
        }
    }

    /// Cancel the given round, if it is still the open one.
    pub(crate) fn cancel(&self, round: u64) {
        let mut state = self.state.lock().expect(POISON);
        if state.round == round {
            state.cancelled = true;
            self.cond.notify_all();
        }
    }

    /// Tokens still outstanding in the open round.
    pub fn outstanding(&self) -> usize {
        self.state.lock().expect(POISON).pending.len()
    }

    /// Listener phase of the currently open round.
    pub fn open_phase(&self) -> Option<ListenerPhase> {
        self.state.lock().expect(POISON).phase
    }
}

// ───────────────────────────────────────────────────────────────
// CompletionWaiter — the dedicated wait worker
// ───────────────────────────────────────────────────────────────

type IntervalFn = Box<dyn FnMut() + Send>;
type CompleteFn = Box<dyn FnOnce(bool) + Send>;

/// Handle to one in-flight completion wait.  Dropping (or `cancel`ing) the
/// handle cancels the round and joins the worker, so at most one wait is
/// ever live per dispatcher.
pub struct CompletionWaiter {
    tracker: Arc<AckTracker>,
    round: u64,
    handle: Option<JoinHandle<()>>,
}

impl CompletionWaiter {
    /// Start watching a round previously opened on `tracker`.  The round
    /// is opened *before* listeners are notified so that a listener which
    /// acknowledges synchronously from its callback is counted, not
    /// dropped as stale.
    ///
    /// * Nothing outstanding at watch time (no completion listeners, or
    ///   every token already cleared) ⇒ `on_complete(false)` runs
    ///   synchronously and no worker is spawned (`None` is returned).
    /// * `interval` ⇒ `(period, callback)` invoked while still waiting and
    ///   the final deadline has not passed.
    pub fn watch(
        tracker: Arc<AckTracker>,
        round: u64,
        phase: ListenerPhase,
        timeout: Duration,
        interval: Option<(Duration, IntervalFn)>,
        on_complete: CompleteFn,
    ) -> Option<Self> {
        let settled = {
            let state = tracker.state.lock().expect(POISON);
            state.round == round && !state.cancelled && state.pending.is_empty()
        };
        if settled {
            debug!("nothing outstanding for {phase:?} — completing immediately");
            on_complete(false);
            return None;
        }

        let worker_tracker = tracker.clone();
        let handle = thread::Builder::new()
            .name("vpmd-completion".into())
            .spawn(move || wait_loop(&worker_tracker, round, phase, timeout, interval, on_complete))
            .expect("failed to spawn completion worker");

        Some(Self {
            tracker,
            round,
            handle: Some(handle),
        })
    }

    /// Round number this waiter is watching.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Cancel the wait without invoking the completion callback.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for CompletionWaiter {
    fn drop(&mut self) {
        self.tracker.cancel(self.round);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ── Worker loop ───────────────────────────────────────────────

fn wait_loop(
    tracker: &AckTracker,
    round: u64,
    phase: ListenerPhase,
    timeout: Duration,
    interval: Option<(Duration, IntervalFn)>,
    on_complete: CompleteFn,
) {
    let started = Instant::now();
    let deadline = started + timeout;
    let (period, mut on_interval) = match interval {
        Some((p, f)) => (Some(p), Some(f)),
        None => (None, None),
    };
    let mut next_interval = period.map(|p| started + p);

    // Exactly-once guard: acknowledgements and the deadline may race.
    let completed = AtomicBool::new(false);
    let mut complete_cb = Some(on_complete);
    let mut fire = move |timed_out: bool| {
        if completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = complete_cb.take() {
            cb(timed_out);
        }
    };

    let mut state = tracker.state.lock().expect(POISON);
    loop {
        if state.round != round || state.cancelled {
            debug!("completion round {round} cancelled");
            return;
        }
        if state.pending.is_empty() {
            drop(state);
            fire(false);
            return;
        }

        let now = Instant::now();
        if now >= deadline {
            let outstanding = state.pending.len();
            drop(state);
            warn!(
                "completion round for {phase:?} timed out with {outstanding} listener(s) \
                 outstanding — proceeding anyway"
            );
            fire(true);
            return;
        }

        if let Some(at) = next_interval {
            if now >= at {
                drop(state);
                if let Some(cb) = on_interval.as_mut() {
                    cb();
                }
                next_interval = period.map(|p| Instant::now() + p);
                state = tracker.state.lock().expect(POISON);
                continue;
            }
        }

        let mut wake_at = deadline;
        if let Some(at) = next_interval {
            wake_at = wake_at.min(at);
        }
        let slice = wake_at.saturating_duration_since(now);
        let (guard, _) = tracker
            .cond
            .wait_timeout(state, slice)
            .expect(POISON);
        state = guard;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
