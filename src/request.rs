//! Pending phase-change request queue.
//!
//! Requests are produced by:
//! - the hardware transport (platform power-state commands)
//! - completion callbacks (sub-phase advances, resume after suspend)
//! - administrative/debug entry points (simulated suspend, shutdown cancel)
//!
//! Requests are consumed by the single dispatcher, one at a time.
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ HAL command  │────▶│                   │     │              │
//! │ Completion   │────▶│  Request Deque    │────▶│  Dispatcher  │
//! │ Debug/Admin  │────▶│  (front = newest) │     │  (consumer)  │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! New requests are inserted at the **front** — most-recent-wins priority.
//! Insertion filters out queued entries the newcomer supersedes; the deque
//! is fixed-capacity and drops the oldest entry when full.

use std::sync::{Condvar, Mutex};

use heapless::Deque;
use log::{debug, warn};

use crate::machine::{ListenerPhase, Phase, ShutdownKind};

/// Maximum number of queued requests.
/// Racing triggers beyond this depth are stale by definition.
pub const QUEUE_CAPACITY: usize = 16;

// ───────────────────────────────────────────────────────────────
// PendingRequest
// ───────────────────────────────────────────────────────────────

/// A single queued phase-change intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Coarse lifecycle phase to enter.
    pub phase: Phase,
    /// Finer-grained value broadcast to listeners on entry.
    pub listener_phase: ListenerPhase,
    /// Whether this request may yield to later, more urgent ones.
    pub can_postpone: bool,
    /// Terminal action the request carries (power off / RAM / disk).
    pub kind: ShutdownKind,
}

impl PendingRequest {
    /// Convenience constructor for internal advances that must not yield.
    pub fn immediate(phase: Phase, listener_phase: ListenerPhase, kind: ShutdownKind) -> Self {
        Self {
            phase,
            listener_phase,
            can_postpone: false,
            kind,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// RequestQueue
// ───────────────────────────────────────────────────────────────

struct Inner {
    deque: Deque<PendingRequest, QUEUE_CAPACITY>,
    closed: bool,
}

/// Thread-safe bounded deque of pending requests with dispatcher wakeup.
pub struct RequestQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                deque: Deque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Insert a request at the front (newest wins) after dropping queued
    /// entries it supersedes:
    ///
    /// * entries with the same `(phase, listener_phase)` are redundant;
    /// * a non-postponable request outranks queued postponable requests
    ///   for the same phase.
    pub fn push(&self, req: PendingRequest) {
        let mut inner = self.inner.lock().expect("request queue mutex poisoned");

        let mut kept: Deque<PendingRequest, QUEUE_CAPACITY> = Deque::new();
        while let Some(old) = inner.deque.pop_front() {
            let duplicate = old.phase == req.phase && old.listener_phase == req.listener_phase;
            let outranked = !req.can_postpone && old.can_postpone && old.phase == req.phase;
            if duplicate || outranked {
                debug!("queued request superseded: {old:?}");
                continue;
            }
            let _ = kept.push_back(old);
        }
        inner.deque = kept;

        if inner.deque.is_full() {
            if let Some(dropped) = inner.deque.pop_back() {
                warn!("request queue full — dropping oldest: {dropped:?}");
            }
        }
        if inner.deque.push_front(req).is_err() {
            // Unreachable: a slot was freed above.
            warn!("request queue rejected push: {req:?}");
        }
        self.ready.notify_all();
    }

    /// Pop the newest pending request without blocking.
    pub fn pop(&self) -> Option<PendingRequest> {
        self.inner
            .lock()
            .expect("request queue mutex poisoned")
            .deque
            .pop_front()
    }

    /// Block until a request is available or the queue is closed.
    /// Returns `None` only on close.
    pub fn wait_pop(&self) -> Option<PendingRequest> {
        let mut inner = self.inner.lock().expect("request queue mutex poisoned");
        loop {
            if let Some(req) = inner.deque.pop_front() {
                return Some(req);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .ready
                .wait(inner)
                .expect("request queue mutex poisoned");
        }
    }

    /// Discard every queued request.  A genuine phase transition
    /// invalidates all other queued intents.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("request queue mutex poisoned");
        while inner.deque.pop_front().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("request queue mutex poisoned")
            .deque
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("request queue mutex poisoned")
            .deque
            .len()
    }

    /// Close the queue, waking the dispatcher so it can exit.
    pub fn close(&self) {
        self.inner
            .lock()
            .expect("request queue mutex poisoned")
            .closed = true;
        self.ready.notify_all();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
