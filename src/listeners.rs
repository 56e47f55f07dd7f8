//! Listener registry — who gets told about phase and policy changes.
//!
//! Two listener classes exist:
//!
//! * **fire-and-forget** — notified on every broadcast, no acknowledgement
//!   expected;
//! * **completion-required** — must explicitly acknowledge before a
//!   broadcast round is considered finished.
//!
//! The registry stores opaque handles plus a per-listener policy interest
//! filter.  Transport death notification arrives from whatever glue the
//! surrounding system provides; the core only sees `remove()` plus the
//! acknowledgement-set discard the service performs alongside it.
//! Broadcasts are snapshot-then-notify: the handle lists are cloned under
//! the lock and the port calls happen after release, so a listener callback
//! can re-enter `register`/`unregister` without deadlocking.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::NotifyError;
use crate::machine::ListenerPhase;
use crate::policy::{ComponentFilter, Policy};

// ───────────────────────────────────────────────────────────────
// Identity & callback trait
// ───────────────────────────────────────────────────────────────

/// Opaque, comparable listener identity (binder cookie, connection id, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Callback surface a registered listener exposes to the core.
///
/// Implementations live on the far side of a transport; both methods may
/// fail, and a failure is treated as "this listener did not hear us" — it
/// never aborts the broadcast round.
pub trait PhaseListener: Send + Sync {
    /// The listener's stable identity.
    fn id(&self) -> ListenerId;

    /// Deliver a lifecycle broadcast.
    fn on_phase_change(&self, phase: ListenerPhase) -> Result<(), NotifyError>;

    /// Deliver a power-policy change.  Only called for listeners registered
    /// with a [`ComponentFilter`] whose watched components were affected.
    fn on_policy_change(&self, _policy: &Policy) -> Result<(), NotifyError> {
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Entry {
    listener: Arc<dyn PhaseListener>,
    filter: Option<ComponentFilter>,
}

/// Consistent view of the listener sets at one broadcast instant.
pub struct BroadcastSnapshot {
    pub fire_and_forget: Vec<Arc<dyn PhaseListener>>,
    pub completion: Vec<Arc<dyn PhaseListener>>,
}

/// Registry of phase/policy listeners.  Owned by a mutex shared between
/// the dispatcher (broadcast snapshots) and the registration API.
#[derive(Default)]
pub struct ListenerRegistry {
    fire_and_forget: Vec<Entry>,
    completion: Vec<Entry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener that needs no acknowledgement.
    pub fn register_fire_and_forget(&mut self, listener: Arc<dyn PhaseListener>) {
        self.insert(listener, None, false);
    }

    /// Register a fire-and-forget listener with a policy interest filter.
    pub fn register_fire_and_forget_filtered(
        &mut self,
        listener: Arc<dyn PhaseListener>,
        filter: ComponentFilter,
    ) {
        self.insert(listener, Some(filter), false);
    }

    /// Register a listener whose acknowledgement gates round completion.
    pub fn register_completion(&mut self, listener: Arc<dyn PhaseListener>) {
        self.insert(listener, None, true);
    }

    /// Register a completion-required listener with a policy filter.
    pub fn register_completion_filtered(
        &mut self,
        listener: Arc<dyn PhaseListener>,
        filter: ComponentFilter,
    ) {
        self.insert(listener, Some(filter), true);
    }

    /// Remove a listener from whichever class holds it.
    /// Returns `true` if a handle was actually removed.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.fire_and_forget.len() + self.completion.len();
        self.fire_and_forget.retain(|e| e.listener.id() != id);
        self.completion.retain(|e| e.listener.id() != id);
        before != self.fire_and_forget.len() + self.completion.len()
    }

    /// Snapshot both listener lists for a broadcast.  The returned handles
    /// are clones; concurrent register/unregister cannot affect an
    /// in-flight notification pass.
    pub fn snapshot_for_broadcast(&self) -> BroadcastSnapshot {
        BroadcastSnapshot {
            fire_and_forget: self
                .fire_and_forget
                .iter()
                .map(|e| e.listener.clone())
                .collect(),
            completion: self.completion.iter().map(|e| e.listener.clone()).collect(),
        }
    }

    /// Listeners (either class) that registered a policy interest filter.
    pub fn policy_watchers(&self) -> Vec<(Arc<dyn PhaseListener>, ComponentFilter)> {
        self.fire_and_forget
            .iter()
            .chain(self.completion.iter())
            .filter_map(|e| {
                e.filter
                    .as_ref()
                    .map(|f| (e.listener.clone(), f.clone()))
            })
            .collect()
    }

    /// Number of registered completion-required listeners.
    pub fn completion_count(&self) -> usize {
        self.completion.len()
    }

    /// Number of registered fire-and-forget listeners.
    pub fn fire_and_forget_count(&self) -> usize {
        self.fire_and_forget.len()
    }

    // ── Internal ──────────────────────────────────────────────

    /// A re-registered id replaces the previous handle, whichever class it
    /// was in (transports reconnect with fresh callbacks).
    fn insert(
        &mut self,
        listener: Arc<dyn PhaseListener>,
        filter: Option<ComponentFilter>,
        completion: bool,
    ) {
        let id = listener.id();
        if self.unregister(id) {
            debug!("{id} re-registered, replacing previous handle");
        }
        let entry = Entry { listener, filter };
        if completion {
            self.completion.push(entry);
        } else {
            self.fire_and_forget.push(entry);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
