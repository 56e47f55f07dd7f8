//! Power-policy coordination.
//!
//! Applies policies to the component-handler port as phases change and
//! owns the *preemptive* policy mode: a temporarily-forced policy (e.g.
//! no-user-interaction during shutdown preparation) that overrides the
//! active one and is restored on cancellation.
//!
//! The preemptive lock is a plain exclusion flag — at most one preemptive
//! policy is active system-wide.  Nested preemptive applications replace
//! the active one but preserve the original fallback.  Non-preemptive
//! applications arriving while the lock is held are queued as *pending*
//! and applied only once the lock is released, after the fallback has been
//! restored.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::app::events::PowerEvent;
use crate::app::ports::{ComponentHandlerPort, EventSink};
use crate::error::PolicyError;
use crate::listeners::ListenerRegistry;
use crate::machine::Phase;
use crate::policy::{Policy, PolicyStore, POLICY_ALL_ON, POLICY_INITIAL_ON};

const REGISTRY_POISON: &str = "listener registry mutex poisoned";

/// Keeps the applied power policy consistent with the lifecycle phase.
pub struct PowerPolicyCoordinator {
    store: PolicyStore,
    handler: Arc<dyn ComponentHandlerPort>,
    registry: Arc<Mutex<ListenerRegistry>>,
    sink: Arc<dyn EventSink>,
    /// Id of the policy currently applied to the component handler.
    current: Option<String>,
    /// Policy to restore when the preemptive lock is released.
    fallback: Option<String>,
    /// The preemptive exclusion flag.
    preemptive_active: bool,
    /// Non-preemptive application queued while the lock was held.
    pending: Option<String>,
    /// Active default-policy group, if one was selected.
    group: Option<String>,
}

impl PowerPolicyCoordinator {
    pub fn new(
        handler: Arc<dyn ComponentHandlerPort>,
        registry: Arc<Mutex<ListenerRegistry>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store: PolicyStore::with_system_policies(),
            handler,
            registry,
            sink,
            current: None,
            fallback: None,
            preemptive_active: false,
            pending: None,
            group: None,
        }
    }

    // ── Administrative entry points ───────────────────────────

    /// Register a new policy (see [`PolicyStore::register`]).
    pub fn define_policy(
        &mut self,
        id: &str,
        enabled: &[&str],
        disabled: &[&str],
    ) -> Result<(), PolicyError> {
        self.store.register(id, enabled, disabled)
    }

    /// Register a phase→policy default group.
    pub fn define_group(
        &mut self,
        group_id: &str,
        entries: &[(Phase, &str)],
    ) -> Result<(), PolicyError> {
        self.store.register_group(group_id, entries)
    }

    /// Select the default-policy group consulted on phase entry.
    pub fn set_group(&mut self, group_id: &str) -> Result<(), PolicyError> {
        if !self.store.has_group(group_id) {
            return Err(PolicyError::UnknownGroup);
        }
        self.group = Some(group_id.to_string());
        Ok(())
    }

    /// Look up a registered policy.
    pub fn policy(&self, id: &str) -> Result<Policy, PolicyError> {
        self.store.get(id).map(|p| (*p).clone())
    }

    // ── Application ───────────────────────────────────────────

    /// Apply a non-preemptive policy.  While a preemptive policy is locked
    /// the application is queued and becomes visible only after
    /// [`cancel_preemptive`](Self::cancel_preemptive).
    pub fn apply_policy(&mut self, id: &str, notify: bool) -> Result<(), PolicyError> {
        if self.preemptive_active {
            // Validate now so the caller hears about typos synchronously.
            let _ = self.store.get(id)?;
            info!("policy '{id}' queued behind the active preemptive policy");
            self.pending = Some(id.to_string());
            return Ok(());
        }
        self.apply_now(id, notify)
    }

    /// Apply a preemptive policy, remembering the previously-active
    /// non-preemptive policy for restoration.
    pub fn apply_preemptive(&mut self, id: &str) -> Result<(), PolicyError> {
        let policy = self.store.get(id)?;
        if !self.preemptive_active {
            self.fallback = self.current.clone();
            self.preemptive_active = true;
        }
        // Nested call: replace the active preemptive policy, keep the
        // original fallback untouched.
        self.handler.apply_policy(&policy);
        self.current = Some(id.to_string());
        self.sink.emit(&PowerEvent::PolicyApplied { id: id.to_string() });
        info!("preemptive policy '{id}' applied");
        Ok(())
    }

    /// Release the preemptive lock: restore the policy active immediately
    /// before the preemptive call, then apply anything queued meanwhile.
    pub fn cancel_preemptive(&mut self) {
        if !self.preemptive_active {
            return;
        }
        self.preemptive_active = false;
        info!("preemptive policy cancelled");

        if let Some(fallback) = self.fallback.take() {
            if let Err(e) = self.apply_now(&fallback, true) {
                warn!("failed to restore policy '{fallback}': {e}");
            }
        }
        if let Some(pending) = self.pending.take() {
            if let Err(e) = self.apply_now(&pending, true) {
                warn!("failed to apply queued policy '{pending}': {e}");
            }
        }
    }

    /// Apply the default policy for a phase: the active group's mapping if
    /// one is set, the built-in default otherwise.
    pub fn apply_default_for(&mut self, phase: Phase) {
        let id = self
            .group
            .as_deref()
            .and_then(|g| self.store.default_for(g, phase))
            .map(|p| p.id.clone())
            .unwrap_or_else(|| {
                match phase {
                    Phase::Running => POLICY_ALL_ON,
                    _ => POLICY_INITIAL_ON,
                }
                .to_string()
            });
        if let Err(e) = self.apply_policy(&id, true) {
            warn!("default policy '{id}' for {phase:?} failed: {e}");
        }
    }

    /// Id of the policy currently applied to the component handler.
    pub fn current_policy_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Whether a preemptive policy currently holds the lock.
    pub fn preemptive_active(&self) -> bool {
        self.preemptive_active
    }

    // ── Internal ──────────────────────────────────────────────

    fn apply_now(&mut self, id: &str, notify: bool) -> Result<(), PolicyError> {
        let policy = self.store.get(id)?;
        self.handler.apply_policy(&policy);
        self.current = Some(id.to_string());
        self.sink.emit(&PowerEvent::PolicyApplied { id: id.to_string() });
        info!("policy '{id}' applied");
        if notify {
            self.notify_policy_change(&policy);
        }
        Ok(())
    }

    /// Tell interested listeners, filtered by which components the change
    /// actually touched.
    fn notify_policy_change(&self, policy: &Policy) {
        let watchers = self
            .registry
            .lock()
            .expect(REGISTRY_POISON)
            .policy_watchers();
        for (listener, filter) in watchers {
            if !self.handler.is_component_affected(&filter) {
                continue;
            }
            if let Err(e) = listener.on_policy_change(policy) {
                warn!("policy notify to {} failed: {e}", listener.id());
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
