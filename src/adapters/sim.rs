//! Simulated platform adapters.
//!
//! Stand-ins for the real transport glue, used by the standalone daemon
//! and by end-to-end tests.  Every port call is logged; the component
//! handler keeps a real accumulated state so policy diffing behaves like
//! production.

use std::collections::HashMap;
use std::sync::Mutex;

use log::info;

use crate::app::ports::{
    AuxHardwarePort, ComponentHandlerPort, HardwarePort, SessionPort,
};
use crate::policy::{Component, ComponentFilter, Policy};

// ───────────────────────────────────────────────────────────────
// Simulated power HAL
// ───────────────────────────────────────────────────────────────

/// Simulated hardware transport.  Low-power entries always succeed.
pub struct SimHardware;

impl SimHardware {
    pub fn new() -> Self {
        Self
    }

    /// Simulated transport binding; always ready.
    pub fn bind(&self) -> bool {
        true
    }
}

impl HardwarePort for SimHardware {
    fn send_wait_for_hal(&self) {
        info!("HAL | wait-for-hal");
    }

    fn send_shutdown_cancel(&self) {
        info!("HAL | shutdown cancelled");
    }

    fn send_resume_from_suspend(&self) {
        info!("HAL | resume from suspend");
    }

    fn send_resume_from_hibernate(&self) {
        info!("HAL | resume from hibernate");
    }

    fn send_shutdown_prepare(&self) {
        info!("HAL | shutdown prepare");
    }

    fn send_postpone_shutdown(&self, extra_millis: u64) {
        info!("HAL | postpone shutdown by {extra_millis}ms");
    }

    fn send_enter_suspend(&self, wake_after_secs: u32) {
        info!("HAL | enter suspend (wake after {wake_after_secs}s)");
    }

    fn send_shutdown_start(&self, wake_after_secs: u32) {
        info!("HAL | shutdown start (wake after {wake_after_secs}s)");
    }

    fn send_enter_hibernate(&self, wake_after_secs: u32) {
        info!("HAL | enter hibernate (wake after {wake_after_secs}s)");
    }

    fn enter_deep_sleep(&self) -> bool {
        info!("HAL | deep sleep — resuming immediately (simulated)");
        true
    }

    fn enter_hibernation(&self) -> bool {
        info!("HAL | hibernation — resuming immediately (simulated)");
        true
    }

    fn shutdown_now(&self) {
        info!("HAL | shutdown now");
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated component handler
// ───────────────────────────────────────────────────────────────

/// Tracks the accumulated component state and the last change set.
pub struct SimComponents {
    state: Mutex<HashMap<Component, bool>>,
    last_change: Mutex<Vec<Component>>,
}

impl Default for SimComponents {
    fn default() -> Self {
        Self::new()
    }
}

impl SimComponents {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            last_change: Mutex::new(Vec::new()),
        }
    }
}

impl ComponentHandlerPort for SimComponents {
    fn apply_policy(&self, policy: &Policy) {
        let mut state = self.state.lock().expect("component state mutex poisoned");
        let mut changed = Vec::new();
        for c in &policy.enabled {
            if state.insert(*c, true) != Some(true) {
                changed.push(*c);
            }
        }
        for c in &policy.disabled {
            if state.insert(*c, false) != Some(false) {
                changed.push(*c);
            }
        }
        info!(
            "COMPONENTS | '{}': {} enabled, {} disabled, {} changed",
            policy.id,
            policy.enabled.len(),
            policy.disabled.len(),
            changed.len()
        );
        *self
            .last_change
            .lock()
            .expect("component change mutex poisoned") = changed;
    }

    fn accumulated_policy(&self) -> Policy {
        let state = self.state.lock().expect("component state mutex poisoned");
        let mut enabled = Vec::new();
        let mut disabled = Vec::new();
        for (component, on) in state.iter() {
            if *on {
                enabled.push(*component);
            } else {
                disabled.push(*component);
            }
        }
        Policy {
            id: "accumulated".to_string(),
            enabled,
            disabled,
        }
    }

    fn is_component_affected(&self, filter: &ComponentFilter) -> bool {
        self.last_change
            .lock()
            .expect("component change mutex poisoned")
            .iter()
            .any(|c| filter.watches(*c))
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated auxiliary hardware & session manager
// ───────────────────────────────────────────────────────────────

/// Simulated radio control.
pub struct SimAux {
    disabled: Mutex<bool>,
}

impl Default for SimAux {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAux {
    pub fn new() -> Self {
        Self {
            disabled: Mutex::new(false),
        }
    }

    pub fn is_disabled(&self) -> bool {
        *self.disabled.lock().expect("aux state mutex poisoned")
    }
}

impl AuxHardwarePort for SimAux {
    fn disable(&self) {
        info!("AUX | radios disabled");
        *self.disabled.lock().expect("aux state mutex poisoned") = true;
    }

    fn restore(&self) {
        info!("AUX | radios restored");
        *self.disabled.lock().expect("aux state mutex poisoned") = false;
    }
}

/// Simulated user-session manager.
pub struct SimSession;

impl SessionPort for SimSession {
    fn on_suspend_entry(&self) {
        info!("SESSION | suspend entry");
    }

    fn on_resume_entry(&self) {
        info!("SESSION | resume entry");
    }
}
