//! Dispatcher-owned state plus the small cross-thread control surface.
//!
//! `PowerContext` is written exclusively by the dispatcher thread — phase,
//! boot tracking, resolved terminal action, wake bookkeeping.  Anything a
//! concurrent caller may set (simulation options, the factory-reset
//! deferral, override flags) lives in `SharedFlags` behind atomics or a
//! mutex instead of leaking `&mut` access across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::app::ports::StorePort;
use crate::config::PowerConfig;
use crate::error::StoreError;
use crate::machine::{ListenerPhase, Phase, ShutdownKind};

// ───────────────────────────────────────────────────────────────
// PowerContext
// ───────────────────────────────────────────────────────────────

/// Mutable orchestrator state, owned by the dispatcher thread.
pub struct PowerContext {
    /// Tunable parameters.
    pub config: PowerConfig,
    /// Current coarse phase; `None` before the first transition.
    pub current: Option<Phase>,
    /// Listener phase the current phase was entered with.
    pub listener_phase: Option<ListenerPhase>,
    /// True until the first `Running` entry completes.
    pub booting: bool,
    /// Terminal action resolved during core shutdown preparation.
    pub terminal_action: ShutdownKind,
    /// Wake timer reported to the platform, pending clearance on resume.
    pub scheduled_wake: Option<u32>,
    /// Whether auxiliary hardware is currently disabled for suspend.
    pub aux_disabled: bool,
}

impl PowerContext {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            current: None,
            listener_phase: None,
            booting: true,
            terminal_action: ShutdownKind::Undefined,
            scheduled_wake: None,
            aux_disabled: false,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// SharedFlags — service-settable controls
// ───────────────────────────────────────────────────────────────

/// Options for an injected synthetic suspend cycle.
#[derive(Debug, Clone, Copy)]
pub struct SimulateOptions {
    pub kind: ShutdownKind,
    pub reboot_after: bool,
    pub wake_after_secs: u32,
}

/// Deferred factory-reset action, invoked on the next `Running` entry.
pub type FactoryResetFn = Box<dyn FnOnce() + Send>;

/// Cross-thread control flags shared between the public API and the
/// dispatcher.
pub struct SharedFlags {
    shutdown_on_next_suspend: AtomicBool,
    forced_silent: AtomicBool,
    simulation: Mutex<Option<SimulateOptions>>,
    factory_reset: Mutex<Option<FactoryResetFn>>,
}

impl Default for SharedFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedFlags {
    pub fn new() -> Self {
        Self {
            shutdown_on_next_suspend: AtomicBool::new(false),
            forced_silent: AtomicBool::new(false),
            simulation: Mutex::new(None),
            factory_reset: Mutex::new(None),
        }
    }

    pub fn set_shutdown_on_next_suspend(&self, value: bool) {
        self.shutdown_on_next_suspend.store(value, Ordering::Release);
    }

    pub fn shutdown_on_next_suspend(&self) -> bool {
        self.shutdown_on_next_suspend.load(Ordering::Acquire)
    }

    pub fn set_forced_silent(&self, value: bool) {
        self.forced_silent.store(value, Ordering::Release);
    }

    pub fn forced_silent(&self) -> bool {
        self.forced_silent.load(Ordering::Acquire)
    }

    pub fn set_simulation(&self, opts: SimulateOptions) {
        *self.simulation.lock().expect("simulation mutex poisoned") = Some(opts);
    }

    pub fn simulation(&self) -> Option<SimulateOptions> {
        *self.simulation.lock().expect("simulation mutex poisoned")
    }

    pub fn clear_simulation(&self) {
        *self.simulation.lock().expect("simulation mutex poisoned") = None;
    }

    pub fn set_factory_reset(&self, reset: FactoryResetFn) {
        *self
            .factory_reset
            .lock()
            .expect("factory reset mutex poisoned") = Some(reset);
    }

    pub fn take_factory_reset(&self) -> Option<FactoryResetFn> {
        self.factory_reset
            .lock()
            .expect("factory reset mutex poisoned")
            .take()
    }
}

// ───────────────────────────────────────────────────────────────
// Persisted auxiliary-hardware state
// ───────────────────────────────────────────────────────────────

const AUX_NAMESPACE: &str = "power";
const AUX_KEY: &str = "aux_state";

/// Auxiliary-hardware toggle state persisted across a suspend cycle, so an
/// interrupted cycle can be repaired at next startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxState {
    pub disabled: bool,
}

impl AuxState {
    /// Persist through the opaque key-value store.
    pub fn save(self, store: &dyn StorePort) -> Result<(), StoreError> {
        let bytes = postcard::to_allocvec(&self).map_err(|_| StoreError::Corrupted)?;
        store.write(AUX_NAMESPACE, AUX_KEY, &bytes)
    }

    /// Load the persisted state, `None` when nothing was stored.
    pub fn load(store: &dyn StorePort) -> Result<Option<Self>, StoreError> {
        match store.read(AUX_NAMESPACE, AUX_KEY)? {
            None => Ok(None),
            Some(bytes) => postcard::from_bytes(&bytes)
                .map(Some)
                .map_err(|_| StoreError::Corrupted),
        }
    }
}
