//! Port traits — the hexagonal boundary between the orchestration core
//! and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PowerMachine / PowerService (domain)
//! ```
//!
//! Driven adapters (the HAL transport glue, the component handler, radio
//! control, session management, persistence, event sinks) implement these
//! traits.  The core consumes them as shared trait objects, so the domain
//! never touches a transport or a wire format directly.
//!
//! Ports are called from the dispatcher thread and from completion
//! workers; implementations must be `Send + Sync` and take `&self`,
//! using interior mutability where they keep state.

use std::sync::Arc;

use crate::error::StoreError;
use crate::policy::{ComponentFilter, Policy};

use super::events::PowerEvent;

// ───────────────────────────────────────────────────────────────
// Hardware port (domain → power HAL)
// ───────────────────────────────────────────────────────────────

/// Commands and acknowledgements the core sends to the platform's power
/// abstraction.  The transport behind it is out of scope — these are
/// fire-level operations, not a wire format.
pub trait HardwarePort: Send + Sync {
    /// Report that the core is idle at the HAL boundary.
    fn send_wait_for_hal(&self);

    /// Report that an in-flight shutdown was cancelled.
    fn send_shutdown_cancel(&self);

    /// Report completion of a resume from suspend-to-RAM.
    fn send_resume_from_suspend(&self);

    /// Report completion of a resume from suspend-to-disk.
    fn send_resume_from_hibernate(&self);

    /// Report entry into shutdown preparation.
    fn send_shutdown_prepare(&self);

    /// Ask for more time before the platform's shutdown deadline.
    fn send_postpone_shutdown(&self, extra_millis: u64);

    /// Report an imminent suspend-to-RAM, with an optional wake delay.
    fn send_enter_suspend(&self, wake_after_secs: u32);

    /// Report an imminent full shutdown, with an optional wake delay.
    fn send_shutdown_start(&self, wake_after_secs: u32);

    /// Report an imminent suspend-to-disk, with an optional wake delay.
    fn send_enter_hibernate(&self, wake_after_secs: u32);

    /// Enter suspend-to-RAM.  Returns `false` on (transient) failure.
    fn enter_deep_sleep(&self) -> bool;

    /// Enter suspend-to-disk.  Returns `false` on (transient) failure.
    fn enter_hibernation(&self) -> bool;

    /// Full power-off, immediately.
    fn shutdown_now(&self);
}

// ───────────────────────────────────────────────────────────────
// Component handler port (domain → component power control)
// ───────────────────────────────────────────────────────────────

/// Applies policy decisions to the actual platform components.
pub trait ComponentHandlerPort: Send + Sync {
    /// Apply a policy's enabled/disabled partition.  Components the
    /// policy does not mention keep their current state.
    fn apply_policy(&self, policy: &Policy);

    /// The net component state after every application so far.
    fn accumulated_policy(&self) -> Policy;

    /// Whether the most recent application touched any component in
    /// `filter` (used to route policy-change notifications).
    fn is_component_affected(&self, filter: &ComponentFilter) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Auxiliary hardware port (radios etc.)
// ───────────────────────────────────────────────────────────────

/// Best-effort auxiliary hardware disabled around a suspend cycle to
/// simplify the low-power transition.
pub trait AuxHardwarePort: Send + Sync {
    /// Power down the auxiliary hardware.
    fn disable(&self);

    /// Bring it back to its pre-suspend state.
    fn restore(&self);
}

// ───────────────────────────────────────────────────────────────
// Session port (user-session collaborator)
// ───────────────────────────────────────────────────────────────

/// Hooks for the user-session subsystem around a suspend cycle.
pub trait SessionPort: Send + Sync {
    /// Called once the platform commits to suspending.
    fn on_suspend_entry(&self);

    /// Called on a (non-boot) return to the `Running` phase.
    fn on_resume_entry(&self);
}

// ───────────────────────────────────────────────────────────────
// Key-value store port (opaque persistence)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for state that must survive a suspend
/// cycle.  Keys are namespaced to prevent collisions between subsystems;
/// writes must be atomic — no partial blobs after power loss.
pub trait StorePort: Send + Sync {
    /// Read a value; `None` when the key does not exist.
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value atomically.
    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → observability)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`PowerEvent`]s through this port.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PowerEvent);
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// All collaborator ports the core consumes, bundled for wiring.
#[derive(Clone)]
pub struct CorePorts {
    pub hardware: Arc<dyn HardwarePort>,
    pub components: Arc<dyn ComponentHandlerPort>,
    pub aux: Arc<dyn AuxHardwarePort>,
    pub session: Arc<dyn SessionPort>,
    pub store: Arc<dyn StorePort>,
    pub sink: Arc<dyn EventSink>,
}
