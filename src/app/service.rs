//! Power service — the public facade over the orchestration core.
//!
//! [`PowerService`] owns the dispatcher thread and exposes the API the
//! surrounding system calls: phase-change requests, listener registration
//! and acknowledgement, policy administration, and the debug suspend
//! injection.  Construction wires the machine; [`start`](PowerService::start)
//! spawns the dispatcher and queues the initial HAL hand-off.
//!
//! ```text
//!  HAL glue ──▶ ┌──────────────────────────┐ ──▶ HardwarePort
//!               │       PowerService        │ ──▶ ComponentHandlerPort
//!  listeners ◀──│  queue · registry · ack   │ ──▶ AuxHardware/Session
//!   (acks) ────▶│  coordinator · dispatcher │ ──▶ EventSink
//!               └──────────────────────────┘
//! ```

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::completion::AckTracker;
use crate::config::PowerConfig;
use crate::coordinator::PowerPolicyCoordinator;
use crate::error::PolicyError;
use crate::listeners::{ListenerId, ListenerRegistry, PhaseListener};
use crate::machine::context::{AuxState, FactoryResetFn, SharedFlags, SimulateOptions};
use crate::machine::{ListenerPhase, Phase, PhaseCell, PowerMachine, ShutdownKind};
use crate::policy::{ComponentFilter, Policy};
use crate::request::{PendingRequest, RequestQueue};

use super::ports::CorePorts;

const COORD_POISON: &str = "policy coordinator mutex poisoned";
const REGISTRY_POISON: &str = "listener registry mutex poisoned";

/// The orchestration service.
pub struct PowerService {
    queue: Arc<RequestQueue>,
    tracker: Arc<AckTracker>,
    registry: Arc<Mutex<ListenerRegistry>>,
    coordinator: Arc<Mutex<PowerPolicyCoordinator>>,
    flags: Arc<SharedFlags>,
    phase_cell: Arc<PhaseCell>,
    ports: CorePorts,
    machine: Option<PowerMachine>,
    dispatcher: Option<JoinHandle<()>>,
}

impl PowerService {
    /// Wire the machine and all shared structures.
    /// Does **not** start dispatching — call [`start`](Self::start) next.
    pub fn new(config: PowerConfig, ports: CorePorts) -> Self {
        let machine = PowerMachine::new(config, ports.clone());
        Self {
            queue: machine.queue(),
            tracker: machine.tracker(),
            registry: machine.registry(),
            coordinator: machine.coordinator(),
            flags: machine.flags(),
            phase_cell: machine.phase_cell(),
            ports,
            machine: Some(machine),
            dispatcher: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Repair interrupted suspend state, spawn the dispatcher, and queue
    /// the initial HAL hand-off.
    pub fn start(&mut self) {
        self.repair_aux_state();

        let Some(machine) = self.machine.take() else {
            warn!("power service already started");
            return;
        };
        let handle = thread::Builder::new()
            .name("vpmd-dispatch".into())
            .spawn(move || machine.run())
            .expect("failed to spawn power dispatcher");
        self.dispatcher = Some(handle);

        self.queue.push(PendingRequest::immediate(
            Phase::WaitForHal,
            ListenerPhase::WaitForHal,
            ShutdownKind::Undefined,
        ));
        info!("power service started");
    }

    /// Close the queue and join the dispatcher.
    pub fn stop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }

    /// Block until the dispatcher exits (daemon main-thread parking).
    pub fn wait(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }

    // ── Phase machine entry points ────────────────────────────

    /// Enqueue a pending phase-change request (HAL glue, debug commands).
    pub fn request_phase_change(&self, request: PendingRequest) {
        self.queue.push(request);
    }

    /// Current phase; `None` before the first transition.
    pub fn current_phase(&self) -> Option<Phase> {
        self.phase_cell.get()
    }

    /// A completion-listener is done with the round broadcast as `phase`.
    /// Stale rounds and repeated acknowledgements are ignored.
    pub fn acknowledge(&self, phase: ListenerPhase, id: ListenerId) {
        if !self.tracker.acknowledge(phase, id) {
            debug!("{id} acknowledgement for {phase:?} had no effect");
        }
    }

    // ── Listener registration ─────────────────────────────────

    /// Register a listener that needs no acknowledgement.
    pub fn register_fire_and_forget_listener(&self, listener: Arc<dyn PhaseListener>) {
        self.registry
            .lock()
            .expect(REGISTRY_POISON)
            .register_fire_and_forget(listener);
    }

    /// Register a fire-and-forget listener with a policy interest filter.
    pub fn register_filtered_listener(
        &self,
        listener: Arc<dyn PhaseListener>,
        filter: ComponentFilter,
    ) {
        self.registry
            .lock()
            .expect(REGISTRY_POISON)
            .register_fire_and_forget_filtered(listener, filter);
    }

    /// Register a listener whose acknowledgement gates round completion.
    pub fn register_completion_listener(&self, listener: Arc<dyn PhaseListener>) {
        self.registry
            .lock()
            .expect(REGISTRY_POISON)
            .register_completion(listener);
    }

    /// Remove a listener.
    pub fn unregister(&self, id: ListenerId) {
        self.registry.lock().expect(REGISTRY_POISON).unregister(id);
    }

    /// Transport-reported liveness failure: remove the handle and treat
    /// any outstanding acknowledgement as satisfied — a dead listener
    /// cannot block progress.
    pub fn notify_dead(&self, id: ListenerId) {
        let removed = self.registry.lock().expect(REGISTRY_POISON).unregister(id);
        if removed {
            warn!("{id} died — auto-acknowledging any open round");
        }
        self.tracker.discard(id);
    }

    // ── Policy administration ─────────────────────────────────

    /// Register a new policy from component names.
    pub fn define_policy(
        &self,
        id: &str,
        enabled: &[&str],
        disabled: &[&str],
    ) -> Result<(), PolicyError> {
        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .define_policy(id, enabled, disabled)
    }

    /// Register a phase→policy default group.
    pub fn define_policy_group(
        &self,
        group_id: &str,
        entries: &[(Phase, &str)],
    ) -> Result<(), PolicyError> {
        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .define_group(group_id, entries)
    }

    /// Select the default-policy group consulted on phase entry.
    pub fn set_policy_group(&self, group_id: &str) -> Result<(), PolicyError> {
        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .set_group(group_id)
    }

    /// Apply a registered policy now (queued if a preemptive policy holds
    /// the lock).
    pub fn apply_policy_by_id(&self, id: &str) -> Result<(), PolicyError> {
        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .apply_policy(id, true)
    }

    /// Look up a registered policy.
    pub fn policy(&self, id: &str) -> Result<Policy, PolicyError> {
        self.coordinator.lock().expect(COORD_POISON).policy(id)
    }

    /// Id of the policy currently applied to the component handler.
    pub fn current_policy_id(&self) -> Option<String> {
        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .current_policy_id()
            .map(str::to_string)
    }

    // ── Overrides & debug entry points ────────────────────────

    /// Force the next suspend sequence to resolve to full shutdown.
    pub fn set_shutdown_on_next_suspend(&self, value: bool) {
        self.flags.set_shutdown_on_next_suspend(value);
    }

    /// Keep the preemptive policy in place across `WaitForHal` entries
    /// (forced silent sub-mode).
    pub fn set_forced_silent(&self, value: bool) {
        self.flags.set_forced_silent(value);
    }

    /// Defer a factory reset to the next `Running` entry.
    pub fn set_factory_reset_callback(&self, reset: FactoryResetFn) {
        self.flags.set_factory_reset(reset);
    }

    /// Inject a synthetic suspend cycle (debug/test).  Runs the usual
    /// broadcast machinery against the simulated phases; the real
    /// low-power port operations are never invoked.
    pub fn simulate_suspend(
        &self,
        kind: ShutdownKind,
        reboot_after: bool,
        skip_preparation: bool,
        wake_after_secs: u32,
    ) {
        let phase = if kind == ShutdownKind::Hibernate {
            Phase::SimulatedHibernation
        } else {
            Phase::SimulatedSleep
        };
        info!(
            "injecting simulated suspend: {kind:?}, reboot_after={reboot_after}, \
             skip_preparation={skip_preparation}, wake_after={wake_after_secs}s"
        );
        self.flags.set_simulation(SimulateOptions {
            kind,
            reboot_after,
            wake_after_secs,
        });
        let listener_phase = if skip_preparation {
            if phase == Phase::SimulatedHibernation {
                ListenerPhase::HibernateEnter
            } else {
                ListenerPhase::SuspendEnter
            }
        } else {
            ListenerPhase::ShutdownPrepare
        };
        self.queue
            .push(PendingRequest::immediate(phase, listener_phase, kind));
    }

    // ── Internal ──────────────────────────────────────────────

    /// A crash between aux-disable and restore leaves radios off; bring
    /// them back before dispatching anything.
    fn repair_aux_state(&self) {
        match AuxState::load(self.ports.store.as_ref()) {
            Ok(Some(state)) if state.disabled => {
                warn!("aux hardware left disabled by an interrupted suspend — restoring");
                self.ports.aux.restore();
                if let Err(e) = (AuxState { disabled: false }).save(self.ports.store.as_ref()) {
                    warn!("failed to clear persisted aux state: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("could not read persisted aux state: {e}"),
        }
    }
}

impl Drop for PowerService {
    fn drop(&mut self) {
        self.stop();
    }
}
