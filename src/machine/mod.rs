//! Power-state machine — the orchestration core.
//!
//! ```text
//!  WaitForHal ──▶ Running ──▶ ShutdownPrepare ──▶ WaitForFinish
//!      ▲             │            │    ▲  │             │
//!      │             │            └────┘  │             ▼
//!      │             ▼        (sub-phase) │         Suspending
//!      │      SimulatedSleep/Hibernation  │             │
//!      │                                  │             │
//!      └──────────[cancel / resume]───────┴─────────────┘
//! ```
//!
//! One dispatcher owns the machine: it drains the pending-request queue,
//! validates each transition against a static table, and runs exactly one
//! phase handler per accepted request.  Everything the handlers touch —
//! policy application, listener broadcast, completion rounds, the suspend
//! retrier — happens from that single thread; cross-thread completion
//! signals come back as new queued requests.
//!
//! Invalid transitions are expected under racing external triggers.  They
//! are dropped and logged, never raised: the dispatcher must not crash.

pub mod context;
mod handlers;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::app::events::PowerEvent;
use crate::app::ports::CorePorts;
use crate::completion::{AckTracker, CompletionWaiter};
use crate::config::PowerConfig;
use crate::coordinator::PowerPolicyCoordinator;
use crate::listeners::ListenerRegistry;
use crate::request::{PendingRequest, RequestQueue};
use crate::suspend::SuspendRetrier;

use context::{PowerContext, SharedFlags};

// ---------------------------------------------------------------------------
// Phase identity
// ---------------------------------------------------------------------------

/// Coarse lifecycle phase of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Waiting for the hardware abstraction layer to drive the next step.
    WaitForHal = 0,
    /// Fully up; user sessions and all components available.
    Running = 1,
    /// Listeners are preparing for shutdown/suspend (two sub-phases).
    ShutdownPrepare = 2,
    /// Final listener round before committing to the terminal action.
    WaitForFinish = 3,
    /// Entering the terminal action (suspend, hibernate or power-off).
    Suspending = 4,
    /// Debug injection: synthetic suspend-to-RAM cycle.
    SimulatedSleep = 5,
    /// Debug injection: synthetic suspend-to-disk cycle.
    SimulatedHibernation = 6,
}

impl Phase {
    /// Total number of phases.
    pub const COUNT: usize = 7;

    /// Decode the `repr(u8)` discriminant; `None` for anything else.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::WaitForHal),
            1 => Some(Self::Running),
            2 => Some(Self::ShutdownPrepare),
            3 => Some(Self::WaitForFinish),
            4 => Some(Self::Suspending),
            5 => Some(Self::SimulatedSleep),
            6 => Some(Self::SimulatedHibernation),
            _ => None,
        }
    }
}

/// Finer-grained value communicated to listeners on each broadcast.
/// Several listener phases live within one coarse [`Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerPhase {
    WaitForHal,
    On,
    PreShutdownPrepare,
    ShutdownPrepare,
    ShutdownEnter,
    SuspendEnter,
    HibernateEnter,
    ShutdownCancelled,
    ResumeFromSuspend,
    ResumeFromHibernate,
}

/// Terminal action a shutdown sequence resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownKind {
    /// Not stated by the trigger; resolved during preparation.
    #[default]
    Undefined,
    /// Full power-off.
    PowerOff,
    /// Suspend-to-RAM.
    DeepSleep,
    /// Suspend-to-disk.
    Hibernate,
}

/// Pick the first defined kind, falling back to full power-off.
pub(crate) fn resolve_kind(requested: ShutdownKind, fallback: ShutdownKind) -> ShutdownKind {
    match requested {
        ShutdownKind::Undefined => match fallback {
            ShutdownKind::Undefined => ShutdownKind::PowerOff,
            k => k,
        },
        k => k,
    }
}

// ---------------------------------------------------------------------------
// PhaseCell — lock-free phase snapshot for other threads
// ---------------------------------------------------------------------------

const NO_PHASE: u8 = u8::MAX;

/// Atomic mirror of the dispatcher-owned current phase, readable from any
/// thread without taking a lock.
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(NO_PHASE))
    }

    pub fn set(&self, phase: Option<Phase>) {
        self.0
            .store(phase.map_or(NO_PHASE, |p| p as u8), Ordering::Release);
    }

    pub fn get(&self) -> Option<Phase> {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }
}

// ---------------------------------------------------------------------------
// Dispatch outcome
// ---------------------------------------------------------------------------

/// What one dispatch step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing queued.
    Idle,
    /// The request was a no-op or an illegal transition; phase unchanged.
    Dropped,
    /// A genuine transition happened.
    Transitioned(Phase),
}

// ---------------------------------------------------------------------------
// PowerMachine
// ---------------------------------------------------------------------------

/// The orchestrator.  Owns the current phase and drives the sequence
/// *notify listeners → wait for completion → advance phase → invoke the
/// hardware port* for every accepted request.
pub struct PowerMachine {
    ctx: PowerContext,
    queue: Arc<RequestQueue>,
    registry: Arc<Mutex<ListenerRegistry>>,
    tracker: Arc<AckTracker>,
    coordinator: Arc<Mutex<PowerPolicyCoordinator>>,
    flags: Arc<SharedFlags>,
    phase_cell: Arc<PhaseCell>,
    retrier: SuspendRetrier,
    waiter: Option<CompletionWaiter>,
    ports: CorePorts,
}

impl PowerMachine {
    /// Construct the machine and all shared sub-structures.
    pub fn new(config: PowerConfig, ports: CorePorts) -> Self {
        let queue = Arc::new(RequestQueue::new());
        let registry = Arc::new(Mutex::new(ListenerRegistry::new()));
        let tracker = Arc::new(AckTracker::new());
        let coordinator = Arc::new(Mutex::new(PowerPolicyCoordinator::new(
            ports.components.clone(),
            registry.clone(),
            ports.sink.clone(),
        )));
        let flags = Arc::new(SharedFlags::new());
        let phase_cell = Arc::new(PhaseCell::new());
        let retrier = SuspendRetrier::new(
            ports.hardware.clone(),
            queue.clone(),
            ports.sink.clone(),
            &config,
        );

        Self {
            ctx: PowerContext::new(config),
            queue,
            registry,
            tracker,
            coordinator,
            flags,
            phase_cell,
            retrier,
            waiter: None,
            ports,
        }
    }

    // ── Shared-handle accessors (for the service facade and tests) ──

    pub fn queue(&self) -> Arc<RequestQueue> {
        self.queue.clone()
    }

    pub fn registry(&self) -> Arc<Mutex<ListenerRegistry>> {
        self.registry.clone()
    }

    pub fn tracker(&self) -> Arc<AckTracker> {
        self.tracker.clone()
    }

    pub fn coordinator(&self) -> Arc<Mutex<PowerPolicyCoordinator>> {
        self.coordinator.clone()
    }

    pub fn flags(&self) -> Arc<SharedFlags> {
        self.flags.clone()
    }

    pub fn phase_cell(&self) -> Arc<PhaseCell> {
        self.phase_cell.clone()
    }

    pub fn ports(&self) -> CorePorts {
        self.ports.clone()
    }

    /// Current phase as the dispatcher sees it.
    pub fn current_phase(&self) -> Option<Phase> {
        self.ctx.current
    }

    // ── Dispatch ──────────────────────────────────────────────

    /// Pop and process one pending request, if any.
    pub fn dispatch_one(&mut self) -> DispatchOutcome {
        match self.queue.pop() {
            None => DispatchOutcome::Idle,
            Some(req) => self.process(req),
        }
    }

    /// Run the dispatcher loop until the queue is closed.
    pub fn run(mut self) {
        info!("power dispatcher running");
        while let Some(req) = self.queue.wait_pop() {
            let _ = self.process(req);
        }
        if let Some(waiter) = self.waiter.take() {
            waiter.cancel();
        }
        info!("power dispatcher stopped");
    }

    /// Validate and apply a single request.
    pub fn process(&mut self, req: PendingRequest) -> DispatchOutcome {
        if self.is_noop(&req) {
            debug!("request {req:?} matches current phase — dropped");
            return DispatchOutcome::Dropped;
        }
        if !self.transition_allowed(&req) {
            warn!(
                "illegal transition {:?} -> {:?} ({:?}) — dropped",
                self.ctx.current, req.phase, req.listener_phase
            );
            self.ports.sink.emit(&PowerEvent::RequestDropped {
                current: self.ctx.current,
                requested: req.phase,
            });
            return DispatchOutcome::Dropped;
        }

        // A genuine transition invalidates the completion round still in
        // flight and every other queued intent.  Cancel first: once the
        // waiter is gone it cannot re-queue a stale follow-up behind the
        // clear.
        if let Some(waiter) = self.waiter.take() {
            waiter.cancel();
        }
        self.queue.clear();

        let from = self.ctx.current;
        self.ctx.current = Some(req.phase);
        self.ctx.listener_phase = Some(req.listener_phase);
        self.phase_cell.set(Some(req.phase));
        info!(
            "phase {:?} -> {:?} (listener state {:?}, kind {:?})",
            from, req.phase, req.listener_phase, req.kind
        );
        self.ports.sink.emit(&PowerEvent::PhaseChanged {
            from,
            to: req.phase,
        });

        self.enter_phase(req);
        DispatchOutcome::Transitioned(req.phase)
    }

    /// Force the current phase without running any handler.
    /// Test/debug injection only — production transitions always go
    /// through the request queue.
    pub fn force_phase(&mut self, phase: Phase, listener_phase: ListenerPhase) {
        self.ctx.current = Some(phase);
        self.ctx.listener_phase = Some(listener_phase);
        self.phase_cell.set(Some(phase));
    }

    // ── Transition legality ───────────────────────────────────

    fn is_noop(&self, req: &PendingRequest) -> bool {
        self.ctx.current == Some(req.phase)
            && self.ctx.listener_phase == Some(req.listener_phase)
    }

    /// The static allowed-predecessor table.  The simulated phases accept
    /// anything: they exist for test/debug injection.
    fn transition_allowed(&self, req: &PendingRequest) -> bool {
        let Some(current) = self.ctx.current else {
            // Before the first transition only HAL hand-off is meaningful.
            return req.phase == Phase::WaitForHal;
        };
        match (current, req.phase) {
            (Phase::WaitForHal, Phase::Running | Phase::ShutdownPrepare) => true,
            (
                Phase::Running,
                Phase::ShutdownPrepare | Phase::SimulatedSleep | Phase::SimulatedHibernation,
            ) => true,
            // Sub-phase advance or an urgent overriding shutdown; a
            // postponable repeat must yield to the round in flight.
            (Phase::ShutdownPrepare, Phase::ShutdownPrepare) => !req.can_postpone,
            (Phase::ShutdownPrepare, Phase::WaitForFinish | Phase::WaitForHal) => true,
            (Phase::SimulatedSleep | Phase::SimulatedHibernation, _) => true,
            (Phase::WaitForFinish, Phase::Suspending | Phase::WaitForHal) => true,
            (Phase::Suspending, Phase::WaitForHal) => true,
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
