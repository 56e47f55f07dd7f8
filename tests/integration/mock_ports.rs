//! Recording mock adapters for integration tests.
//!
//! Every port call is recorded so tests can assert on the full command
//! history without a real platform behind the service.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vpmd::adapters::memstore::MemStore;
use vpmd::app::events::PowerEvent;
use vpmd::app::ports::{
    AuxHardwarePort, ComponentHandlerPort, CorePorts, EventSink, HardwarePort, SessionPort,
};
use vpmd::app::service::PowerService;
use vpmd::config::PowerConfig;
use vpmd::listeners::{ListenerId, PhaseListener};
use vpmd::machine::{ListenerPhase, Phase};
use vpmd::policy::{ComponentFilter, Policy};
use vpmd::NotifyError;

// ── Hardware port recorder ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    WaitForHal,
    ShutdownCancel,
    ResumeFromSuspend,
    ResumeFromHibernate,
    ShutdownPrepare,
    Postpone(u64),
    EnterSuspend(u32),
    ShutdownStart(u32),
    EnterHibernate(u32),
    DeepSleep,
    Hibernation,
    ShutdownNow,
}

pub struct RecordingHal {
    pub calls: Mutex<Vec<HalCall>>,
    /// Attempt number (1-based) from which low-power entry succeeds;
    /// `0` means never.
    pub suspend_succeeds_on: u32,
    suspend_attempts: AtomicU32,
}

#[allow(dead_code)]
impl RecordingHal {
    pub fn new() -> Arc<Self> {
        Self::with_suspend_behaviour(1)
    }

    pub fn with_suspend_behaviour(succeeds_on: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            suspend_succeeds_on: succeeds_on,
            suspend_attempts: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &HalCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn postpone_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HalCall::Postpone(_)))
            .count()
    }

    fn low_power_entry(&self, call: HalCall) -> bool {
        self.calls.lock().unwrap().push(call);
        let n = self.suspend_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.suspend_succeeds_on != 0 && n >= self.suspend_succeeds_on
    }
}

impl HardwarePort for RecordingHal {
    fn send_wait_for_hal(&self) {
        self.calls.lock().unwrap().push(HalCall::WaitForHal);
    }
    fn send_shutdown_cancel(&self) {
        self.calls.lock().unwrap().push(HalCall::ShutdownCancel);
    }
    fn send_resume_from_suspend(&self) {
        self.calls.lock().unwrap().push(HalCall::ResumeFromSuspend);
    }
    fn send_resume_from_hibernate(&self) {
        self.calls
            .lock()
            .unwrap()
            .push(HalCall::ResumeFromHibernate);
    }
    fn send_shutdown_prepare(&self) {
        self.calls.lock().unwrap().push(HalCall::ShutdownPrepare);
    }
    fn send_postpone_shutdown(&self, extra_millis: u64) {
        self.calls
            .lock()
            .unwrap()
            .push(HalCall::Postpone(extra_millis));
    }
    fn send_enter_suspend(&self, wake_after_secs: u32) {
        self.calls
            .lock()
            .unwrap()
            .push(HalCall::EnterSuspend(wake_after_secs));
    }
    fn send_shutdown_start(&self, wake_after_secs: u32) {
        self.calls
            .lock()
            .unwrap()
            .push(HalCall::ShutdownStart(wake_after_secs));
    }
    fn send_enter_hibernate(&self, wake_after_secs: u32) {
        self.calls
            .lock()
            .unwrap()
            .push(HalCall::EnterHibernate(wake_after_secs));
    }
    fn enter_deep_sleep(&self) -> bool {
        self.low_power_entry(HalCall::DeepSleep)
    }
    fn enter_hibernation(&self) -> bool {
        self.low_power_entry(HalCall::Hibernation)
    }
    fn shutdown_now(&self) {
        self.calls.lock().unwrap().push(HalCall::ShutdownNow);
    }
}

// ── Component handler recorder ────────────────────────────────

pub struct RecordingComponents {
    pub applied: Mutex<Vec<String>>,
    last: Mutex<Option<Policy>>,
}

#[allow(dead_code)]
impl RecordingComponents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            last: Mutex::new(None),
        })
    }

    pub fn applied_ids(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

impl ComponentHandlerPort for RecordingComponents {
    fn apply_policy(&self, policy: &Policy) {
        self.applied.lock().unwrap().push(policy.id.clone());
        *self.last.lock().unwrap() = Some(policy.clone());
    }
    fn accumulated_policy(&self) -> Policy {
        self.last.lock().unwrap().clone().unwrap_or(Policy {
            id: "accumulated".into(),
            enabled: Vec::new(),
            disabled: Vec::new(),
        })
    }
    fn is_component_affected(&self, filter: &ComponentFilter) -> bool {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.affects(filter))
    }
}

// ── Aux / session recorders ───────────────────────────────────

pub struct RecordingAux {
    pub disables: AtomicU32,
    pub restores: AtomicU32,
}

#[allow(dead_code)]
impl RecordingAux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            disables: AtomicU32::new(0),
            restores: AtomicU32::new(0),
        })
    }
}

impl AuxHardwarePort for RecordingAux {
    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
    }
    fn restore(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingSession {
    pub suspends: AtomicU32,
    pub resumes: AtomicU32,
}

#[allow(dead_code)]
impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            suspends: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
        })
    }
}

impl SessionPort for RecordingSession {
    fn on_suspend_entry(&self) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }
    fn on_resume_entry(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Event sink recorder ───────────────────────────────────────

pub struct RecordingSink {
    pub events: Mutex<Vec<PowerEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<PowerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PowerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Test listener ─────────────────────────────────────────────

/// Listener that records every broadcast it receives; the test decides
/// when (and whether) to acknowledge.
pub struct TestListener {
    id: ListenerId,
    pub received: Mutex<Vec<ListenerPhase>>,
}

#[allow(dead_code)]
impl TestListener {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ListenerId(id),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn listener_id(&self) -> ListenerId {
        self.id
    }

    pub fn received(&self) -> Vec<ListenerPhase> {
        self.received.lock().unwrap().clone()
    }

    pub fn saw(&self, phase: ListenerPhase) -> bool {
        self.received().contains(&phase)
    }
}

impl PhaseListener for TestListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on_phase_change(&self, phase: ListenerPhase) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(phase);
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub service: PowerService,
    pub hal: Arc<RecordingHal>,
    pub components: Arc<RecordingComponents>,
    pub aux: Arc<RecordingAux>,
    pub session: Arc<RecordingSession>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemStore>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: PowerConfig) -> Self {
        Self::with_hal(config, RecordingHal::new())
    }

    pub fn with_hal(config: PowerConfig, hal: Arc<RecordingHal>) -> Self {
        let components = RecordingComponents::new();
        let aux = RecordingAux::new();
        let session = RecordingSession::new();
        let sink = RecordingSink::new();
        let store = Arc::new(MemStore::new());
        let ports = CorePorts {
            hardware: hal.clone(),
            components: components.clone(),
            aux: aux.clone(),
            session: session.clone(),
            store: store.clone(),
            sink: sink.clone(),
        };
        Self {
            service: PowerService::new(config, ports),
            hal,
            components,
            aux,
            session,
            sink,
            store,
        }
    }

    /// Start the dispatcher and wait for the boot hand-off to land.
    pub fn start(&mut self) {
        self.service.start();
        assert!(
            self.wait_for_phase(Phase::WaitForHal, Duration::from_secs(2)),
            "boot hand-off never landed"
        );
    }

    pub fn wait_for_phase(&self, phase: Phase, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.service.current_phase() == Some(phase))
    }

    pub fn wait_until(&self, timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }
}
