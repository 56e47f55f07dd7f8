//! VPMD — Vehicle Power Management Daemon entry point.
//!
//! Hexagonal wiring: the orchestration core only ever sees port traits;
//! this binary plugs in the simulated platform adapters and runs the
//! dispatcher until shutdown.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                   │
//! │                                                            │
//! │  SimHardware   SimComponents   SimAux/SimSession           │
//! │  (HardwarePort)(ComponentPort) (AuxHardware/SessionPort)   │
//! │  MemStore      LogEventSink                                │
//! │  (StorePort)   (EventSink)                                 │
//! │                                                            │
//! │  ────────────── Port Trait Boundary ──────────────────     │
//! │                                                            │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │          PowerService (pure orchestration)           │  │
//! │  │  PhaseMachine · CompletionWaiter · PolicyCoordinator │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Result};
use log::{info, warn};

use vpmd::adapters::log_sink::LogEventSink;
use vpmd::adapters::memstore::MemStore;
use vpmd::adapters::sim::{SimAux, SimComponents, SimHardware, SimSession};
use vpmd::app::ports::CorePorts;
use vpmd::app::service::PowerService;
use vpmd::config::PowerConfig;
use vpmd::machine::{ListenerPhase, Phase, ShutdownKind};
use vpmd::request::PendingRequest;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  VPMD v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────
    let config = load_config();

    // ── 2. Hardware transport binding (bounded retry) ─────────
    let hardware = Arc::new(SimHardware::new());
    let mut bound = false;
    for attempt in 1..=config.hal_bind_retries {
        if hardware.bind() {
            bound = true;
            break;
        }
        warn!(
            "hardware transport not ready (attempt {attempt}/{})",
            config.hal_bind_retries
        );
        thread::sleep(Duration::from_millis(config.hal_bind_interval_ms));
    }
    ensure!(bound, "hardware transport failed to bind");

    // ── 3. Wire adapters and start the service ────────────────
    let ports = CorePorts {
        hardware,
        components: Arc::new(SimComponents::new()),
        aux: Arc::new(SimAux::new()),
        session: Arc::new(SimSession),
        store: Arc::new(MemStore::new()),
        sink: Arc::new(LogEventSink::new()),
    };
    let mut service = PowerService::new(config, ports);
    service.start();

    // ── 4. Boot to Running once the HAL hand-off lands ────────
    while service.current_phase() != Some(Phase::WaitForHal) {
        thread::sleep(Duration::from_millis(10));
    }
    service.request_phase_change(PendingRequest {
        phase: Phase::Running,
        listener_phase: ListenerPhase::On,
        can_postpone: false,
        kind: ShutdownKind::Undefined,
    });

    info!("system ready — dispatching");
    service.wait();
    Ok(())
}

/// Load configuration from the path given as the first argument, falling
/// back to defaults when absent or unparseable.
fn load_config() -> PowerConfig {
    let Some(path) = std::env::args().nth(1) else {
        info!("no config path given, using defaults");
        return PowerConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => {
                info!("config loaded from {path}");
                config
            }
            Err(e) => {
                warn!("config parse failed ({e}), using defaults");
                PowerConfig::default()
            }
        },
        Err(e) => {
            warn!("config read failed ({e}), using defaults");
            PowerConfig::default()
        }
    }
}
