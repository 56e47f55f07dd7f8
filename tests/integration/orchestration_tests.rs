//! End-to-end orchestration tests: boot, shutdown preparation rounds,
//! suspend, resume, and the debug suspend injection — all against the
//! recording mock ports.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use vpmd::config::PowerConfig;
use vpmd::machine::context::AuxState;
use vpmd::machine::{ListenerPhase, Phase, ShutdownKind};
use vpmd::policy::POLICY_ALL_ON;
use vpmd::request::PendingRequest;

use crate::mock_ports::{HalCall, Harness, RecordingHal, TestListener};

// ── Helpers ───────────────────────────────────────────────────

fn fast_config() -> PowerConfig {
    PowerConfig {
        pre_shutdown_prepare_timeout_ms: 400,
        shutdown_prepare_timeout_ms: 400,
        wait_for_finish_timeout_ms: 400,
        postpone_interval_ms: 60,
        postpone_extend_ms: 1000,
        suspend_initial_backoff_ms: 5,
        suspend_max_backoff_ms: 20,
        suspend_max_total_wait_ms: 60,
        ..PowerConfig::default()
    }
}

fn running(h: &mut Harness) {
    h.start();
    h.service.request_phase_change(PendingRequest {
        phase: Phase::Running,
        listener_phase: ListenerPhase::On,
        can_postpone: false,
        kind: ShutdownKind::Undefined,
    });
    assert!(
        h.wait_for_phase(Phase::Running, Duration::from_secs(2)),
        "never reached Running"
    );
}

fn request_shutdown(h: &Harness, kind: ShutdownKind) {
    h.service.request_phase_change(PendingRequest {
        phase: Phase::ShutdownPrepare,
        listener_phase: ListenerPhase::PreShutdownPrepare,
        can_postpone: true,
        kind,
    });
}

// ── The full scenario ─────────────────────────────────────────

#[test]
fn end_to_end_deep_sleep_cycle_with_two_listeners() {
    let mut h = Harness::new(PowerConfig::default());
    let a = TestListener::new(1);
    let b = TestListener::new(2);
    h.service.register_completion_listener(a.clone());
    h.service.register_completion_listener(b.clone());

    running(&mut h);
    assert!(h
        .components
        .applied_ids()
        .contains(&POLICY_ALL_ON.to_string()));

    request_shutdown(&h, ShutdownKind::DeepSleep);

    // Pre-shutdown preparation: both listeners must acknowledge.
    assert!(h.wait_until(Duration::from_secs(2), || {
        a.saw(ListenerPhase::PreShutdownPrepare) && b.saw(ListenerPhase::PreShutdownPrepare)
    }));
    h.service
        .acknowledge(ListenerPhase::PreShutdownPrepare, a.listener_id());
    h.service
        .acknowledge(ListenerPhase::PreShutdownPrepare, b.listener_id());

    // Core preparation round.
    assert!(h.wait_until(Duration::from_secs(2), || {
        a.saw(ListenerPhase::ShutdownPrepare) && b.saw(ListenerPhase::ShutdownPrepare)
    }));
    h.service
        .acknowledge(ListenerPhase::ShutdownPrepare, a.listener_id());
    h.service
        .acknowledge(ListenerPhase::ShutdownPrepare, b.listener_id());

    // Final round before committing.
    assert!(h.wait_until(Duration::from_secs(2), || {
        a.saw(ListenerPhase::SuspendEnter) && b.saw(ListenerPhase::SuspendEnter)
    }));
    h.service
        .acknowledge(ListenerPhase::SuspendEnter, a.listener_id());
    h.service
        .acknowledge(ListenerPhase::SuspendEnter, b.listener_id());

    // Suspend, resume, and back to the HAL boundary.
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(5)));
    let calls = h.hal.calls();
    assert!(calls.contains(&HalCall::ShutdownPrepare));
    assert!(calls.contains(&HalCall::EnterSuspend(0)));
    assert!(calls.contains(&HalCall::DeepSleep));
    assert!(calls.contains(&HalCall::ResumeFromSuspend));
    assert!(!calls.contains(&HalCall::ShutdownNow));

    // Both listeners heard the resume broadcast too.
    assert!(a.saw(ListenerPhase::ResumeFromSuspend));
    assert!(b.saw(ListenerPhase::ResumeFromSuspend));
}

// ── Round timing behaviour ────────────────────────────────────

#[test]
fn zero_listeners_complete_without_waiting_for_timeouts() {
    // Default 5s round timeouts: if completion waited on them, the full
    // chain could not finish inside two seconds.
    let mut h = Harness::new(PowerConfig::default());
    running(&mut h);

    let started = Instant::now();
    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(2)));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "rounds with no completion listeners must complete immediately"
    );
}

#[test]
fn silent_listener_gates_each_round_on_its_timeout() {
    let mut h = Harness::new(fast_config());
    let mute = TestListener::new(9);
    h.service.register_completion_listener(mute.clone());
    running(&mut h);

    let started = Instant::now();
    request_shutdown(&h, ShutdownKind::DeepSleep);

    // The core-preparation broadcast only goes out once the
    // pre-preparation round has hit its 400ms deadline.
    assert!(h.wait_until(Duration::from_secs(3), || {
        mute.saw(ListenerPhase::ShutdownPrepare)
    }));
    let pre_elapsed = started.elapsed();
    assert!(
        pre_elapsed >= Duration::from_millis(380),
        "core prepare arrived before the pre-round deadline: {pre_elapsed:?}"
    );

    // All three rounds time out; the cycle still reaches resume.
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(5)));
    let total = started.elapsed();
    assert!(
        total >= Duration::from_millis(1100),
        "three 400ms rounds cannot finish in {total:?}"
    );
}

#[test]
fn postpone_signals_flow_while_listeners_work() {
    let mut h = Harness::new(fast_config());
    let mute = TestListener::new(3);
    h.service.register_completion_listener(mute.clone());
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_until(Duration::from_secs(3), || {
        mute.saw(ListenerPhase::ShutdownPrepare)
    }));

    // 400ms round with a 60ms postpone cadence: several signals, each
    // carrying the configured extension.
    assert!(
        h.hal.postpone_count() >= 2,
        "expected repeated postpone signals, got {}",
        h.hal.postpone_count()
    );
    assert!(h.hal.calls().contains(&HalCall::Postpone(1000)));
}

#[test]
fn stale_acknowledgement_does_not_advance_the_round() {
    let config = PowerConfig {
        pre_shutdown_prepare_timeout_ms: 2000,
        ..fast_config()
    };
    let mut h = Harness::new(config);
    let l = TestListener::new(5);
    h.service.register_completion_listener(l.clone());
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_until(Duration::from_secs(2), || {
        l.saw(ListenerPhase::PreShutdownPrepare)
    }));

    // Wrong round: the open round is PreShutdownPrepare.
    h.service
        .acknowledge(ListenerPhase::ShutdownPrepare, l.listener_id());
    std::thread::sleep(Duration::from_millis(150));
    assert!(
        !l.saw(ListenerPhase::ShutdownPrepare),
        "stale acknowledgement must not complete the round"
    );

    // The genuine acknowledgement advances immediately.
    h.service
        .acknowledge(ListenerPhase::PreShutdownPrepare, l.listener_id());
    assert!(h.wait_until(Duration::from_secs(2), || {
        l.saw(ListenerPhase::ShutdownPrepare)
    }));
}

#[test]
fn dead_listener_is_auto_acknowledged() {
    let mut h = Harness::new(PowerConfig::default());
    let alive = TestListener::new(1);
    let doomed = TestListener::new(2);
    h.service.register_completion_listener(alive.clone());
    h.service.register_completion_listener(doomed.clone());
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_until(Duration::from_secs(2), || {
        alive.saw(ListenerPhase::PreShutdownPrepare)
            && doomed.saw(ListenerPhase::PreShutdownPrepare)
    }));

    h.service
        .acknowledge(ListenerPhase::PreShutdownPrepare, alive.listener_id());
    // The transport reports the second listener dead; its token clears
    // without an acknowledgement and the round completes well before the
    // 5s deadline.
    h.service.notify_dead(doomed.listener_id());

    assert!(h.wait_until(Duration::from_secs(2), || {
        alive.saw(ListenerPhase::ShutdownPrepare)
    }));
    // The dead listener was pruned from later broadcasts.
    assert!(!doomed.saw(ListenerPhase::ShutdownPrepare));
}

// ── Suspend retry behaviour through the full stack ────────────

#[test]
fn transient_suspend_failure_retries_to_success() {
    let hal = RecordingHal::with_suspend_behaviour(3);
    let mut h = Harness::with_hal(fast_config(), hal);
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(5)));

    assert_eq!(h.hal.count(&HalCall::DeepSleep), 3);
    assert_eq!(h.hal.count(&HalCall::ShutdownNow), 0);
    assert!(h.hal.calls().contains(&HalCall::ResumeFromSuspend));
}

#[test]
fn persistent_suspend_failure_escalates_to_shutdown() {
    let hal = RecordingHal::with_suspend_behaviour(0);
    let mut h = Harness::with_hal(fast_config(), hal);
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_until(Duration::from_secs(5), || {
        h.hal.count(&HalCall::ShutdownNow) > 0
    }));

    assert_eq!(h.hal.count(&HalCall::ShutdownNow), 1);
    assert!(h.hal.count(&HalCall::DeepSleep) >= 2);
    assert!(!h.hal.calls().contains(&HalCall::ResumeFromSuspend));
}

#[test]
fn hibernate_cycle_reports_hibernate_operations() {
    let config = PowerConfig {
        hibernation_supported: true,
        ..fast_config()
    };
    let mut h = Harness::new(config);
    running(&mut h);

    request_shutdown(&h, ShutdownKind::Hibernate);
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(5)));

    let calls = h.hal.calls();
    assert!(calls.contains(&HalCall::EnterHibernate(0)));
    assert!(calls.contains(&HalCall::Hibernation));
    assert!(calls.contains(&HalCall::ResumeFromHibernate));
    assert!(!calls.contains(&HalCall::DeepSleep));
}

// ── Aux hardware persistence ──────────────────────────────────

#[test]
fn suspend_cycle_disables_and_restores_aux_hardware() {
    let mut h = Harness::new(fast_config());
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(5)));

    assert_eq!(h.aux.disables.load(Ordering::SeqCst), 1);
    assert_eq!(h.aux.restores.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.suspends.load(Ordering::SeqCst), 1);
    // The persisted marker was cleared after restore.
    assert_eq!(
        AuxState::load(h.store.as_ref()).unwrap(),
        Some(AuxState { disabled: false })
    );
}

#[test]
fn interrupted_suspend_state_is_repaired_at_startup() {
    let mut h = Harness::new(PowerConfig::default());
    AuxState { disabled: true }.save(h.store.as_ref()).unwrap();

    h.start();
    assert!(h.wait_until(Duration::from_secs(1), || {
        h.aux.restores.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(
        AuxState::load(h.store.as_ref()).unwrap(),
        Some(AuxState { disabled: false })
    );
}

// ── Simulated suspend injection ───────────────────────────────

#[test]
fn simulated_suspend_never_touches_low_power_ports() {
    let mut h = Harness::new(PowerConfig::default());
    running(&mut h);

    h.service
        .simulate_suspend(ShutdownKind::DeepSleep, false, true, 0);
    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(2)));

    let calls = h.hal.calls();
    assert!(!calls.contains(&HalCall::DeepSleep));
    assert!(!calls.contains(&HalCall::EnterSuspend(0)));
    assert!(calls.contains(&HalCall::ResumeFromSuspend));
}

#[test]
fn simulated_suspend_with_reboot_requests_shutdown() {
    let mut h = Harness::new(PowerConfig::default());
    running(&mut h);

    h.service
        .simulate_suspend(ShutdownKind::DeepSleep, true, true, 0);
    assert!(h.wait_until(Duration::from_secs(2), || {
        h.hal.count(&HalCall::ShutdownNow) == 1
    }));
    assert_eq!(h.service.current_phase(), Some(Phase::SimulatedSleep));
}

#[test]
fn simulated_hibernation_with_preparation_round() {
    let mut h = Harness::new(PowerConfig::default());
    let l = TestListener::new(4);
    h.service.register_completion_listener(l.clone());
    running(&mut h);

    h.service
        .simulate_suspend(ShutdownKind::Hibernate, false, false, 0);
    assert!(h.wait_until(Duration::from_secs(2), || {
        l.saw(ListenerPhase::ShutdownPrepare)
    }));
    h.service
        .acknowledge(ListenerPhase::ShutdownPrepare, l.listener_id());

    assert!(h.wait_until(Duration::from_secs(2), || {
        l.saw(ListenerPhase::HibernateEnter)
    }));
    h.service
        .acknowledge(ListenerPhase::HibernateEnter, l.listener_id());

    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(2)));
    assert!(l.saw(ListenerPhase::ResumeFromHibernate));
    assert!(!h.hal.calls().contains(&HalCall::Hibernation));
}

// ── Illegal / racing requests ─────────────────────────────────

#[test]
fn illegal_request_leaves_phase_unchanged() {
    let mut h = Harness::new(PowerConfig::default());
    running(&mut h);

    h.service.request_phase_change(PendingRequest {
        phase: Phase::Suspending,
        listener_phase: ListenerPhase::SuspendEnter,
        can_postpone: false,
        kind: ShutdownKind::DeepSleep,
    });
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.service.current_phase(), Some(Phase::Running));
    assert!(!h.hal.calls().contains(&HalCall::DeepSleep));
}

#[test]
fn shutdown_cancel_mid_preparation_returns_to_wait_for_hal() {
    let mut h = Harness::new(PowerConfig::default());
    let mute = TestListener::new(8);
    h.service.register_completion_listener(mute.clone());
    running(&mut h);

    request_shutdown(&h, ShutdownKind::DeepSleep);
    assert!(h.wait_until(Duration::from_secs(2), || {
        mute.saw(ListenerPhase::PreShutdownPrepare)
    }));

    // Platform withdraws the shutdown while listeners are still working.
    h.service.request_phase_change(PendingRequest {
        phase: Phase::WaitForHal,
        listener_phase: ListenerPhase::ShutdownCancelled,
        can_postpone: false,
        kind: ShutdownKind::Undefined,
    });

    assert!(h.wait_for_phase(Phase::WaitForHal, Duration::from_secs(2)));
    assert!(h.hal.calls().contains(&HalCall::ShutdownCancel));
    // The abandoned round never advanced to core preparation.
    assert!(!mute.saw(ListenerPhase::ShutdownPrepare));
}
