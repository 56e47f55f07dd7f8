//! Per-phase handler implementations.
//!
//! Exactly one handler runs per accepted request, on the dispatcher
//! thread.  Handlers apply policy side effects first, then broadcast to
//! listeners, then either report to the hardware port directly or open a
//! completion round whose callback queues the next advance.  The handlers
//! never block on listeners — that is the completion worker's job — with
//! one deliberate exception: the suspend retry loop in `Suspending`, where
//! no other queued work may proceed anyway.

use std::time::Duration;

use log::{info, warn};

use crate::app::events::PowerEvent;
use crate::completion::CompletionWaiter;
use crate::listeners::ListenerId;
use crate::machine::context::{AuxState, SimulateOptions};
use crate::machine::{resolve_kind, ListenerPhase, Phase, PowerMachine, ShutdownKind};
use crate::policy::{POLICY_NO_USER_INTERACTION, POLICY_SUSPEND_PREP};
use crate::request::PendingRequest;

const COORD_POISON: &str = "policy coordinator mutex poisoned";
const REGISTRY_POISON: &str = "listener registry mutex poisoned";

type CompleteFn = Box<dyn FnOnce(bool) + Send>;
type IntervalFn = Box<dyn FnMut() + Send>;

impl PowerMachine {
    /// Route to the handler for the freshly-entered phase.
    pub(super) fn enter_phase(&mut self, req: PendingRequest) {
        match req.phase {
            Phase::WaitForHal => self.enter_wait_for_hal(req),
            Phase::Running => self.enter_running(),
            Phase::ShutdownPrepare => self.enter_shutdown_prepare(req),
            Phase::WaitForFinish => self.enter_wait_for_finish(req),
            Phase::Suspending => self.enter_suspending(req),
            Phase::SimulatedSleep | Phase::SimulatedHibernation => self.enter_simulated(req),
        }
    }

    // ── WaitForHal ────────────────────────────────────────────

    /// Idle at the HAL boundary: restore the baseline policy, tell the
    /// listeners, and acknowledge to the platform.  The acknowledgement
    /// depends on the *requested listener phase* — a cancelled shutdown, a
    /// resume from RAM and a resume from disk each report differently.
    fn enter_wait_for_hal(&mut self, req: PendingRequest) {
        self.flags.clear_simulation();
        self.ctx.terminal_action = ShutdownKind::Undefined;
        {
            let mut coord = self.coordinator.lock().expect(COORD_POISON);
            coord.apply_default_for(Phase::WaitForHal);
            if self.flags.forced_silent() {
                info!("silent mode active — keeping preemptive policy in place");
            } else {
                coord.cancel_preemptive();
            }
        }

        self.broadcast(req.listener_phase);

        match req.listener_phase {
            ListenerPhase::ShutdownCancelled => self.ports.hardware.send_shutdown_cancel(),
            ListenerPhase::ResumeFromSuspend => self.ports.hardware.send_resume_from_suspend(),
            ListenerPhase::ResumeFromHibernate => {
                self.ports.hardware.send_resume_from_hibernate();
            }
            _ => self.ports.hardware.send_wait_for_hal(),
        }
    }

    // ── Running ───────────────────────────────────────────────

    fn enter_running(&mut self) {
        if let Some(reset) = self.flags.take_factory_reset() {
            warn!("deferred factory reset pending — executing, phase processing stops");
            reset();
            return;
        }

        self.coordinator
            .lock()
            .expect(COORD_POISON)
            .apply_default_for(Phase::Running);
        self.broadcast(ListenerPhase::On);

        if self.ctx.booting {
            self.ctx.booting = false;
            info!("first Running entry after boot — session resume suppressed");
        } else {
            self.ports.session.on_resume_entry();
        }
    }

    // ── ShutdownPrepare (two sub-phases) ──────────────────────

    fn enter_shutdown_prepare(&mut self, req: PendingRequest) {
        if req.listener_phase == ListenerPhase::PreShutdownPrepare {
            self.pre_shutdown_prepare(req);
        } else {
            self.core_shutdown_prepare(req);
        }
    }

    /// Sub-phase one: listeners may request more time.  While they work, a
    /// periodic postpone signal keeps the platform's deadline at bay.
    fn pre_shutdown_prepare(&mut self, req: PendingRequest) {
        let queue = self.queue.clone();
        let kind = req.kind;
        let hardware = self.ports.hardware.clone();
        let extend = self.ctx.config.postpone_extend_ms;
        let interval = Duration::from_millis(self.ctx.config.postpone_interval_ms);

        self.start_round(
            ListenerPhase::PreShutdownPrepare,
            self.ctx.config.pre_shutdown_prepare_timeout_ms,
            Some((
                interval,
                Box::new(move || hardware.send_postpone_shutdown(extend)) as IntervalFn,
            )),
            Box::new(move |_timed_out| {
                queue.push(PendingRequest::immediate(
                    Phase::ShutdownPrepare,
                    ListenerPhase::ShutdownPrepare,
                    kind,
                ));
            }),
        );
    }

    /// Sub-phase two: resolve the terminal action, lock out user
    /// interaction, and run the final preparation round.
    fn core_shutdown_prepare(&mut self, req: PendingRequest) {
        let mut action = if self.flags.shutdown_on_next_suspend() {
            info!("shutdown-on-next-suspend override active");
            ShutdownKind::PowerOff
        } else {
            resolve_kind(req.kind, self.ctx.terminal_action)
        };
        if action == ShutdownKind::DeepSleep && !self.ctx.config.deep_sleep_supported {
            warn!("platform cannot suspend to RAM — downgrading to full shutdown");
            action = ShutdownKind::PowerOff;
        }
        if action == ShutdownKind::Hibernate && !self.ctx.config.hibernation_supported {
            warn!("platform cannot hibernate — downgrading to full shutdown");
            action = ShutdownKind::PowerOff;
        }
        self.ctx.terminal_action = action;

        if let Err(e) = self
            .coordinator
            .lock()
            .expect(COORD_POISON)
            .apply_preemptive(POLICY_NO_USER_INTERACTION)
        {
            warn!("no-user-interaction policy failed: {e}");
        }
        self.ports.hardware.send_shutdown_prepare();

        let queue = self.queue.clone();
        let enter_phase = match action {
            ShutdownKind::DeepSleep => ListenerPhase::SuspendEnter,
            ShutdownKind::Hibernate => ListenerPhase::HibernateEnter,
            _ => ListenerPhase::ShutdownEnter,
        };
        self.start_round(
            ListenerPhase::ShutdownPrepare,
            self.ctx.config.shutdown_prepare_timeout_ms,
            None,
            Box::new(move |_timed_out| {
                queue.push(PendingRequest::immediate(
                    Phase::WaitForFinish,
                    enter_phase,
                    action,
                ));
            }),
        );
    }

    // ── WaitForFinish ─────────────────────────────────────────

    /// The penultimate broadcast.  On completion the terminal action is
    /// reported to the platform with the scheduled wake delay, and the
    /// machine commits to `Suspending`.
    fn enter_wait_for_finish(&mut self, req: PendingRequest) {
        let action = resolve_kind(req.kind, self.ctx.terminal_action);
        let wake = self.ctx.config.wake_after_secs;
        if wake > 0 {
            self.ctx.scheduled_wake = Some(wake);
        }

        let hardware = self.ports.hardware.clone();
        let queue = self.queue.clone();
        let listener_phase = req.listener_phase;
        self.start_round(
            listener_phase,
            self.ctx.config.wait_for_finish_timeout_ms,
            None,
            Box::new(move |_timed_out| {
                match action {
                    ShutdownKind::DeepSleep => hardware.send_enter_suspend(wake),
                    ShutdownKind::Hibernate => hardware.send_enter_hibernate(wake),
                    _ => hardware.send_shutdown_start(wake),
                }
                queue.push(PendingRequest::immediate(
                    Phase::Suspending,
                    listener_phase,
                    action,
                ));
            }),
        );
    }

    // ── Suspending ────────────────────────────────────────────

    /// Commit: lock the suspend-preparation policy, quiesce auxiliary
    /// hardware, then either enter the low-power mode (with retry) or shut
    /// down outright.  A successful suspend returns here on resume, so the
    /// tail of this handler is the wake-up path.
    fn enter_suspending(&mut self, req: PendingRequest) {
        if let Err(e) = self
            .coordinator
            .lock()
            .expect(COORD_POISON)
            .apply_preemptive(POLICY_SUSPEND_PREP)
        {
            warn!("suspend-preparation policy failed: {e}");
        }
        self.ports.session.on_suspend_entry();

        self.persist_aux(true);
        self.ports.aux.disable();
        self.ctx.aux_disabled = true;

        let action = resolve_kind(req.kind, self.ctx.terminal_action);
        match action {
            ShutdownKind::DeepSleep | ShutdownKind::Hibernate => {
                if self.retrier.attempt_suspend(action) {
                    // Resumed: bring auxiliary hardware back and drop the
                    // wake timer that already served its purpose.
                    self.ports.aux.restore();
                    self.ctx.aux_disabled = false;
                    self.persist_aux(false);
                    if let Some(wake) = self.ctx.scheduled_wake.take() {
                        info!("clearing stale wake timer ({wake}s)");
                        self.ports.sink.emit(&PowerEvent::WakeTimerCleared {
                            wake_after_secs: wake,
                        });
                    }
                    let resume = if action == ShutdownKind::Hibernate {
                        ListenerPhase::ResumeFromHibernate
                    } else {
                        ListenerPhase::ResumeFromSuspend
                    };
                    self.queue.push(PendingRequest::immediate(
                        Phase::WaitForHal,
                        resume,
                        ShutdownKind::Undefined,
                    ));
                } else {
                    warn!("suspend did not complete — escalated or preempted");
                }
            }
            _ => {
                info!("terminal action: full shutdown");
                self.ports.hardware.shutdown_now();
            }
        }
    }

    // ── Simulated phases ──────────────────────────────────────

    /// Synthetic suspend cycle for test/debug injection.  Runs the same
    /// broadcast and completion machinery but never touches the real
    /// low-power port operations.
    fn enter_simulated(&mut self, req: PendingRequest) {
        let opts = self.flags.simulation().unwrap_or(SimulateOptions {
            kind: req.kind,
            reboot_after: false,
            wake_after_secs: 0,
        });

        match req.listener_phase {
            ListenerPhase::PreShutdownPrepare | ListenerPhase::ShutdownPrepare => {
                // Simulated preparation, then advance to the enter stage.
                let queue = self.queue.clone();
                let phase = req.phase;
                let kind = req.kind;
                let enter = if phase == Phase::SimulatedHibernation {
                    ListenerPhase::HibernateEnter
                } else {
                    ListenerPhase::SuspendEnter
                };
                self.start_round(
                    ListenerPhase::ShutdownPrepare,
                    self.ctx.config.shutdown_prepare_timeout_ms,
                    None,
                    Box::new(move |_timed_out| {
                        queue.push(PendingRequest::immediate(phase, enter, kind));
                    }),
                );
            }
            _ => {
                // Enter stage: final round, then reboot or resume.
                let queue = self.queue.clone();
                let hardware = self.ports.hardware.clone();
                let reboot = opts.reboot_after;
                let resume = if req.phase == Phase::SimulatedHibernation {
                    ListenerPhase::ResumeFromHibernate
                } else {
                    ListenerPhase::ResumeFromSuspend
                };
                self.start_round(
                    req.listener_phase,
                    self.ctx.config.wait_for_finish_timeout_ms,
                    None,
                    Box::new(move |_timed_out| {
                        if reboot {
                            info!("simulated cycle complete — rebooting as requested");
                            hardware.shutdown_now();
                        } else {
                            queue.push(PendingRequest::immediate(
                                Phase::WaitForHal,
                                resume,
                                ShutdownKind::Undefined,
                            ));
                        }
                    }),
                );
            }
        }
    }

    // ── Broadcast helpers ─────────────────────────────────────

    /// Fire-and-forget broadcast to every registered listener.
    fn broadcast(&self, phase: ListenerPhase) {
        let snapshot = self
            .registry
            .lock()
            .expect(REGISTRY_POISON)
            .snapshot_for_broadcast();
        for listener in snapshot
            .fire_and_forget
            .iter()
            .chain(snapshot.completion.iter())
        {
            if let Err(e) = listener.on_phase_change(phase) {
                warn!("notify {} of {phase:?} failed: {e}", listener.id());
            }
        }
    }

    /// Open a completion round, broadcast it, and hand it to a fresh
    /// waiter.  The round opens *before* the notification pass so a
    /// listener acknowledging synchronously from its callback is counted.
    /// Completion-required listeners whose notification failed stay in
    /// the pending set — a transport hiccup means "did not acknowledge",
    /// not "skip them".  Timeouts are surfaced as events before the
    /// caller's completion action runs.
    fn start_round(
        &mut self,
        phase: ListenerPhase,
        timeout_ms: u64,
        interval: Option<(Duration, IntervalFn)>,
        on_complete: CompleteFn,
    ) {
        let snapshot = self
            .registry
            .lock()
            .expect(REGISTRY_POISON)
            .snapshot_for_broadcast();
        let pending: Vec<ListenerId> =
            snapshot.completion.iter().map(|l| l.id()).collect();
        let round = self.tracker.open(phase, pending);

        for listener in &snapshot.fire_and_forget {
            if let Err(e) = listener.on_phase_change(phase) {
                warn!("notify {} of {phase:?} failed: {e}", listener.id());
            }
        }
        for listener in &snapshot.completion {
            if let Err(e) = listener.on_phase_change(phase) {
                warn!(
                    "notify {} of {phase:?} failed: {e} — treated as unacknowledged",
                    listener.id()
                );
            }
        }

        let sink = self.ports.sink.clone();
        let wrapped: CompleteFn = Box::new(move |timed_out| {
            if timed_out {
                sink.emit(&PowerEvent::CompletionTimedOut { phase });
            }
            on_complete(timed_out);
        });
        self.waiter = CompletionWaiter::watch(
            self.tracker.clone(),
            round,
            phase,
            Duration::from_millis(timeout_ms),
            interval,
            wrapped,
        );
    }

    fn persist_aux(&self, disabled: bool) {
        let state = AuxState { disabled };
        if let Err(e) = state.save(self.ports.store.as_ref()) {
            warn!("failed to persist aux hardware state: {e}");
        }
    }
}
