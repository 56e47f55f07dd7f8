//! Policy administration through the service facade: registration,
//! groups, and filtered change notification.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vpmd::config::PowerConfig;
use vpmd::listeners::{ListenerId, PhaseListener};
use vpmd::machine::{ListenerPhase, Phase, ShutdownKind};
use vpmd::policy::{Component, ComponentFilter, Policy, POLICY_INITIAL_ON};
use vpmd::request::PendingRequest;
use vpmd::{NotifyError, PolicyError};

use crate::mock_ports::Harness;

#[test]
fn define_then_lookup_roundtrip() {
    let h = Harness::new(PowerConfig::default());

    h.service.define_policy("p1", &["audio"], &["wifi"]).unwrap();
    let p = h.service.policy("p1").unwrap();
    assert_eq!(p.enabled, vec![Component::Audio]);
    assert_eq!(p.disabled, vec![Component::Wifi]);

    assert_eq!(
        h.service.define_policy("p1", &["display"], &[]),
        Err(PolicyError::AlreadyExists)
    );
}

#[test]
fn unknown_component_surfaces_synchronously() {
    let h = Harness::new(PowerConfig::default());
    assert_eq!(
        h.service.define_policy("p1", &["warp-drive"], &[]),
        Err(PolicyError::UnknownComponent)
    );
    assert_eq!(h.service.policy("p1"), Err(PolicyError::NotFound));
}

#[test]
fn apply_policy_by_id_reaches_component_handler() {
    let h = Harness::new(PowerConfig::default());
    h.service.define_policy("mute", &[], &["audio"]).unwrap();

    h.service.apply_policy_by_id("mute").unwrap();
    assert!(h.components.applied_ids().contains(&"mute".to_string()));
    assert_eq!(h.service.current_policy_id().as_deref(), Some("mute"));
}

#[test]
fn policy_group_overrides_running_default() {
    let mut h = Harness::new(PowerConfig::default());
    h.service
        .define_policy("quiet", &[], &["audio", "media"])
        .unwrap();
    h.service
        .define_policy_group("night", &[(Phase::Running, "quiet")])
        .unwrap();
    h.service.set_policy_group("night").unwrap();

    h.start();
    h.service.request_phase_change(PendingRequest {
        phase: Phase::Running,
        listener_phase: ListenerPhase::On,
        can_postpone: false,
        kind: ShutdownKind::Undefined,
    });
    assert!(h.wait_for_phase(Phase::Running, Duration::from_secs(2)));

    let applied = h.components.applied_ids();
    // Boot applied the built-in baseline, Running the group's override.
    assert!(applied.contains(&POLICY_INITIAL_ON.to_string()));
    assert!(applied.contains(&"quiet".to_string()));
}

#[test]
fn selecting_unknown_group_is_rejected() {
    let h = Harness::new(PowerConfig::default());
    assert_eq!(
        h.service.set_policy_group("nope"),
        Err(PolicyError::UnknownGroup)
    );
}

#[test]
fn policy_change_notification_respects_filters() {
    struct Watcher {
        id: ListenerId,
        policy_ids: Mutex<Vec<String>>,
        phase_calls: AtomicUsize,
    }

    impl Watcher {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: ListenerId(id),
                policy_ids: Mutex::new(Vec::new()),
                phase_calls: AtomicUsize::new(0),
            })
        }
    }

    impl PhaseListener for Watcher {
        fn id(&self) -> ListenerId {
            self.id
        }
        fn on_phase_change(&self, _phase: ListenerPhase) -> Result<(), NotifyError> {
            self.phase_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_policy_change(&self, policy: &Policy) -> Result<(), NotifyError> {
            self.policy_ids.lock().unwrap().push(policy.id.clone());
            Ok(())
        }
    }

    let h = Harness::new(PowerConfig::default());
    let audio_watcher = Watcher::new(1);
    let cpu_watcher = Watcher::new(2);
    h.service.register_filtered_listener(
        audio_watcher.clone(),
        ComponentFilter::new(vec![Component::Audio]),
    );
    h.service.register_filtered_listener(
        cpu_watcher.clone(),
        ComponentFilter::new(vec![Component::Cpu]),
    );

    h.service.define_policy("mute", &[], &["audio"]).unwrap();
    h.service.apply_policy_by_id("mute").unwrap();

    assert_eq!(
        audio_watcher.policy_ids.lock().unwrap().clone(),
        vec!["mute".to_string()]
    );
    assert!(cpu_watcher.policy_ids.lock().unwrap().is_empty());
}
