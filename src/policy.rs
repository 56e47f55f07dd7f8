//! Power policies — named sets of enabled/disabled platform components.
//!
//! A [`Policy`] partitions a subset of the known [`Component`]s into an
//! enabled set and a disabled set; components it does not mention are left
//! untouched by application.  Policies are immutable once registered.
//! A policy *group* maps lifecycle phases to the default policy applied on
//! entry to that phase.
//!
//! The [`PolicyStore`] is pure data + lookup.  Concurrency is the owner's
//! problem: the coordinator keeps the store behind its own mutex.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PolicyError;
use crate::machine::Phase;

// ───────────────────────────────────────────────────────────────
// Built-in system policy ids
// ───────────────────────────────────────────────────────────────

/// Default applied on entry to `WaitForHal` when no group overrides it.
pub const POLICY_INITIAL_ON: &str = "system.initial_on";
/// Default applied on entry to `Running` when no group overrides it.
pub const POLICY_ALL_ON: &str = "system.all_on";
/// Preemptive policy forced during shutdown preparation.
pub const POLICY_NO_USER_INTERACTION: &str = "system.no_user_interaction";
/// Preemptive policy forced while entering a low-power mode.
pub const POLICY_SUSPEND_PREP: &str = "system.suspend_prep";

// ───────────────────────────────────────────────────────────────
// Components
// ───────────────────────────────────────────────────────────────

/// The closed set of platform components a policy can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Audio,
    Media,
    Display,
    Bluetooth,
    Wifi,
    Cellular,
    Ethernet,
    Projection,
    Nfc,
    Input,
    Location,
    Microphone,
    Cpu,
}

impl Component {
    /// Every known component, in declaration order.
    pub const ALL: [Component; 13] = [
        Component::Audio,
        Component::Media,
        Component::Display,
        Component::Bluetooth,
        Component::Wifi,
        Component::Cellular,
        Component::Ethernet,
        Component::Projection,
        Component::Nfc,
        Component::Input,
        Component::Location,
        Component::Microphone,
        Component::Cpu,
    ];

    /// Parse a component from its canonical lower-case name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "audio" => Some(Self::Audio),
            "media" => Some(Self::Media),
            "display" => Some(Self::Display),
            "bluetooth" => Some(Self::Bluetooth),
            "wifi" => Some(Self::Wifi),
            "cellular" => Some(Self::Cellular),
            "ethernet" => Some(Self::Ethernet),
            "projection" => Some(Self::Projection),
            "nfc" => Some(Self::Nfc),
            "input" => Some(Self::Input),
            "location" => Some(Self::Location),
            "microphone" => Some(Self::Microphone),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }

    /// Canonical lower-case name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Media => "media",
            Self::Display => "display",
            Self::Bluetooth => "bluetooth",
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Projection => "projection",
            Self::Nfc => "nfc",
            Self::Input => "input",
            Self::Location => "location",
            Self::Microphone => "microphone",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-listener interest filter: the listener only cares about policy
/// changes that touch one of these components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentFilter {
    pub components: Vec<Component>,
}

impl ComponentFilter {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn watches(&self, component: Component) -> bool {
        self.components.contains(&component)
    }
}

// ───────────────────────────────────────────────────────────────
// Policy
// ───────────────────────────────────────────────────────────────

/// An immutable enabled/disabled component partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub id: String,
    pub enabled: Vec<Component>,
    pub disabled: Vec<Component>,
}

impl Policy {
    /// Whether this policy explicitly mentions `component`, and with which
    /// state.  `None` means the component is left untouched.
    pub fn state_of(&self, component: Component) -> Option<bool> {
        if self.enabled.contains(&component) {
            Some(true)
        } else if self.disabled.contains(&component) {
            Some(false)
        } else {
            None
        }
    }

    /// Whether applying this policy touches any component in `filter`.
    pub fn affects(&self, filter: &ComponentFilter) -> bool {
        self.enabled
            .iter()
            .chain(self.disabled.iter())
            .any(|c| filter.watches(*c))
    }
}

// ───────────────────────────────────────────────────────────────
// PolicyStore
// ───────────────────────────────────────────────────────────────

/// Registry of named policies and phase→policy default groups.
pub struct PolicyStore {
    policies: HashMap<String, Arc<Policy>>,
    groups: HashMap<String, HashMap<Phase, String>>,
}

impl PolicyStore {
    /// An empty store with the built-in system policies pre-registered.
    pub fn with_system_policies() -> Self {
        let mut store = Self {
            policies: HashMap::new(),
            groups: HashMap::new(),
        };

        let all: Vec<Component> = Component::ALL.to_vec();
        let initial_on = vec![Component::Audio, Component::Display, Component::Cpu];
        let initial_off: Vec<Component> = Component::ALL
            .iter()
            .copied()
            .filter(|c| !initial_on.contains(c))
            .collect();

        store.insert_system(POLICY_INITIAL_ON, initial_on, initial_off);
        store.insert_system(POLICY_ALL_ON, all, Vec::new());
        store.insert_system(
            POLICY_NO_USER_INTERACTION,
            Vec::new(),
            vec![
                Component::Audio,
                Component::Media,
                Component::Display,
                Component::Bluetooth,
                Component::Projection,
                Component::Nfc,
                Component::Input,
                Component::Location,
                Component::Microphone,
            ],
        );
        store.insert_system(
            POLICY_SUSPEND_PREP,
            Vec::new(),
            vec![
                Component::Audio,
                Component::Bluetooth,
                Component::Wifi,
                Component::Nfc,
                Component::Location,
                Component::Microphone,
            ],
        );
        store
    }

    fn insert_system(&mut self, id: &str, enabled: Vec<Component>, disabled: Vec<Component>) {
        let policy = Policy {
            id: id.to_string(),
            enabled,
            disabled,
        };
        self.policies.insert(id.to_string(), Arc::new(policy));
    }

    /// Register a new policy from component names.
    ///
    /// Fails if the id is taken, any name is unrecognised, or a component
    /// appears in both sets.  Policies are immutable once registered —
    /// re-registering the same id is rejected rather than replacing.
    pub fn register(
        &mut self,
        id: &str,
        enabled: &[&str],
        disabled: &[&str],
    ) -> Result<(), PolicyError> {
        if self.policies.contains_key(id) {
            return Err(PolicyError::AlreadyExists);
        }

        let parse = |names: &[&str]| -> Result<Vec<Component>, PolicyError> {
            names
                .iter()
                .map(|n| Component::parse(n).ok_or(PolicyError::UnknownComponent))
                .collect()
        };
        let enabled = parse(enabled)?;
        let disabled = parse(disabled)?;

        if enabled.iter().any(|c| disabled.contains(c)) {
            return Err(PolicyError::ConflictingComponent);
        }

        let policy = Policy {
            id: id.to_string(),
            enabled,
            disabled,
        };
        self.policies.insert(id.to_string(), Arc::new(policy));
        Ok(())
    }

    /// Look up a policy by id.
    pub fn get(&self, id: &str) -> Result<Arc<Policy>, PolicyError> {
        self.policies.get(id).cloned().ok_or(PolicyError::NotFound)
    }

    /// Register a phase→policy default group.
    ///
    /// Only `WaitForHal` and `Running` take default policies; every policy
    /// id referenced must already be registered.
    pub fn register_group(
        &mut self,
        group_id: &str,
        entries: &[(Phase, &str)],
    ) -> Result<(), PolicyError> {
        if self.groups.contains_key(group_id) {
            return Err(PolicyError::AlreadyExists);
        }
        let mut mapping = HashMap::new();
        for (phase, policy_id) in entries {
            if !matches!(phase, Phase::WaitForHal | Phase::Running) {
                return Err(PolicyError::InvalidGroupPhase);
            }
            if !self.policies.contains_key(*policy_id) {
                return Err(PolicyError::NotFound);
            }
            mapping.insert(*phase, (*policy_id).to_string());
        }
        self.groups.insert(group_id.to_string(), mapping);
        Ok(())
    }

    /// Whether a group with this id exists.
    pub fn has_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// The default policy a group assigns to `phase`, if any.
    pub fn default_for(&self, group_id: &str, phase: Phase) -> Option<Arc<Policy>> {
        let id = self.groups.get(group_id)?.get(&phase)?;
        self.policies.get(id).cloned()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
