//! Unified error types for the power orchestration service.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! administrative API's error handling uniform.  Dispatcher-internal
//! failures (illegal transitions, listener transport faults, completion
//! timeouts) are deliberately *not* represented here — they are logged and
//! emitted as events, never thrown across the dispatcher boundary.
//! All variants are `Copy` so they can be passed around without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level service error
// ---------------------------------------------------------------------------

/// Every fallible administrative operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A power-policy operation failed.
    Policy(PolicyError),
    /// A listener could not be reached over its transport.
    Notify(NotifyError),
    /// The auxiliary key-value store failed.
    Store(StoreError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(e) => write!(f, "policy: {e}"),
            Self::Notify(e) => write!(f, "notify: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy errors
// ---------------------------------------------------------------------------

/// Errors surfaced synchronously by the policy management entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy with this id is already registered (policies are immutable).
    AlreadyExists,
    /// No policy is registered under the requested id.
    NotFound,
    /// A component name in the enabled/disabled set is not recognised.
    UnknownComponent,
    /// A component appears in both the enabled and the disabled set.
    ConflictingComponent,
    /// No policy group is registered under the requested id.
    UnknownGroup,
    /// A policy group maps a phase that takes no default policy.
    InvalidGroupPhase,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "policy id already exists"),
            Self::NotFound => write!(f, "policy not found"),
            Self::UnknownComponent => write!(f, "unknown component name"),
            Self::ConflictingComponent => {
                write!(f, "component listed as both enabled and disabled")
            }
            Self::UnknownGroup => write!(f, "policy group not found"),
            Self::InvalidGroupPhase => write!(f, "phase takes no default policy"),
        }
    }
}

impl From<PolicyError> for Error {
    fn from(e: PolicyError) -> Self {
        Self::Policy(e)
    }
}

// ---------------------------------------------------------------------------
// Listener notification errors
// ---------------------------------------------------------------------------

/// Failure reported by a listener's transport when a notification or a
/// policy-change callback could not be delivered.  The active round treats
/// the listener as not-yet-acknowledged; it never aborts the broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The underlying transport returned an error.
    Transport,
    /// The remote end is gone (process died, connection closed).
    Gone,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport failure"),
            Self::Gone => write!(f, "listener gone"),
        }
    }
}

impl From<NotifyError> for Error {
    fn from(e: NotifyError) -> Self {
        Self::Notify(e)
    }
}

// ---------------------------------------------------------------------------
// Key-value store errors
// ---------------------------------------------------------------------------

/// Errors from the opaque key-value store used to persist auxiliary
/// hardware state across a suspend cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Generic I/O error from the storage backend.
    Io,
    /// Stored blob failed deserialization.
    Corrupted,
    /// Storage is full.
    Full,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
            Self::Full => write!(f, "storage full"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Service-wide `Result` alias for administrative operations.
pub type Result<T> = core::result::Result<T, Error>;
