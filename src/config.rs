//! System configuration parameters
//!
//! All tunable parameters for the power orchestration service.
//! Values can be overridden via a JSON config file passed to the daemon.

use serde::{Deserialize, Serialize};

/// Core service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    // --- Listener completion rounds ---
    /// Maximum time listeners get to acknowledge pre-shutdown preparation (ms)
    pub pre_shutdown_prepare_timeout_ms: u64,
    /// Maximum time listeners get to acknowledge core shutdown preparation (ms)
    pub shutdown_prepare_timeout_ms: u64,
    /// Maximum time listeners get to acknowledge the final enter broadcast (ms)
    pub wait_for_finish_timeout_ms: u64,
    /// Interval between postpone signals while preparation is in flight (ms)
    pub postpone_interval_ms: u64,
    /// Extra time requested from the platform per postpone signal (ms)
    pub postpone_extend_ms: u64,

    // --- Suspend retry ---
    /// First retry delay after a failed suspend attempt (ms)
    pub suspend_initial_backoff_ms: u64,
    /// Per-retry delay cap; backoff doubles until it hits this (ms)
    pub suspend_max_backoff_ms: u64,
    /// Total wait budget before escalating to full shutdown (ms)
    pub suspend_max_total_wait_ms: u64,

    // --- Platform capabilities ---
    /// Whether the platform supports suspend-to-RAM
    pub deep_sleep_supported: bool,
    /// Whether the platform supports suspend-to-disk
    pub hibernation_supported: bool,

    // --- Wake & transport binding ---
    /// Scheduled wake delay reported to the platform on suspend entry (s, 0 = none)
    pub wake_after_secs: u32,
    /// Attempts made waiting for the hardware transport to bind at startup
    pub hal_bind_retries: u32,
    /// Fixed delay between transport bind attempts (ms)
    pub hal_bind_interval_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            // Listener rounds
            pre_shutdown_prepare_timeout_ms: 5000,
            shutdown_prepare_timeout_ms: 5000,
            wait_for_finish_timeout_ms: 5000,
            postpone_interval_ms: 2000,
            postpone_extend_ms: 5000,

            // Suspend retry
            suspend_initial_backoff_ms: 50,
            suspend_max_backoff_ms: 5000,
            suspend_max_total_wait_ms: 30_000,

            // Capabilities
            deep_sleep_supported: true,
            hibernation_supported: false,

            // Wake & binding
            wake_after_secs: 0,
            hal_bind_retries: 5,
            hal_bind_interval_ms: 500,
        }
    }
}
