//! Configurable parameters for the bonding engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::BondingMode;

fn default_max_retry_attempts() -> u32 {
    3
}

/// Tunable parameters shared by the bonding components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondConfig {
    /// Bonding mode applied at startup.
    pub bonding_mode: BondingMode,

    /// Maximum automatic transport reconnect attempts per connection type.
    ///
    /// Exceeding the bound is terminal until the next manual toggle.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Delay before a failed transport connection is re-attempted.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// How often the path monitor samples the platform path snapshot.
    #[serde(with = "humantime_serde")]
    pub monitor_poll_interval: Duration,

    /// How often the bond manager recomputes status and records metrics.
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,

    /// Default look-back window for telemetry averages.
    #[serde(with = "humantime_serde")]
    pub telemetry_window: Duration,

    /// Upper bound on retained metrics snapshots (oldest evicted first).
    pub telemetry_history_limit: usize,
}

impl Default for BondConfig {
    fn default() -> Self {
        Self {
            bonding_mode: BondingMode::ActiveBackup,
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval: Duration::from_secs(5),
            monitor_poll_interval: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(1),
            telemetry_window: Duration::from_secs(300),
            telemetry_history_limit: 1000,
        }
    }
}
