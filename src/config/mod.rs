// src/config/mod.rs
// Engine tuning knobs loaded from the environment.

pub mod helpers;

use crate::stats::Sensitivity;
use lazy_static::lazy_static;
use std::time::Duration;

/// Engine timing and detection configuration. Defaults are the canonical
/// values; the env overrides exist mostly so tests and local setups can
/// shrink the timers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Outlier re-evaluation interval for running tasks.
    pub tick_interval: Duration,
    /// Dispatcher watchdog interval.
    pub liveness_interval: Duration,
    /// Silence after which the worker is declared gone.
    pub heartbeat_timeout: Duration,
    /// How long a worker long-poll is parked before returning null.
    pub poll_timeout: Duration,
    /// Default slow-outlier sensitivity; a client config may override it.
    pub sensitivity: Sensitivity,
    /// Fallback task estimate when neither payload nor statistics supply one.
    pub default_estimate_ms: i64,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            tick_interval: Duration::from_millis(helpers::env_u64("FOREMAN_TICK_MS", 100)),
            liveness_interval: Duration::from_millis(helpers::env_u64("FOREMAN_LIVENESS_MS", 1000)),
            heartbeat_timeout: Duration::from_millis(helpers::env_u64(
                "FOREMAN_HEARTBEAT_TIMEOUT_MS",
                10_000,
            )),
            poll_timeout: Duration::from_millis(helpers::env_u64("FOREMAN_POLL_TIMEOUT_MS", 30_000)),
            sensitivity: Sensitivity::parse(&helpers::env_or("FOREMAN_SENSITIVITY", "normal"))
                .unwrap_or_default(),
            default_estimate_ms: helpers::env_u64("FOREMAN_DEFAULT_ESTIMATE_MS", 1000) as i64,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            liveness_interval: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_millis(10_000),
            poll_timeout: Duration::from_millis(30_000),
            sensitivity: Sensitivity::Normal,
            default_estimate_ms: 1000,
        }
    }
}

lazy_static! {
    pub static ref CONFIG: EngineConfig = EngineConfig::from_env();
}
