use poseguide_core::{GuidanceConfig, RuleCatalog, RuleCatalogError, SessionError};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Rule catalog override; the embedded catalog is used when unset.
    pub rules_path: Option<PathBuf>,
    /// Calibration TOML (estimator, geometry and capture constants).
    pub calibration_path: Option<PathBuf>,
    /// How often the session is re-evaluated, in milliseconds.
    pub tick_interval_ms: u64,
    /// Well-known D-Bus name to request.
    pub bus_name: String,
    /// Connect to the system bus instead of the session bus.
    pub system_bus: bool,
    /// Capacity of the engine's outgoing event queue.
    pub event_buffer: usize,
}

impl Config {
    /// Load configuration from `POSEGUIDE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            rules_path: env_path("POSEGUIDE_RULES"),
            calibration_path: env_path("POSEGUIDE_CALIBRATION"),
            tick_interval_ms: env_u64("POSEGUIDE_TICK_INTERVAL_MS", 100).max(1),
            bus_name: std::env::var("POSEGUIDE_BUS_NAME")
                .unwrap_or_else(|_| "org.poseguide.Guidance1".to_string()),
            system_bus: std::env::var("POSEGUIDE_SYSTEM_BUS")
                .map(|v| v == "1")
                .unwrap_or(false),
            event_buffer: env_usize("POSEGUIDE_EVENT_BUFFER", 64).max(1),
        }
    }

    pub fn load_catalog(&self) -> Result<RuleCatalog, RuleCatalogError> {
        match &self.rules_path {
            Some(path) => RuleCatalog::from_path(path),
            None => RuleCatalog::builtin(),
        }
    }

    pub fn load_calibration(&self) -> Result<GuidanceConfig, SessionError> {
        match &self.calibration_path {
            Some(path) => GuidanceConfig::from_path(path),
            None => Ok(GuidanceConfig::default()),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
