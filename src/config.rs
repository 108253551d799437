//! Service configuration.
//!
//! All tunable parameters for the tint control service. Defaults are the
//! documented installation values; every field can be overridden through
//! the environment. Invalid overrides fail startup instead of being
//! clamped.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which device backend drives the panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Built-in deterministic simulator.
    Sim,
    /// Remote device-control API.
    Real,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(Self::Sim),
            "real" => Ok(Self::Real),
            _ => Err(ConfigError::ParseFailed("SVC_MODE")),
        }
    }
}

/// Remote device-control API settings (used in [`Mode::Real`] only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base address, e.g. `http://localhost:8084/api`.
    pub base_url: String,
    pub site_id: String,
    pub api_key: String,
}

/// Core service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub mode: Mode,

    // --- Command gating ---
    /// Minimum seconds between accepted level changes per panel.
    pub min_dwell_secs: u64,

    // --- Simulator ---
    /// Simulated transition (settle) time in milliseconds.
    pub settle_ms: u64,

    // --- Asynchronous completion ---
    /// Window within which an accepted-pending change must be confirmed
    /// before it is audited as failed and its ownership released.
    pub confirm_timeout_secs: u64,
    /// How often the reconcile loop polls pending confirmations.
    pub reconcile_interval_secs: u64,

    // --- Backend retry ---
    /// Automatic retries for unreachable-backend failures, per panel.
    pub retry_max: u32,
    /// First retry backoff; doubles per attempt.
    pub retry_backoff_ms: u64,

    // --- Remote backend ---
    /// How long a cached device reading stays fresh.
    pub cache_ttl_ms: u64,
    /// HTTP request timeout.
    pub http_timeout_ms: u64,
    pub remote: RemoteConfig,

    // --- Durable state ---
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Sim,
            min_dwell_secs: 20,
            settle_ms: 2000,
            confirm_timeout_secs: 30,
            reconcile_interval_secs: 3,
            retry_max: 2,
            retry_backoff_ms: 250,
            cache_ttl_ms: 1500,
            http_timeout_ms: 5000,
            remote: RemoteConfig {
                base_url: "http://localhost:8084/api".to_string(),
                site_id: String::new(),
                api_key: String::new(),
            },
            data_dir: PathBuf::from("data"),
        }
    }
}

fn env_parse<T: FromStr>(var: &'static str, into: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = std::env::var(var) {
        *into = raw.parse().map_err(|_| ConfigError::ParseFailed(var))?;
    }
    Ok(())
}

impl ServiceConfig {
    /// Defaults overridden from the environment, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var("SVC_MODE") {
            cfg.mode = raw.parse()?;
        }
        env_parse("SVC_MIN_DWELL_SECONDS", &mut cfg.min_dwell_secs)?;
        env_parse("SVC_SETTLE_MS", &mut cfg.settle_ms)?;
        env_parse("SVC_CONFIRM_TIMEOUT_SECS", &mut cfg.confirm_timeout_secs)?;
        env_parse("SVC_RECONCILE_INTERVAL_SECS", &mut cfg.reconcile_interval_secs)?;
        env_parse("SVC_RETRY_MAX", &mut cfg.retry_max)?;
        env_parse("SVC_RETRY_BACKOFF_MS", &mut cfg.retry_backoff_ms)?;
        env_parse("SVC_CACHE_TTL_MS", &mut cfg.cache_ttl_ms)?;
        env_parse("SVC_HTTP_TIMEOUT_MS", &mut cfg.http_timeout_ms)?;
        if let Ok(raw) = std::env::var("SVC_DATA_DIR") {
            cfg.data_dir = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var("HALIO_API_URL") {
            cfg.remote.base_url = raw;
        }
        if let Ok(raw) = std::env::var("HALIO_SITE_ID") {
            cfg.remote.site_id = raw;
        }
        if let Ok(raw) = std::env::var("HALIO_API_KEY") {
            cfg.remote.api_key = raw;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirm_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "confirm_timeout_secs must be positive",
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconcile_interval_secs must be positive",
            ));
        }
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_backoff_ms must be positive",
            ));
        }
        if self.http_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "http_timeout_ms must be positive",
            ));
        }
        if self.mode == Mode::Real && self.remote.base_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "remote.base_url required in real mode",
            ));
        }
        Ok(())
    }

    // ── Durable file locations ────────────────────────────────

    pub fn panels_state_file(&self) -> PathBuf {
        self.data_dir.join("panels_state.json")
    }

    pub fn sim_state_file(&self) -> PathBuf {
        self.data_dir.join("sim_state.json")
    }

    pub fn audit_file(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    /// Panel-id to remote device-id mapping (real mode).
    pub fn window_mapping_file(&self) -> PathBuf {
        self.data_dir.join("window_mapping.json")
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
