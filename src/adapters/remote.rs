//! Remote device-control backend.
//!
//! Talks to the vendor's site API over HTTP. Panel ids are translated to
//! vendor device ids through a mapping file; unmapped panels fail fast
//! with [`BackendError::NotFound`] before any network traffic.
//!
//! The vendor acknowledges tint commands with `202 Accepted` while the
//! glass transitions, so most writes surface as
//! [`ApplyOutcome::AcceptedPending`] and are confirmed later through
//! [`get_level`](DeviceBackend::get_level). Readings are cached briefly to
//! keep reconcile polling from hammering the API.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::store::load_json;
use crate::adapters::time::epoch_secs;
use crate::app::ports::{ApplyOutcome, BackendError, DeviceBackend, DeviceReading, StoreError};
use crate::config::ServiceConfig;
use crate::error::ConfigError;

#[derive(Debug, Serialize)]
struct TintRequest {
    #[serde(rename = "tintLevel")]
    tint_level: u8,
}

#[derive(Debug, Deserialize)]
struct WindowState {
    #[serde(rename = "tintLevel")]
    tint_level: u8,
    #[serde(rename = "updatedAt")]
    updated_at: Option<u64>,
}

pub struct RemoteBackend {
    http: reqwest::blocking::Client,
    base_url: String,
    site_id: String,
    api_key: String,
    /// Panel id → vendor device id.
    mapping: BTreeMap<String, String>,
    cache: Mutex<HashMap<String, (DeviceReading, Instant)>>,
    cache_ttl: Duration,
}

/// Load the panel-to-device mapping file. A missing file yields an empty
/// mapping (every panel then reports `NotFound`).
pub fn mapping_from_file(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    Ok(load_json(path)?.unwrap_or_default())
}

impl RemoteBackend {
    pub fn new(
        config: &ServiceConfig,
        mapping: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|_| ConfigError::ValidationFailed("failed to build http client"))?;
        Ok(Self {
            http,
            base_url: config.remote.base_url.trim_end_matches('/').to_string(),
            site_id: config.remote.site_id.clone(),
            api_key: config.remote.api_key.clone(),
            mapping,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: config.cache_ttl(),
        })
    }

    fn device_url(&self, device_id: &str) -> String {
        format!(
            "{}/sites/{}/windows/{}",
            self.base_url, self.site_id, device_id
        )
    }

    fn device_id(&self, panel_id: &str) -> Result<&str, BackendError> {
        self.mapping
            .get(panel_id)
            .map(String::as_str)
            .ok_or(BackendError::NotFound)
    }

    /// Map a tint-command response status to an outcome. `202` means the
    /// glass is transitioning and the change must be confirmed by polling.
    fn classify_set_status(status: u16) -> Result<ApplyOutcome, BackendError> {
        match status {
            202 => Ok(ApplyOutcome::AcceptedPending),
            200..=299 => Ok(ApplyOutcome::AppliedImmediately),
            404 => Err(BackendError::NotFound),
            408 | 429 => Err(BackendError::Unreachable(format!("http {status}"))),
            400..=499 => Err(BackendError::Rejected(format!("http {status}"))),
            _ => Err(BackendError::Unreachable(format!("http {status}"))),
        }
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (DeviceReading, Instant)>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, panel_id: &str) -> Option<DeviceReading> {
        let cache = self.cache_lock();
        let (reading, at) = cache.get(panel_id)?;
        (at.elapsed() < self.cache_ttl).then_some(*reading)
    }

    #[cfg(test)]
    fn cache_put(&self, panel_id: &str, reading: DeviceReading) {
        self.cache_lock()
            .insert(panel_id.to_string(), (reading, Instant::now()));
    }
}

impl DeviceBackend for RemoteBackend {
    fn set_level(&self, panel_id: &str, level: u8) -> Result<ApplyOutcome, BackendError> {
        let device_id = self.device_id(panel_id)?;
        let url = format!("{}/tint", self.device_url(device_id));

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&TintRequest { tint_level: level })
            .send()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        // A command invalidates whatever we thought the device level was.
        self.cache_lock().remove(panel_id);

        let outcome = Self::classify_set_status(response.status().as_u16())?;
        debug!("remote: set {panel_id} ({device_id}) to {level}: {outcome:?}");
        Ok(outcome)
    }

    fn get_level(&self, panel_id: &str) -> Result<DeviceReading, BackendError> {
        if let Some(reading) = self.cached(panel_id) {
            return Ok(reading);
        }
        let device_id = self.device_id(panel_id)?;

        let response = self
            .http
            .get(self.device_url(device_id))
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            404 => return Err(BackendError::NotFound),
            408 | 429 | 500..=599 => {
                return Err(BackendError::Unreachable(format!("http {status}")))
            }
            _ => return Err(BackendError::Rejected(format!("http {status}"))),
        }

        let state: WindowState = response.json().map_err(|e| {
            warn!("remote: bad device state payload for {panel_id}: {e}");
            BackendError::Rejected("invalid device state payload".to_string())
        })?;
        let reading = DeviceReading {
            level: state.tint_level.min(100),
            ts: state.updated_at.unwrap_or_else(epoch_secs),
        };
        self.cache_lock()
            .insert(panel_id.to_string(), (reading, Instant::now()));
        Ok(reading)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
