//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TRIPLINE_VENDOR_API_KEY=...                                        │
//! │     TRIPLINE_VENDOR_URL=https://api.vendor.example                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tripline/tripline.toml (Linux)                           │
//! │     ~/Library/Application Support/com.tripline.sync/... (macOS)        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5-minute tick, 30-day lookback, segmentation defaults              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tripline.toml
//! [vendor]
//! base_url = "https://api.vendor.example"
//! api_key = "..."            # prefer TRIPLINE_VENDOR_API_KEY
//! request_timeout_secs = 30
//! inter_call_delay_ms = 500
//!
//! [sync]
//! tick_interval_secs = 300
//! backoff_secs = 900
//! lookback_days = 30
//! chunk_hours = 24
//! online_threshold_secs = 600
//!
//! [segment]
//! settle_window_secs = 240
//! min_trip_distance_km = 0.5
//!
//! [reconcile]
//! window_minutes = 15
//! batch_limit = 100
//!
//! [database]
//! path = "/var/lib/tripline/tripline.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use tripline_core::SegmentConfig;

/// Environment variable overriding the vendor API key. Keys belong in
/// the environment, not on disk.
pub const ENV_VENDOR_API_KEY: &str = "TRIPLINE_VENDOR_API_KEY";

/// Environment variable overriding the vendor base URL.
pub const ENV_VENDOR_URL: &str = "TRIPLINE_VENDOR_URL";

// =============================================================================
// Vendor Settings
// =============================================================================

/// Vendor API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSettings {
    /// Base URL of the vendor tracking API.
    pub base_url: String,

    /// API key. Prefer the TRIPLINE_VENDOR_API_KEY environment
    /// variable over storing this in the file.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Fixed pause between successive vendor calls (milliseconds).
    /// Keeps a long backfill under the vendor's request budget instead
    /// of tripping the 429 limiter. 0 disables pacing.
    #[serde(default = "default_inter_call_delay")]
    pub inter_call_delay_ms: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_inter_call_delay() -> u64 {
    500
}

impl Default for VendorSettings {
    fn default() -> Self {
        VendorSettings {
            base_url: "https://api.vendor.example".to_string(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            inter_call_delay_ms: default_inter_call_delay(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync scheduling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between scheduler ticks (seconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Backoff applied when the vendor rate-limits a device and sends
    /// no Retry-After header (seconds).
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    /// How far back the first sync of a device reaches (days).
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// History fetch chunk size (hours). Windows longer than this are
    /// paged so one request never asks the vendor for a month of data.
    #[serde(default = "default_chunk_hours")]
    pub chunk_hours: i64,

    /// A device whose newest fix is older than this counts as offline
    /// (seconds).
    #[serde(default = "default_online_threshold")]
    pub online_threshold_secs: i64,

    /// Telemetry retention (days). 0 disables retention cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_tick_interval() -> u64 {
    300
}

fn default_backoff() -> u64 {
    900
}

fn default_lookback_days() -> i64 {
    30
}

fn default_chunk_hours() -> i64 {
    24
}

fn default_online_threshold() -> i64 {
    600
}

fn default_retention_days() -> i64 {
    0
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            tick_interval_secs: default_tick_interval(),
            backoff_secs: default_backoff(),
            lookback_days: default_lookback_days(),
            chunk_hours: default_chunk_hours(),
            online_threshold_secs: default_online_threshold(),
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// Coordinate reconciliation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Search window around a trip endpoint for a usable fix (minutes,
    /// applied as ±).
    #[serde(default = "default_reconcile_window")]
    pub window_minutes: i64,

    /// Maximum trips repaired per reconciliation pass.
    #[serde(default = "default_reconcile_batch")]
    pub batch_limit: i64,
}

fn default_reconcile_window() -> i64 {
    15
}

fn default_reconcile_batch() -> i64 {
    100
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            window_minutes: default_reconcile_window(),
            batch_limit: default_reconcile_batch(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "tripline", "sync")
        .map(|dirs| dirs.data_dir().join("tripline.db"))
        .unwrap_or_else(|| PathBuf::from("tripline.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
        }
    }
}

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete sync engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub vendor: VendorSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    /// Segmentation thresholds, passed straight to the engine.
    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tripline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    ///
    /// The API key is never written back; it lives in the environment.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let mut scrubbed = self.clone();
        scrubbed.vendor.api_key = None;

        let contents = toml::to_string_pretty(&scrubbed)
            .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Saved config");
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENV_VENDOR_API_KEY) {
            if !key.is_empty() {
                self.vendor.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var(ENV_VENDOR_URL) {
            if !url.is_empty() {
                self.vendor.base_url = url;
            }
        }
    }

    /// Validates the configuration, failing fast at startup instead of
    /// on the first vendor request.
    pub fn validate(&self) -> SyncResult<()> {
        Url::parse(&self.vendor.base_url)
            .map_err(|e| SyncError::InvalidUrl(format!("{}: {}", self.vendor.base_url, e)))?;

        if self.sync.tick_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "tick_interval_secs must be positive".into(),
            ));
        }
        if self.sync.lookback_days <= 0 {
            return Err(SyncError::InvalidConfig(
                "lookback_days must be positive".into(),
            ));
        }
        if self.sync.chunk_hours <= 0 {
            return Err(SyncError::InvalidConfig(
                "chunk_hours must be positive".into(),
            ));
        }
        if self.segment.stopped_speed_kmh > self.segment.moving_speed_kmh {
            return Err(SyncError::InvalidConfig(
                "stopped_speed_kmh must not exceed moving_speed_kmh".into(),
            ));
        }
        if self.reconcile.window_minutes <= 0 {
            return Err(SyncError::InvalidConfig(
                "reconcile window_minutes must be positive".into(),
            ));
        }

        Ok(())
    }

    /// The API key, erroring when none is configured.
    pub fn api_key(&self) -> SyncResult<&str> {
        self.vendor
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(SyncError::MissingApiKey)
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tripline", "sync")
            .map(|dirs| dirs.config_dir().join("tripline.toml"))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.tick_interval_secs, 300);
        assert_eq!(config.sync.lookback_days, 30);
        assert_eq!(config.vendor.inter_call_delay_ms, 500);
        assert_eq!(config.segment.settle_window_secs, 240);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [vendor]
            base_url = "https://tracker.example.com/api"

            [sync]
            tick_interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.vendor.base_url, "https://tracker.example.com/api");
        assert_eq!(config.sync.tick_interval_secs, 60);
        // Unspecified sections fall back to defaults
        assert_eq!(config.sync.backoff_secs, 900);
        assert_eq!(config.reconcile.window_minutes, 15);
        assert_eq!(config.segment.min_trip_distance_km, 0.5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.vendor.base_url = "not a url".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        let mut config = SyncConfig::default();
        config.sync.tick_interval_secs = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let mut config = SyncConfig::default();
        config.segment.stopped_speed_kmh = 10.0;
        config.segment.moving_speed_kmh = 5.0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = SyncConfig::default();
        assert!(matches!(config.api_key(), Err(SyncError::MissingApiKey)));

        let mut config = SyncConfig::default();
        config.vendor.api_key = Some("secret".into());
        assert_eq!(config.api_key().unwrap(), "secret");
    }
}
