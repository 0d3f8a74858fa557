//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Vendor       │  │     Pipeline            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  RateLimited    │  │  Core (normalize/      │ │
//! │  │  MissingApiKey  │  │  Transient      │  │        segment)        │ │
//! │  │  InvalidUrl     │  │  Upstream       │  │  Db (persistence)      │ │
//! │  │  ConfigLoad     │  │  VendorRejected │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  The orchestrator's retry decision rides on these categories:          │
//! │  RateLimited → backoff; Transient → retry next tick; the rest → error │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all pipeline failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Vendor API key not configured.
    #[error("Vendor API key not configured. Set TRIPLINE_VENDOR_API_KEY or the config file.")]
    MissingApiKey,

    /// Invalid vendor base URL.
    #[error("Invalid vendor URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Vendor Errors
    // =========================================================================
    /// The vendor rate-limited us (HTTP 429). The device enters
    /// backoff; other devices keep syncing.
    #[error("Vendor rate limit hit, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Transient upstream fault (timeout, connect failure, 5xx).
    /// Worth retrying on the next tick without backoff.
    #[error("Transient vendor fault: {0}")]
    TransientUpstream(String),

    /// The vendor rejected the request (4xx other than 429).
    /// Retrying the identical request will fail again.
    #[error("Vendor rejected request (HTTP {status}): {message}")]
    VendorRejected { status: u16, message: String },

    /// The vendor response body was not valid JSON.
    #[error("Vendor response unparseable: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Normalization or segmentation failure from tripline-core.
    #[error("Pipeline error: {0}")]
    Core(#[from] tripline_core::CoreError),

    /// Persistence failure from tripline-db.
    #[error("Database error: {0}")]
    Db(#[from] tripline_db::DbError),

    /// Device not found in the registry.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

impl SyncError {
    /// Whether the next scheduler tick should simply retry.
    ///
    /// Rate limits are NOT retryable in this sense - they route
    /// through explicit backoff instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientUpstream(_) => true,
            SyncError::Db(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            SyncError::TransientUpstream(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                SyncError::TransientUpstream(err.to_string())
            } else {
                SyncError::VendorRejected {
                    status: status.as_u16(),
                    message: err.to_string(),
                }
            }
        } else if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else {
            SyncError::TransientUpstream(err.to_string())
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
