//! # Vendor API Client
//!
//! The seam between the pipeline and the tracking vendor's HTTP API.
//!
//! ## Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        VendorApi Seam                                   │
//! │                                                                         │
//! │  SyncOrchestrator ──► dyn VendorApi                                    │
//! │                          │                                              │
//! │            ┌─────────────┴─────────────┐                               │
//! │            ▼                           ▼                                │
//! │   HttpVendorClient              ScriptedVendor (tests)                 │
//! │   (reqwest, real API)           (canned JSON payloads)                 │
//! │                                                                         │
//! │  The trait returns RAW JSON values. Mapping into canonical form        │
//! │  belongs to tripline-core so every byte the vendor sends flows         │
//! │  through the same normalization, real or scripted.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## HTTP Behavior
//! - Every request carries the API key header and a per-request timeout
//! - 429 → [`SyncError::RateLimited`] with the Retry-After value
//! - 5xx / timeout / connect failure → [`SyncError::TransientUpstream`]
//! - other 4xx → [`SyncError::VendorRejected`] (retrying won't help)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VendorSettings;
use crate::error::{SyncError, SyncResult};

/// Header carrying the vendor API key.
const API_KEY_HEADER: &str = "X-API-Key";

/// Backoff applied when a 429 arrives without a Retry-After header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 900;

// =============================================================================
// VendorApi Trait
// =============================================================================

/// Abstraction over the vendor's tracking API.
///
/// Implementations return raw JSON records; the orchestrator owns
/// normalization. Tests substitute a scripted implementation.
#[async_trait]
pub trait VendorApi: Send + Sync {
    /// The most recent raw position record for a device, if the vendor
    /// has one.
    async fn latest_position(&self, vendor_device_id: &str) -> SyncResult<Option<Value>>;

    /// Raw position history for a device within [from, to].
    ///
    /// Callers page long windows themselves; one call maps to one
    /// vendor request.
    async fn position_history(
        &self,
        vendor_device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<Value>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Production [`VendorApi`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpVendorClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpVendorClient {
    /// Builds a client from vendor settings.
    ///
    /// ## Errors
    /// [`SyncError::MissingApiKey`] when no key is configured.
    pub fn new(settings: &VendorSettings) -> SyncResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(SyncError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        Ok(HttpVendorClient {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Issues a GET and classifies the response status.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        debug!(url, "Vendor request");

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

            warn!(url, retry_after_secs, "Vendor rate limit hit");
            return Err(SyncError::RateLimited { retry_after_secs });
        }

        if status.is_server_error() {
            return Err(SyncError::TransientUpstream(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::VendorRejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }

    /// Unwraps the vendor's record-list envelope.
    ///
    /// The API has returned both a bare array and `{"data": [...]}`
    /// across firmware generations; accept either.
    fn record_list(payload: Value) -> SyncResult<Vec<Value>> {
        match payload {
            Value::Array(records) => Ok(records),
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(records)) => Ok(records),
                Some(other) => Err(SyncError::MalformedResponse(format!(
                    "expected array under 'data', got {}",
                    type_name(&other)
                ))),
                None => Err(SyncError::MalformedResponse(
                    "response object has no 'data' array".into(),
                )),
            },
            other => Err(SyncError::MalformedResponse(format!(
                "expected array or object, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl VendorApi for HttpVendorClient {
    async fn latest_position(&self, vendor_device_id: &str) -> SyncResult<Option<Value>> {
        let url = format!("{}/devices/{}/latest", self.base_url, vendor_device_id);
        let payload = self.get_json(&url, &[]).await?;

        match payload {
            Value::Null => Ok(None),
            record @ Value::Object(_) => Ok(Some(record)),
            other => Err(SyncError::MalformedResponse(format!(
                "expected position object, got {}",
                type_name(&other)
            ))),
        }
    }

    async fn position_history(
        &self,
        vendor_device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<Value>> {
        let url = format!("{}/devices/{}/history", self.base_url, vendor_device_id);
        let query = [
            ("from", from.to_rfc3339()),
            ("to", to.to_rfc3339()),
        ];

        let payload = self.get_json(&url, &query).await?;
        Self::record_list(payload)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_list_accepts_both_envelopes() {
        let bare = json!([{"deviceId": "a"}, {"deviceId": "b"}]);
        assert_eq!(HttpVendorClient::record_list(bare).unwrap().len(), 2);

        let wrapped = json!({"data": [{"deviceId": "a"}]});
        assert_eq!(HttpVendorClient::record_list(wrapped).unwrap().len(), 1);

        let bad = json!("nope");
        assert!(matches!(
            HttpVendorClient::record_list(bad),
            Err(SyncError::MalformedResponse(_))
        ));

        let no_data = json!({"items": []});
        assert!(matches!(
            HttpVendorClient::record_list(no_data),
            Err(SyncError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_client_requires_api_key() {
        let settings = VendorSettings::default();
        assert!(matches!(
            HttpVendorClient::new(&settings),
            Err(SyncError::MissingApiKey)
        ));

        let mut with_key = VendorSettings::default();
        with_key.api_key = Some("secret".into());
        assert!(HttpVendorClient::new(&with_key).is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let mut settings = VendorSettings::default();
        settings.base_url = "https://api.vendor.example/".into();
        settings.api_key = Some("secret".into());

        let client = HttpVendorClient::new(&settings).unwrap();
        assert_eq!(client.base_url, "https://api.vendor.example");
    }
}
