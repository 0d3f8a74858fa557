//! # Telemetry Normalizer
//!
//! Maps one raw vendor record to a canonical point with
//! speed/ignition/confidence.
//!
//! ## Two-Stage Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Normalization Pipeline                               │
//! │                                                                         │
//! │  vendor JSON (field names/units vary, untrusted)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  map_vendor_record() ← ONE canonical ingestion schema, explicit        │
//! │       │                 alias handling; unknown shapes are REJECTED,   │
//! │       │                 never guessed                                  │
//! │       ▼                                                                 │
//! │  RawVendorRecord (canonical field names, raw values)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  normalize() ← clamps speed, resolves ignition + confidence,           │
//! │       │         parses + clamps gps_time                               │
//! │       ▼                                                                 │
//! │  CanonicalPoint (gps_time: Option - a null one is the CALLER's         │
//! │                  cue to reject; nothing is dropped silently here)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ignition Resolution Order
//! 1. ACC ON / ACC OFF token in status text → confidence 0.9, `StringParse`
//! 2. Explicit ignition bit                 → confidence 1.0, `StatusBit`
//! 3. Speed inference: > 5 km/h moving (0.4), ≤ 3 km/h stopped (0.5)
//! 4. Otherwise ignition = null, confidence 0.0, `Unknown`

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::types::DetectionMethod;
use crate::validation::{clamp_gps_time, clamp_speed_kmh, is_valid_coordinate};
use crate::{MOVING_SPEED_KMH, STOPPED_SPEED_KMH};

// =============================================================================
// Canonical Ingestion Schema
// =============================================================================

/// One vendor record after field-name mapping, before normalization.
///
/// Values are raw: speed is unclamped, the timestamp is the vendor's
/// verbatim text, units have already been converted to km/h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVendorRecord {
    /// The tracker's identifier on the vendor API.
    pub vendor_device_id: String,

    pub lat: f64,
    pub lon: f64,

    /// Reported speed in km/h (mph already converted). None when absent.
    pub speed_kmh: Option<f64>,

    /// Heading in degrees, when reported.
    pub heading: Option<f64>,

    /// Explicit ignition bit, when the vendor sends one.
    pub ignition_bit: Option<bool>,

    /// Raw status text, kept verbatim (ACC tokens live here).
    pub status_text: Option<String>,

    /// The vendor's timestamp, verbatim. Epoch seconds, epoch millis,
    /// RFC 3339, and `YYYY-MM-DD HH:MM:SS` are all seen in the wild.
    pub gps_time_raw: Option<String>,

    /// Vendor cumulative odometer in km, when reported. Deltas over a
    /// trip window beat haversine sums.
    pub odometer_km: Option<f64>,
}

// =============================================================================
// Canonical Point
// =============================================================================

/// The normalizer's output: one canonical telemetry fix.
///
/// `gps_time` is `None` when the vendor timestamp was unparseable or
/// outside the sane range; such points are rejected by the caller, not
/// by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPoint {
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: Option<f64>,

    /// True when the reported speed was out of [0, 200] km/h and had to
    /// be clamped - a sensor error flag, not a rejection.
    pub speed_flagged: bool,

    pub heading: Option<f64>,
    pub ignition_on: Option<bool>,
    pub ignition_confidence: f64,
    pub detection_method: DetectionMethod,
    pub gps_time: Option<DateTime<Utc>>,
    pub raw_status: Option<String>,
    pub odometer_km: Option<f64>,
}

// =============================================================================
// Vendor Field Mapping
// =============================================================================

/// Looks a field up under each known alias, in order.
fn field<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|name| value.get(name))
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Renders a timestamp field verbatim, whether the vendor sent a
/// number or a string.
fn as_timestamp_text(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Maps one vendor JSON object onto the canonical ingestion schema.
///
/// This is the ONLY place vendor field-name variability is handled.
/// Every alias is listed explicitly; a shape that matches none of them
/// is rejected with [`CoreError::UnknownVendorShape`], never guessed.
pub fn map_vendor_record(value: &Value) -> CoreResult<RawVendorRecord> {
    if !value.is_object() {
        return Err(CoreError::UnknownVendorShape("record is not a JSON object".into()));
    }

    let vendor_device_id = field(value, &["deviceId", "device_id", "imei", "unitId"])
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| CoreError::UnknownVendorShape("no device identifier field".into()))?;

    let lat = field(value, &["lat", "latitude"])
        .and_then(as_f64)
        .ok_or_else(|| CoreError::UnknownVendorShape("no latitude field".into()))?;
    let lon = field(value, &["lon", "lng", "longitude"])
        .and_then(as_f64)
        .ok_or_else(|| CoreError::UnknownVendorShape("no longitude field".into()))?;

    if !is_valid_coordinate(lat, lon) {
        return Err(CoreError::InvalidCoordinate { lat, lon });
    }

    let mut speed_kmh = field(value, &["speed", "speedKmh", "speed_kmh"]).and_then(as_f64);

    // Some feeds declare mph explicitly; convert here so everything
    // downstream is km/h.
    if let Some(unit) = field(value, &["speedUnit", "speed_unit"]).and_then(Value::as_str) {
        if unit.eq_ignore_ascii_case("mph") {
            speed_kmh = speed_kmh.map(|s| s * 1.609_344);
        }
    }

    let heading = field(value, &["heading", "course", "direction"]).and_then(as_f64);
    let ignition_bit = field(value, &["acc", "accOn", "ignition", "ignition_on"]).and_then(as_bool_flag);
    let status_text = field(value, &["status", "statusText", "status_text"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let gps_time_raw = field(value, &["gpsTime", "gps_time", "deviceTime", "timestamp"])
        .and_then(as_timestamp_text);
    let odometer_km = field(value, &["odometer", "mileage", "totalDistance"]).and_then(as_f64);

    Ok(RawVendorRecord {
        vendor_device_id,
        lat,
        lon,
        speed_kmh,
        heading,
        ignition_bit,
        status_text,
        gps_time_raw,
        odometer_km,
    })
}

// =============================================================================
// Timestamp Parsing
// =============================================================================

/// Epoch values at or above this are milliseconds, below are seconds.
/// 10^12 seconds is the year 33658; 10^12 millis is 2001.
const EPOCH_MILLIS_CUTOFF: i64 = 1_000_000_000_000;

/// Parses a vendor timestamp into UTC, accepting epoch seconds, epoch
/// milliseconds, RFC 3339, and the bare `YYYY-MM-DD HH:MM:SS` form.
///
/// Returns `None` for unparseable text or values outside the sane
/// range `[2000-01-01, now + 5 min]`.
pub fn parse_gps_time(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parsed = if let Ok(epoch) = raw.parse::<i64>() {
        if epoch >= EPOCH_MILLIS_CUTOFF {
            DateTime::<Utc>::from_timestamp_millis(epoch)
        } else {
            DateTime::<Utc>::from_timestamp(epoch, 0)
        }
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        Some(dt.with_timezone(&Utc))
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Some(naive.and_utc())
    } else {
        None
    }?;

    clamp_gps_time(parsed, now)
}

// =============================================================================
// Ignition Resolution
// =============================================================================

/// Resolves ignition state, confidence, and detection method.
///
/// Deterministic: identical status_text/bit/speed inputs always yield
/// the same answer. The resolution order is fixed - explicit string
/// tokens first, then the status bit, then speed inference.
pub fn resolve_ignition(
    status_text: Option<&str>,
    ignition_bit: Option<bool>,
    speed_kmh: Option<f64>,
) -> (Option<bool>, f64, DetectionMethod) {
    // 1. ACC token in the status text
    if let Some(text) = status_text {
        let upper = text.to_ascii_uppercase().replace([':', '='], " ");
        let collapsed = upper.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.contains("ACC ON") {
            return (Some(true), 0.9, DetectionMethod::StringParse);
        }
        if collapsed.contains("ACC OFF") {
            return (Some(false), 0.9, DetectionMethod::StringParse);
        }
    }

    // 2. Explicit ignition bit
    if let Some(bit) = ignition_bit {
        return (Some(bit), 1.0, DetectionMethod::StatusBit);
    }

    // 3. Speed inference; the (3, 5] km/h band is indeterminate
    if let Some(speed) = speed_kmh {
        if speed > MOVING_SPEED_KMH {
            return (Some(true), 0.4, DetectionMethod::SpeedInference);
        }
        if speed <= STOPPED_SPEED_KMH {
            return (Some(false), 0.5, DetectionMethod::SpeedInference);
        }
    }

    // 4. No usable signal
    (None, 0.0, DetectionMethod::Unknown)
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalizes one mapped vendor record into a canonical point.
///
/// Never drops a record: an unparseable timestamp yields
/// `gps_time: None` and the caller decides to reject it.
pub fn normalize(device_id: &str, raw: &RawVendorRecord, now: DateTime<Utc>) -> CanonicalPoint {
    let (speed_kmh, speed_flagged) = match raw.speed_kmh {
        Some(s) => {
            let (clamped, flagged) = clamp_speed_kmh(s);
            (Some(clamped), flagged)
        }
        None => (None, false),
    };

    let (ignition_on, ignition_confidence, detection_method) =
        resolve_ignition(raw.status_text.as_deref(), raw.ignition_bit, speed_kmh);

    let gps_time = raw
        .gps_time_raw
        .as_deref()
        .and_then(|text| parse_gps_time(text, now));

    CanonicalPoint {
        device_id: device_id.to_string(),
        lat: raw.lat,
        lon: raw.lon,
        speed_kmh,
        speed_flagged,
        heading: raw.heading,
        ignition_on,
        ignition_confidence,
        detection_method,
        gps_time,
        raw_status: raw.status_text.clone(),
        odometer_km: raw.odometer_km,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
