//! # Domain Types
//!
//! Core domain types used throughout Tripline.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Device      │   │  PositionPoint  │   │      Trip       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  device_id (FK) │   │  device_id (FK) │       │
//! │  │  vendor_dev_id  │   │  gps_time       │   │  start/end time │       │
//! │  │  name           │   │  lat/lon/speed  │   │  distance_km    │       │
//! │  └─────────────────┘   │  ignition+conf  │   │  avg/max speed  │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ LatestPosition  │   │    SyncState    │   │    SyncPhase    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  1 row/device   │   │  cursor_time    │   │  Idle           │       │
//! │  │  last-write-wins│   │  phase + backoff│   │  Running        │       │
//! │  │  online derive  │   │  progress %     │   │  Error          │       │
//! │  └─────────────────┘   └─────────────────┘   │  Backoff        │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! A Device has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - `vendor_device_id`: the tracker's identifier on the vendor API

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Detection Method
// =============================================================================

/// How the ignition state of a position point was determined.
///
/// Ordered by trustworthiness: explicit signals beat inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// ACC ON / ACC OFF token found in the raw status text.
    StringParse,
    /// Explicit ignition bit in the vendor payload.
    StatusBit,
    /// Inferred from speed (moving implies on, stationary implies off).
    SpeedInference,
    /// No usable signal; ignition is null with confidence 0.
    Unknown,
}

impl DetectionMethod {
    /// Returns true if the method reflects an explicit vendor signal
    /// rather than an inference. Explicit signals are what lets a
    /// short candidate survive the ghost-trip filter.
    pub fn is_explicit(&self) -> bool {
        matches!(self, DetectionMethod::StringParse | DetectionMethod::StatusBit)
    }
}

impl Default for DetectionMethod {
    fn default() -> Self {
        DetectionMethod::Unknown
    }
}

// =============================================================================
// Device
// =============================================================================

/// A tracked vehicle. Owns one cache row, many position points, many trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Device {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name shown in reporting.
    pub name: String,

    /// The tracker's identifier on the vendor API.
    pub vendor_device_id: String,

    /// Whether the device is synced (soft delete).
    pub is_active: bool,

    /// When the device was onboarded.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Position Point
// =============================================================================

/// One canonical, persisted telemetry fix.
///
/// Points are immutable once written (except by explicit cleanup) and
/// unique per `(device_id, gps_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PositionPoint {
    pub device_id: String,

    /// When the fix was taken, per the GPS receiver. Clamped to a sane
    /// range at normalization; never null once persisted.
    pub gps_time: DateTime<Utc>,

    pub lat: f64,
    pub lon: f64,

    /// Speed in km/h, clamped to [0, 200]. Null when the vendor sent none.
    pub speed_kmh: Option<f64>,

    /// Heading in degrees [0, 360), when reported.
    pub heading: Option<f64>,

    /// Resolved ignition state; null when no signal was available.
    pub ignition_on: Option<bool>,

    /// Reliability of `ignition_on`, in [0, 1]. Null only for legacy rows.
    pub ignition_confidence: Option<f64>,

    /// How `ignition_on` was determined.
    pub detection_method: DetectionMethod,

    /// The vendor's raw status text, kept verbatim for audit.
    pub raw_status: Option<String>,

    /// When the row was inserted (not when the fix was taken).
    pub recorded_at: DateTime<Utc>,
}

impl PositionPoint {
    /// Returns true if both coordinates are present and non-zero.
    /// (0, 0) is the vendor's "no fix yet" placeholder, not a real
    /// position in any fleet this system tracks.
    pub fn has_valid_fix(&self) -> bool {
        self.lat != 0.0 && self.lon != 0.0
    }
}

// =============================================================================
// Latest Position Cache
// =============================================================================

/// The single mutable "current position" row per device.
///
/// Modeled as a keyed, last-write-wins upsert with an explicit
/// `updated_at` - not shared in-memory state. Real-time subscribers
/// observe this row; this core only maintains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LatestPosition {
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub ignition_on: Option<bool>,

    /// GPS time of the cached fix. Guards the last-write-wins upsert:
    /// an older incoming fix never overwrites a newer cached one.
    pub gps_time: DateTime<Utc>,

    /// When the cache row itself was last written.
    pub updated_at: DateTime<Utc>,
}

impl LatestPosition {
    /// Derives online/offline from fix age. Exposed for the live-map
    /// and offline-notification collaborators; nothing is pushed.
    pub fn is_online(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.gps_time) < threshold
    }
}

// =============================================================================
// Distance Source
// =============================================================================

/// Where a trip's distance figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
    /// Vendor-reported cumulative distance delta - the source of truth
    /// when available.
    Vendor,
    /// Haversine sum over consecutive points with jitter rejection.
    Haversine,
    /// No distance could be computed; reconciliation may fill it in.
    Placeholder,
}

// =============================================================================
// Trip
// =============================================================================

/// A contiguous period of vehicle motion.
///
/// Invariants: `start_time < end_time` when closed; `distance_km >= 0`;
/// `(device_id, start_time, end_time)` is unique. Coordinates and
/// distance may be patched later by reconciliation, but start/end
/// *time* is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Trip {
    pub id: String,
    pub device_id: String,
    pub start_time: DateTime<Utc>,

    /// Null while the trip is open.
    pub end_time: Option<DateTime<Utc>>,

    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,

    pub distance_km: f64,
    pub distance_source: DistanceSource,
    pub duration_seconds: i64,
    pub avg_speed_kmh: Option<f64>,
    pub max_speed_kmh: Option<f64>,

    /// Set when the gap to the previous trip's end exceeded the
    /// continuity tolerance. Flagged for audit, never dropped.
    pub continuity_flagged: bool,

    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Returns true if the start coordinate is missing or the (0, 0)
    /// no-fix placeholder - the reconciliation engine's trigger.
    pub fn start_coordinate_missing(&self) -> bool {
        !matches!((self.start_lat, self.start_lon), (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0)
    }

    /// Returns true if the end coordinate is missing or (0, 0).
    pub fn end_coordinate_missing(&self) -> bool {
        !matches!((self.end_lat, self.end_lon), (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0)
    }
}

// =============================================================================
// Sync Phase
// =============================================================================

/// Per-device sync lifecycle, modeled as an explicit finite state
/// machine rather than ad hoc boolean columns.
///
/// ## Transitions (owned exclusively by the orchestrator)
/// ```text
/// Idle ──claim──► Running ──ok──────────► Idle
///                    │  └──vendor 429──► Backoff ──window elapses──► claimable
///                    └─────failure─────► Error   ──next tick───────► claimable
///
/// Operator reset: any ──reset_to_idle──► Idle (forces retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No run in flight; eligible for the next tick.
    #[default]
    Idle,
    /// A run holds the device. At most one per device, enforced by
    /// check-and-set on this column.
    Running,
    /// Last run failed; retried on the next scheduled tick.
    Error,
    /// Vendor rate limit hit; not retried until `backoff_until` passes.
    Backoff,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Running => write!(f, "running"),
            SyncPhase::Error => write!(f, "error"),
            SyncPhase::Backoff => write!(f, "backoff"),
        }
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Per-device incremental sync bookkeeping. Continuously mutated by
/// the orchestrator; reset to idle by an operator to force retry.
///
/// A device stuck at the same `percent` for an extended period is the
/// operator-visible signal of trouble - errors surface here, not as
/// exceptions to the invocation caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncState {
    pub device_id: String,

    /// Last gps_time durably processed. Advances only after the
    /// corresponding trips are committed (at-least-once delivery).
    pub cursor_time: Option<DateTime<Utc>>,

    pub phase: SyncPhase,

    /// Set when entering Backoff; the device is skipped until this passes.
    pub backoff_until: Option<DateTime<Utc>>,

    /// Progress counters for external observers.
    pub trips_total: i64,
    pub percent: f64,
    pub current_operation: Option<String>,

    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Returns true if the device may be claimed for a new run at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.phase == SyncPhase::Running {
            return false;
        }
        match self.backoff_until {
            Some(until) if self.phase == SyncPhase::Backoff => until <= now,
            _ => true,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
