//! # tripline-core: Pure Pipeline Logic for Tripline
//!
//! This crate is the **heart** of the telemetry pipeline. It turns raw
//! vendor records into canonical position points and discrete trips, as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tripline Data Flow                               │
//! │                                                                         │
//! │  Vendor Telemetry API (tripline-sync)                                  │
//! │       │ raw JSON, field names/units vary                                │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ tripline-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ normalize │  │  segment  │  │    geo    │  │   types   │  │   │
//! │  │   │ canonical │  │ TripSeg-  │  │ haversine │  │ Position  │  │   │
//! │  │   │ mapping   │  │  menter   │  │ path len  │  │ Trip      │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tripline-db (position history, cache row, trips, sync state)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, PositionPoint, Trip, SyncState, ...)
//! - [`normalize`] - Vendor record mapping and ignition resolution
//! - [`segment`] - Trip segmentation state machine
//! - [`geo`] - Great-circle distance math
//! - [`validation`] - Timestamp and coordinate sanity rules
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Nothing dropped silently**: the normalizer always returns a point;
//!    rejection is the caller's explicit decision
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod geo;
pub mod normalize;
pub mod segment;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use tripline_core::Trip` instead of
// `use tripline_core::types::Trip`

pub use error::{CoreError, CoreResult};
pub use normalize::{map_vendor_record, normalize, CanonicalPoint, RawVendorRecord};
pub use segment::{SegmentConfig, TripCandidate, TripSegmenter};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum plausible road speed after unit conversion, in km/h.
///
/// ## Why a constant?
/// Vendor speed fields occasionally carry raw ADC noise or mph values
/// mis-declared as km/h. Anything above this is clamped and the point
/// is flagged as a sensor error rather than discarded.
pub const MAX_SPEED_KMH: f64 = 200.0;

/// Speed above which a vehicle is inferred to be moving (km/h).
pub const MOVING_SPEED_KMH: f64 = 5.0;

/// Speed at or below which a vehicle is inferred to be stationary (km/h).
pub const STOPPED_SPEED_KMH: f64 = 3.0;
