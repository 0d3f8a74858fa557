//! # Domain Error Types
//!
//! Error types for the pure pipeline logic.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  CoreError (this module)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (tripline-sync) ← wraps per-record failures; the device     │
//! │       │                       run continues, the record is logged      │
//! │       ▼                                                                 │
//! │  SyncState.last_error ← operator-visible, never an exception           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by normalization and segmentation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The vendor payload does not match any known shape.
    ///
    /// ## When This Occurs
    /// - Required field missing under every known alias
    /// - Field present but of the wrong JSON type
    ///
    /// Unknown shapes are rejected, never guessed.
    #[error("unrecognized vendor record shape: {0}")]
    UnknownVendorShape(String),

    /// A coordinate is outside the valid lat/lon range.
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// The record's timestamp could not be parsed or is outside the
    /// sane range. The normalizer still returns the point with a null
    /// gps_time; this error is raised by callers that must reject it.
    #[error("unusable gps timestamp: {0}")]
    UnusableTimestamp(String),

    /// A segmentation window carried neither an ignition signal nor a
    /// speed signal. The engine skips the window instead of fabricating
    /// a trip.
    #[error("window has no ignition or speed signal for device {device_id}")]
    NoMotionSignal { device_id: String },

    /// Points handed to the segmenter were not in ascending gps_time
    /// order. Ordering is the caller's contract; the engine refuses to
    /// guess.
    #[error("points out of order at index {index}")]
    UnorderedPoints { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::NoMotionSignal {
            device_id: "dev-1".into(),
        };
        assert!(err.to_string().contains("dev-1"));

        let err = CoreError::InvalidCoordinate { lat: 99.0, lon: 0.0 };
        assert!(err.to_string().contains("99"));
    }
}
