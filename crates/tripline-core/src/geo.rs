//! # Geographic Math
//!
//! Great-circle distance utilities for GPS tracks.
//!
//! Only haversine math is needed here; a full geospatial crate would be
//! dead weight. Distances are in kilometers throughout, matching the
//! persisted `distance_km` field.

use chrono::{DateTime, Utc};

/// Mean Earth radius in kilometers (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two WGS-84 coordinates, in km.
///
/// ## Accuracy
/// Haversine assumes a spherical Earth; error is under 0.5% at vehicle
/// scales, far below GPS fix noise.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

/// The instantaneous speed (km/h) implied by moving between two fixes.
///
/// Returns `None` when the fixes share a timestamp - a zero-duration
/// step has no meaningful speed and must not divide by zero.
pub fn implied_speed_kmh(
    lat1: f64,
    lon1: f64,
    t1: DateTime<Utc>,
    lat2: f64,
    lon2: f64,
    t2: DateTime<Utc>,
) -> Option<f64> {
    let secs = (t2 - t1).num_seconds();
    if secs <= 0 {
        return None;
    }
    let km = haversine_km(lat1, lon1, lat2, lon2);
    Some(km / (secs as f64 / 3600.0))
}

/// Sums haversine distance over an ordered track, discarding any single
/// step whose implied speed exceeds `max_plausible_speed_kmh`.
///
/// GPS jitter shows up as one-point teleports; a single bad fix must
/// not add tens of kilometers to a trip.
pub fn jitter_rejecting_path_km(
    track: &[(f64, f64, DateTime<Utc>)],
    max_plausible_speed_kmh: f64,
) -> f64 {
    let mut total = 0.0;
    for pair in track.windows(2) {
        let (lat1, lon1, t1) = pair[0];
        let (lat2, lon2, t2) = pair[1];

        let step = haversine_km(lat1, lon1, lat2, lon2);
        match implied_speed_kmh(lat1, lon1, t1, lat2, lon2, t2) {
            Some(speed) if speed > max_plausible_speed_kmh => continue,
            // Zero-duration step: only count it if it is small enough to
            // be fix noise rather than a jump.
            None if step > 0.05 => continue,
            _ => total += step,
        }
    }
    total
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, min, sec).unwrap()
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris, ~343.5 km
        let d = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343.5).abs() < 1.5, "got {d}");
    }

    #[test]
    fn test_haversine_zero_for_identical_points() {
        assert_eq!(haversine_km(24.8607, 67.0011, 24.8607, 67.0011), 0.0);
    }

    #[test]
    fn test_implied_speed() {
        // ~1.11 km in 60 seconds -> ~66.7 km/h
        let speed = implied_speed_kmh(0.0, 0.0, at(0, 0), 0.01, 0.0, at(1, 0)).unwrap();
        assert!((speed - 66.7).abs() < 1.0, "got {speed}");

        // Same timestamp -> undefined
        assert!(implied_speed_kmh(0.0, 0.0, at(0, 0), 0.01, 0.0, at(0, 0)).is_none());
    }

    #[test]
    fn test_jitter_rejection_skips_teleport() {
        // Three fixes a minute apart; the middle one teleports ~111 km
        // away (implied speed ~6600 km/h) and must not be counted.
        let clean = vec![
            (0.0, 0.0, at(0, 0)),
            (0.01, 0.0, at(1, 0)),
            (0.02, 0.0, at(2, 0)),
        ];
        let jittered = vec![
            (0.0, 0.0, at(0, 0)),
            (1.0, 0.0, at(1, 0)),
            (0.02, 0.0, at(2, 0)),
        ];

        let clean_km = jitter_rejecting_path_km(&clean, 250.0);
        let jittered_km = jitter_rejecting_path_km(&jittered, 250.0);

        assert!((clean_km - 2.22).abs() < 0.05, "got {clean_km}");
        // Both legs through the teleport are implausible and dropped
        assert!(jittered_km < 0.01, "got {jittered_km}");
    }
}
