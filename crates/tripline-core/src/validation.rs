//! # Sanity Rules
//!
//! Range clamps and validity checks applied during normalization.
//!
//! ## Philosophy
//! The vendor API is untrusted: units drift, clocks run ahead, and
//! "no fix" is encoded as (0, 0). Every rule here is a pure function so
//! the same record always classifies the same way.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::MAX_SPEED_KMH;

/// Earliest gps_time accepted. Trackers with a dead RTC report epoch
/// zero or GPS-week-rollover dates in the 1990s; none of those are
/// real fixes.
pub fn earliest_plausible_gps_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

/// How far into the future a gps_time may run ahead of the wall clock.
/// Covers ordinary clock skew without accepting garbage years.
pub const MAX_FUTURE_SKEW_MINUTES: i64 = 5;

/// Clamps a parsed gps_time to the sane range.
///
/// Returns `None` when the timestamp is outside
/// `[2000-01-01, now + 5 min]` - the caller rejects such records, the
/// normalizer itself never drops them.
pub fn clamp_gps_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ts < earliest_plausible_gps_time() {
        return None;
    }
    if ts > now + Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
        return None;
    }
    Some(ts)
}

/// Returns true if the pair is a geometrically valid WGS-84 coordinate.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Clamps a reported speed to [0, MAX_SPEED_KMH].
///
/// Returns the clamped value plus a flag marking whether the original
/// was out of range (a sensor error worth surfacing, not a reason to
/// drop the point).
pub fn clamp_speed_kmh(speed: f64) -> (f64, bool) {
    if !speed.is_finite() {
        return (0.0, true);
    }
    if speed < 0.0 {
        (0.0, true)
    } else if speed > MAX_SPEED_KMH {
        (MAX_SPEED_KMH, true)
    } else {
        (speed, false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_clamp_gps_time_rejects_dead_rtc() {
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(clamp_gps_time(epoch, now()), None);

        let rollover = Utc.with_ymd_and_hms(1999, 8, 22, 0, 0, 0).unwrap();
        assert_eq!(clamp_gps_time(rollover, now()), None);
    }

    #[test]
    fn test_clamp_gps_time_allows_small_skew() {
        let slightly_ahead = now() + Duration::minutes(3);
        assert_eq!(clamp_gps_time(slightly_ahead, now()), Some(slightly_ahead));

        let far_ahead = now() + Duration::hours(2);
        assert_eq!(clamp_gps_time(far_ahead, now()), None);
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(is_valid_coordinate(24.8607, 67.0011));
        assert!(is_valid_coordinate(0.0, 0.0)); // geometrically valid, "no fix" is a separate concern
        assert!(!is_valid_coordinate(91.0, 0.0));
        assert!(!is_valid_coordinate(0.0, 181.0));
        assert!(!is_valid_coordinate(f64::NAN, 0.0));
    }

    #[test]
    fn test_speed_clamp() {
        assert_eq!(clamp_speed_kmh(60.0), (60.0, false));
        assert_eq!(clamp_speed_kmh(0.0), (0.0, false));
        assert_eq!(clamp_speed_kmh(200.0), (200.0, false));
        assert_eq!(clamp_speed_kmh(350.0), (200.0, true));
        assert_eq!(clamp_speed_kmh(-4.0), (0.0, true));
        assert_eq!(clamp_speed_kmh(f64::NAN), (0.0, true));
    }
}
