//! # Trip Segmentation Engine
//!
//! Consumes an ordered sequence of canonical points for one device and
//! emits trip candidates.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Segmentation State Machine                          │
//! │                                                                         │
//! │  MODE SELECTION (per window)                                           │
//! │    explicit ignition coverage ≥ threshold ──► IGNITION MODE            │
//! │    otherwise                              ──► SPEED FALLBACK           │
//! │    neither ignition nor speed signal      ──► NoMotionSignal error     │
//! │                                               (never a fabricated trip)│
//! │                                                                         │
//! │  IGNITION MODE                                                         │
//! │    Closed ──off/null→on──► Open ──on→off──► Settling                   │
//! │                             ▲                  │                        │
//! │                             │ ignition back on │ speed ≤ stopped for   │
//! │                             │ or speed rises   │ settle_window         │
//! │                             └──────────────────┴──► trip closed at the │
//! │                                                     off transition     │
//! │                                                                         │
//! │  SPEED FALLBACK                                                        │
//! │    Closed ──N consecutive samples > moving──► Open (starts at first)   │
//! │    Open   ──speed ≤ stopped for dwell──────► trip closed at the first  │
//! │                                              slow sample               │
//! │                                                                         │
//! │  POST-PROCESSING                                                       │
//! │    distance: vendor odometer delta ► haversine w/ jitter rejection     │
//! │    ghost filter: short AND brief candidates discarded unless           │
//! │                  ignition explicitly confirmed them                    │
//! │    continuity: end(N) vs start(N+1) gap flagged, never dropped         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Idempotence is NOT enforced here: identical input windows produce
//! identical candidates, and the trip table's
//! `(device_id, start_time, end_time)` uniqueness makes re-persisting
//! them a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::geo::{haversine_km, jitter_rejecting_path_km};
use crate::normalize::CanonicalPoint;
use crate::types::DistanceSource;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for the segmentation state machine.
///
/// The settle window is deliberately configuration, not a constant:
/// field deployments disagree on 3 vs. 5 minutes, so the default sits
/// in the middle and operators override per fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// How long speed must stay below `stopped_speed_kmh` after an
    /// on→off transition before the trip closes. Prevents fragmenting
    /// trips at traffic stops.
    pub settle_window_secs: i64,

    /// At or below this speed the vehicle counts as stopped (km/h).
    pub stopped_speed_kmh: f64,

    /// Above this speed the vehicle counts as moving (km/h).
    pub moving_speed_kmh: f64,

    /// Consecutive moving samples required to open a trip in speed
    /// fallback mode.
    pub moving_samples: usize,

    /// Dwell below the stopped threshold that closes a trip in speed
    /// fallback mode.
    pub dwell_window_secs: i64,

    /// Ghost-trip filter: minimum distance...
    pub min_trip_distance_km: f64,

    /// ...and minimum duration. A candidate under BOTH is discarded
    /// unless ignition explicitly confirmed it.
    pub min_trip_duration_secs: i64,

    /// Single-step implied speed above this is GPS jitter; the step is
    /// excluded from the haversine sum.
    pub max_plausible_speed_kmh: f64,

    /// End-of-trip-N to start-of-trip-N+1 gap above this is flagged
    /// for reconciliation/audit.
    pub continuity_tolerance_km: f64,

    /// Fraction of points that must carry an explicit ignition signal
    /// for ignition mode; below it the speed fallback runs.
    pub ignition_coverage_threshold: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            settle_window_secs: 240,
            stopped_speed_kmh: 3.0,
            moving_speed_kmh: 5.0,
            moving_samples: 3,
            dwell_window_secs: 180,
            min_trip_distance_km: 0.5,
            min_trip_duration_secs: 180,
            max_plausible_speed_kmh: 250.0,
            continuity_tolerance_km: 1.0,
            ignition_coverage_threshold: 0.5,
        }
    }
}

// =============================================================================
// Trip Candidate
// =============================================================================

/// A segmented trip before persistence. The orchestrator assigns the
/// UUID and device linkage when it writes the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripCandidate {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,
    pub distance_km: f64,
    pub distance_source: DistanceSource,
    pub duration_seconds: i64,
    pub avg_speed_kmh: Option<f64>,
    pub max_speed_kmh: Option<f64>,

    /// True when explicit ignition signals bound the trip - what lets
    /// a short candidate through the ghost filter.
    pub ignition_confirmed: bool,

    /// Set by [`check_continuity`] when the gap from the previous
    /// trip's end exceeds tolerance.
    pub continuity_flagged: bool,
}

// =============================================================================
// Segmenter
// =============================================================================

/// Per-device trip segmentation over an ordered point window.
#[derive(Debug, Clone)]
pub struct TripSegmenter {
    config: SegmentConfig,
}

/// An in-progress trip while scanning the window.
struct OpenTrip {
    /// Points accumulated since the start transition, in order.
    points: Vec<CanonicalPoint>,
    /// Index into `points` of the candidate end (the off transition /
    /// first slow sample), while the settle/dwell clock runs.
    pending_end: Option<usize>,
    /// The start transition came from an explicit ignition signal.
    started_explicit: bool,
}

impl TripSegmenter {
    pub fn new(config: SegmentConfig) -> Self {
        TripSegmenter { config }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Segments one window of points into trip candidates.
    ///
    /// ## Contract
    /// - `points` must be gps_time-ascending; out-of-order input is an
    ///   error, not silently reordered.
    /// - Points with a null gps_time were rejected upstream and must
    ///   not appear here; they are skipped defensively.
    /// - A window with neither ignition nor speed signal yields
    ///   [`CoreError::NoMotionSignal`] - the engine never fabricates a
    ///   trip from nothing.
    pub fn segment(
        &self,
        device_id: &str,
        points: &[CanonicalPoint],
    ) -> CoreResult<Vec<TripCandidate>> {
        let timed: Vec<&CanonicalPoint> =
            points.iter().filter(|p| p.gps_time.is_some()).collect();

        if timed.is_empty() {
            return Ok(Vec::new());
        }

        // Ordering is the caller's contract
        for (i, pair) in timed.windows(2).enumerate() {
            if pair[1].gps_time < pair[0].gps_time {
                return Err(CoreError::UnorderedPoints { index: i + 1 });
            }
        }

        let explicit = timed
            .iter()
            .filter(|p| p.detection_method.is_explicit())
            .count();
        let has_speed = timed.iter().any(|p| p.speed_kmh.is_some());
        let coverage = explicit as f64 / timed.len() as f64;

        if explicit == 0 && !has_speed {
            return Err(CoreError::NoMotionSignal {
                device_id: device_id.to_string(),
            });
        }

        let candidates = if coverage >= self.config.ignition_coverage_threshold {
            self.segment_by_ignition(&timed)
        } else {
            self.segment_by_speed(&timed)
        };

        Ok(candidates
            .into_iter()
            .filter(|c| self.passes_ghost_filter(c))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Primary mode: ignition transitions
    // -------------------------------------------------------------------------

    fn segment_by_ignition(&self, points: &[&CanonicalPoint]) -> Vec<TripCandidate> {
        let mut trips = Vec::new();
        let mut open: Option<OpenTrip> = None;

        for point in points {
            let t = point.gps_time.expect("filtered above");
            let slow = point
                .speed_kmh
                .map(|s| s <= self.config.stopped_speed_kmh)
                .unwrap_or(true);

            match open.as_mut() {
                None => {
                    // Trip starts at the first off/null → on transition
                    if point.ignition_on == Some(true) {
                        open = Some(OpenTrip {
                            points: vec![(*point).clone()],
                            pending_end: None,
                            started_explicit: point.detection_method.is_explicit(),
                        });
                    }
                }
                Some(trip) => {
                    // A pending end whose settle window has already
                    // elapsed ends the trip back at the off sample.
                    // Sparse feeds go silent while parked, so the next
                    // sample can arrive hours later - it belongs to the
                    // next trip, not this one.
                    if let Some(pending) = trip.pending_end {
                        let pending_t = trip.points[pending].gps_time.expect("filtered");
                        if (t - pending_t).num_seconds() >= self.config.settle_window_secs {
                            trips.push(self.close_trip(trip, pending));
                            open = if point.ignition_on == Some(true) {
                                Some(OpenTrip {
                                    points: vec![(*point).clone()],
                                    pending_end: None,
                                    started_explicit: point.detection_method.is_explicit(),
                                })
                            } else {
                                None
                            };
                            continue;
                        }
                    }

                    trip.points.push((*point).clone());
                    let idx = trip.points.len() - 1;

                    match point.ignition_on {
                        Some(false) => {
                            match trip.pending_end {
                                None if slow => trip.pending_end = Some(idx),
                                // Still rolling after the off signal:
                                // the settle clock starts once it slows
                                None => {}
                                // Moved again before settling: restart
                                // the clock at the next stop
                                Some(_) if !slow => trip.pending_end = None,
                                Some(_) => {}
                            }
                        }
                        // Ignition back on within the settle window: a
                        // traffic stop, not a trip end
                        Some(true) => trip.pending_end = None,
                        None => {}
                    }
                }
            }
        }

        // Window ended mid-trip: close at the last seen point
        if let Some(trip) = open.as_ref() {
            let last = trip.points.len() - 1;
            trips.push(self.close_trip(trip, last));
        }

        trips
    }

    // -------------------------------------------------------------------------
    // Fallback mode: sustained speed
    // -------------------------------------------------------------------------

    fn segment_by_speed(&self, points: &[&CanonicalPoint]) -> Vec<TripCandidate> {
        let mut trips = Vec::new();
        let mut open: Option<OpenTrip> = None;
        // Run of consecutive moving samples, kept so the trip can start
        // at the FIRST of them once the run is long enough
        let mut moving_run: Vec<CanonicalPoint> = Vec::new();

        for point in points {
            let t = point.gps_time.expect("filtered above");
            let speed = point.speed_kmh;

            match open.as_mut() {
                None => {
                    if speed.map(|s| s > self.config.moving_speed_kmh).unwrap_or(false) {
                        moving_run.push((*point).clone());
                        if moving_run.len() >= self.config.moving_samples {
                            open = Some(OpenTrip {
                                points: std::mem::take(&mut moving_run),
                                pending_end: None,
                                started_explicit: false,
                            });
                        }
                    } else if speed.is_some() {
                        moving_run.clear();
                    }
                    // speed == None: no signal, the run neither grows nor resets
                }
                Some(trip) => {
                    // An expired dwell clock ends the trip at the first
                    // slow sample, however late this sample arrives
                    if let Some(pending) = trip.pending_end {
                        let pending_t = trip.points[pending].gps_time.expect("filtered");
                        if (t - pending_t).num_seconds() >= self.config.dwell_window_secs {
                            trips.push(self.close_trip(trip, pending));
                            open = None;
                            moving_run.clear();
                            if speed.map(|s| s > self.config.moving_speed_kmh).unwrap_or(false) {
                                moving_run.push((*point).clone());
                                if moving_run.len() >= self.config.moving_samples {
                                    open = Some(OpenTrip {
                                        points: std::mem::take(&mut moving_run),
                                        pending_end: None,
                                        started_explicit: false,
                                    });
                                }
                            }
                            continue;
                        }
                    }

                    trip.points.push((*point).clone());
                    let idx = trip.points.len() - 1;

                    match speed {
                        Some(s) if s <= self.config.stopped_speed_kmh => {
                            trip.pending_end.get_or_insert(idx);
                        }
                        Some(s) if s > self.config.stopped_speed_kmh => {
                            trip.pending_end = None;
                        }
                        _ => {}
                    }
                }
            }
        }

        if let Some(trip) = open.as_ref() {
            let last = trip.points.len() - 1;
            trips.push(self.close_trip(trip, last));
        }

        trips
    }

    // -------------------------------------------------------------------------
    // Candidate construction
    // -------------------------------------------------------------------------

    /// Builds a candidate from an open trip, ending at `end_idx`
    /// (points after it are the idle tail observed while settling).
    fn close_trip(&self, trip: &OpenTrip, end_idx: usize) -> TripCandidate {
        let span = &trip.points[..=end_idx];
        let start = &span[0];
        let end = &span[span.len() - 1];

        let start_time = start.gps_time.expect("filtered");
        let end_time = end.gps_time.expect("filtered");
        let duration_seconds = (end_time - start_time).num_seconds();

        let (distance_km, distance_source) = self.trip_distance(span);

        let max_speed_kmh = span
            .iter()
            .filter_map(|p| p.speed_kmh)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

        let avg_speed_kmh = if duration_seconds > 0 && distance_km > 0.0 {
            Some(distance_km / (duration_seconds as f64 / 3600.0))
        } else {
            None
        };

        let end_explicit = end.detection_method.is_explicit();

        let coord = |p: &CanonicalPoint| -> (Option<f64>, Option<f64>) {
            if p.lat != 0.0 || p.lon != 0.0 {
                (Some(p.lat), Some(p.lon))
            } else {
                // (0, 0) is the vendor's no-fix placeholder; left null
                // for the reconciliation engine to repair
                (None, None)
            }
        };
        let (start_lat, start_lon) = coord(start);
        let (end_lat, end_lon) = coord(end);

        TripCandidate {
            start_time,
            end_time,
            start_lat,
            start_lon,
            end_lat,
            end_lon,
            distance_km,
            distance_source,
            duration_seconds,
            avg_speed_kmh,
            max_speed_kmh,
            ignition_confirmed: trip.started_explicit && end_explicit,
            continuity_flagged: false,
        }
    }

    /// Distance for a trip span: vendor odometer delta when available
    /// (source of truth), haversine sum with jitter rejection otherwise.
    fn trip_distance(&self, span: &[CanonicalPoint]) -> (f64, DistanceSource) {
        let first_odo = span.iter().find_map(|p| p.odometer_km);
        let last_odo = span.iter().rev().find_map(|p| p.odometer_km);

        if let (Some(first), Some(last)) = (first_odo, last_odo) {
            let delta = last - first;
            // A negative delta means the odometer reset mid-trip; fall
            // back to haversine rather than persist garbage
            if delta >= 0.0 {
                return (delta, DistanceSource::Vendor);
            }
        }

        let track: Vec<(f64, f64, DateTime<Utc>)> = span
            .iter()
            .filter(|p| p.lat != 0.0 || p.lon != 0.0)
            .filter_map(|p| p.gps_time.map(|t| (p.lat, p.lon, t)))
            .collect();

        if track.len() < 2 {
            return (0.0, DistanceSource::Placeholder);
        }

        (
            jitter_rejecting_path_km(&track, self.config.max_plausible_speed_kmh),
            DistanceSource::Haversine,
        )
    }

    // -------------------------------------------------------------------------
    // Ghost-trip filter
    // -------------------------------------------------------------------------

    /// A candidate below the minimum distance AND duration is noise -
    /// unless explicit ignition signals bound it, in which case the
    /// vehicle really did run briefly.
    fn passes_ghost_filter(&self, candidate: &TripCandidate) -> bool {
        let too_short = candidate.distance_km < self.config.min_trip_distance_km;
        let too_brief = candidate.duration_seconds < self.config.min_trip_duration_secs;

        !(too_short && too_brief) || candidate.ignition_confirmed
    }
}

// =============================================================================
// Continuity Check
// =============================================================================

/// Flags consecutive trip pairs whose end→start gap exceeds tolerance.
///
/// The flag lands on the LATER trip of the pair (its start is what
/// jumped). Violations are flagged for reconciliation/audit, never
/// dropped. Returns the number of flagged pairs.
pub fn check_continuity(trips: &mut [TripCandidate], tolerance_km: f64) -> usize {
    let mut flagged = 0;

    for i in 1..trips.len() {
        let gap = match (
            trips[i - 1].end_lat,
            trips[i - 1].end_lon,
            trips[i].start_lat,
            trips[i].start_lon,
        ) {
            (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => {
                Some(haversine_km(lat1, lon1, lat2, lon2))
            }
            // A missing endpoint is reconciliation's problem, not a
            // continuity violation
            _ => None,
        };

        if let Some(gap) = gap {
            if gap > tolerance_km {
                trips[i].continuity_flagged = true;
                flagged += 1;
            }
        }
    }

    flagged
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectionMethod;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    /// A point with explicit (string-parsed) ignition.
    fn ign_point(h: u32, m: u32, on: bool, speed: f64, lat: f64, lon: f64) -> CanonicalPoint {
        CanonicalPoint {
            device_id: "dev-1".into(),
            lat,
            lon,
            speed_kmh: Some(speed),
            speed_flagged: false,
            heading: None,
            ignition_on: Some(on),
            ignition_confidence: 0.9,
            detection_method: DetectionMethod::StringParse,
            gps_time: Some(at(h, m)),
            raw_status: Some(if on { "ACC ON" } else { "ACC OFF" }.into()),
            odometer_km: None,
        }
    }

    /// A point with no ignition signal at all (speed fallback fodder).
    fn speed_point(h: u32, m: u32, speed: Option<f64>, lat: f64, lon: f64) -> CanonicalPoint {
        CanonicalPoint {
            device_id: "dev-1".into(),
            lat,
            lon,
            speed_kmh: speed,
            speed_flagged: false,
            heading: None,
            ignition_on: None,
            ignition_confidence: 0.0,
            detection_method: DetectionMethod::Unknown,
            gps_time: Some(at(h, m)),
            raw_status: None,
            odometer_km: None,
        }
    }

    fn segmenter() -> TripSegmenter {
        TripSegmenter::new(SegmentConfig::default())
    }

    // -------------------------------------------------------------------------
    // Scenario A: ignition-bounded trip with haversine distance
    // -------------------------------------------------------------------------

    #[test]
    fn test_scenario_a_single_ignition_trip() {
        // 08:00 on, speed 0 → 08:05 on, speed 40 → 08:20 off, speed 0,
        // stays off for 5 minutes → exactly one trip ~08:00-08:20.
        let points = vec![
            ign_point(8, 0, true, 0.0, 24.8600, 67.0000),
            ign_point(8, 5, true, 40.0, 24.8700, 67.0100),
            ign_point(8, 10, true, 45.0, 24.8800, 67.0200),
            ign_point(8, 20, false, 0.0, 24.9000, 67.0400),
            ign_point(8, 22, false, 0.0, 24.9000, 67.0400),
            ign_point(8, 25, false, 0.0, 24.9000, 67.0400),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);

        let trip = &trips[0];
        assert_eq!(trip.start_time, at(8, 0));
        assert_eq!(trip.end_time, at(8, 20));
        assert_eq!(trip.duration_seconds, 1200);
        assert_eq!(trip.distance_source, DistanceSource::Haversine);
        // ~4.7 km of haversine-summed track
        assert!(trip.distance_km > 4.0 && trip.distance_km < 6.0, "got {}", trip.distance_km);
        assert_eq!(trip.max_speed_kmh, Some(45.0));
        assert!(trip.ignition_confirmed);
    }

    #[test]
    fn test_traffic_stop_does_not_fragment_trip() {
        // Ignition flickers off at a stop for under the settle window,
        // then the vehicle drives on: still one trip.
        let points = vec![
            ign_point(8, 0, true, 30.0, 24.8600, 67.0000),
            ign_point(8, 5, false, 0.0, 24.8700, 67.0100), // red light
            ign_point(8, 7, true, 35.0, 24.8750, 67.0150), // moving again within 4 min
            ign_point(8, 15, true, 40.0, 24.8900, 67.0300),
            ign_point(8, 20, false, 0.0, 24.9000, 67.0400),
            ign_point(8, 26, false, 0.0, 24.9000, 67.0400),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_time, at(8, 0));
        assert_eq!(trips[0].end_time, at(8, 20));
    }

    #[test]
    fn test_two_trips_split_by_settled_stop() {
        let points = vec![
            ign_point(8, 0, true, 30.0, 24.8600, 67.0000),
            ign_point(8, 10, true, 40.0, 24.8800, 67.0200),
            ign_point(8, 15, false, 0.0, 24.8900, 67.0300),
            ign_point(8, 20, false, 0.0, 24.8900, 67.0300), // settled: 5 min off
            ign_point(9, 0, true, 30.0, 24.8900, 67.0300),
            ign_point(9, 10, true, 40.0, 24.9100, 67.0500),
            ign_point(9, 15, false, 0.0, 24.9200, 67.0600),
            ign_point(9, 20, false, 0.0, 24.9200, 67.0600),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].end_time, at(8, 15));
        assert_eq!(trips[1].start_time, at(9, 0));
    }

    #[test]
    fn test_sparse_feed_gap_splits_trips_in_ignition_mode() {
        // The tracker goes silent while parked: off at 08:15, then
        // nothing until the next drive's on at 12:00. The settle window
        // elapsed during the silence, so these are two trips - the gap
        // is a parked morning, not a traffic stop.
        let points = vec![
            ign_point(8, 0, true, 30.0, 24.8600, 67.0000),
            ign_point(8, 10, true, 40.0, 24.8800, 67.0200),
            ign_point(8, 15, false, 0.0, 24.8900, 67.0300),
            ign_point(12, 0, true, 30.0, 24.8900, 67.0300),
            ign_point(12, 10, true, 40.0, 24.9100, 67.0500),
            ign_point(12, 15, false, 0.0, 24.9200, 67.0600),
            ign_point(12, 20, false, 0.0, 24.9200, 67.0600),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 2, "gap must split: {trips:?}");
        assert_eq!(trips[0].start_time, at(8, 0));
        assert_eq!(trips[0].end_time, at(8, 15));
        assert_eq!(trips[1].start_time, at(12, 0));
        assert_eq!(trips[1].end_time, at(12, 15));
    }

    #[test]
    fn test_sparse_feed_gap_splits_trips_in_speed_mode() {
        // Same silence-while-parked shape with no ignition signal: the
        // dwell clock expired during the gap, so the noon samples open
        // a fresh trip instead of extending the morning one.
        let points = vec![
            speed_point(8, 0, Some(20.0), 24.8600, 67.0000),
            speed_point(8, 2, Some(30.0), 24.8650, 67.0050),
            speed_point(8, 4, Some(35.0), 24.8700, 67.0100),
            speed_point(8, 15, Some(0.0), 24.8900, 67.0300),
            speed_point(12, 0, Some(30.0), 24.8900, 67.0300),
            speed_point(12, 2, Some(35.0), 24.8950, 67.0350),
            speed_point(12, 4, Some(40.0), 24.9000, 67.0400),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 2, "gap must split: {trips:?}");
        assert_eq!(trips[0].start_time, at(8, 0));
        assert_eq!(trips[0].end_time, at(8, 15));
        assert_eq!(trips[1].start_time, at(12, 0));
        assert_eq!(trips[1].end_time, at(12, 4));
    }

    // -------------------------------------------------------------------------
    // Scenario B: vendor odometer delta wins
    // -------------------------------------------------------------------------

    #[test]
    fn test_scenario_b_vendor_distance_is_exact() {
        let mut points = vec![
            ign_point(8, 0, true, 0.0, 24.8600, 67.0000),
            ign_point(8, 10, true, 50.0, 24.9000, 67.0400),
            ign_point(8, 20, false, 0.0, 24.9500, 67.0900),
            ign_point(8, 25, false, 0.0, 24.9500, 67.0900),
        ];
        points[0].odometer_km = Some(1000.0);
        points[2].odometer_km = Some(1012.4);

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].distance_km, 12.4);
        assert_eq!(trips[0].distance_source, DistanceSource::Vendor);
    }

    // -------------------------------------------------------------------------
    // Speed fallback mode
    // -------------------------------------------------------------------------

    #[test]
    fn test_speed_fallback_trip() {
        // No ignition signal anywhere: speed thresholds drive the split.
        let points = vec![
            speed_point(8, 0, Some(0.0), 24.8600, 67.0000),
            speed_point(8, 2, Some(20.0), 24.8620, 67.0020), // run 1
            speed_point(8, 4, Some(30.0), 24.8700, 67.0100), // run 2
            speed_point(8, 6, Some(35.0), 24.8800, 67.0200), // run 3 → trip opens at 08:02
            speed_point(8, 10, Some(40.0), 24.8900, 67.0300),
            speed_point(8, 15, Some(0.0), 24.9000, 67.0400), // dwell starts
            speed_point(8, 19, Some(0.0), 24.9000, 67.0400), // 4 min ≥ dwell → closed
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_time, at(8, 2));
        assert_eq!(trips[0].end_time, at(8, 15));
        assert!(!trips[0].ignition_confirmed);
    }

    #[test]
    fn test_speed_fallback_requires_consecutive_samples() {
        // Isolated spikes never reach moving_samples: no trip.
        let points = vec![
            speed_point(8, 0, Some(25.0), 24.8600, 67.0000),
            speed_point(8, 2, Some(0.0), 24.8600, 67.0000),
            speed_point(8, 4, Some(28.0), 24.8600, 67.0000),
            speed_point(8, 6, Some(0.0), 24.8600, 67.0000),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert!(trips.is_empty());
    }

    // -------------------------------------------------------------------------
    // Ghost-trip filter
    // -------------------------------------------------------------------------

    #[test]
    fn test_ghost_trip_discarded() {
        // A 90-second, ~200 m burst with no explicit ignition: noise.
        let at_s = |m: u32, s: u32| Utc.with_ymd_and_hms(2024, 3, 1, 8, m, s).unwrap();
        let burst = |m: u32, s: u32, speed: f64, lat: f64| CanonicalPoint {
            gps_time: Some(at_s(m, s)),
            speed_kmh: Some(speed),
            lat,
            ..speed_point(8, 0, None, 0.0, 67.00000)
        };

        let points = vec![
            burst(0, 0, 10.0, 24.86000),
            burst(0, 30, 12.0, 24.86090), // ~100 m
            burst(1, 0, 11.0, 24.86180),  // ~200 m total, trip opens
            burst(1, 30, 0.0, 24.86180),  // dwell starts: candidate end
            burst(5, 0, 0.0, 24.86180),   // dwell elapsed, trip closes at 08:01:30
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert!(trips.is_empty(), "ghost trip must be filtered: {trips:?}");
    }

    #[test]
    fn test_short_trip_kept_when_ignition_confirms() {
        // Same scale of burst, but bounded by explicit ACC signals:
        // the vehicle really ran, keep it.
        let points = vec![
            ign_point(8, 0, true, 10.0, 24.86000, 67.00000),
            ign_point(8, 1, true, 12.0, 24.86090, 67.00000),
            ign_point(8, 2, false, 0.0, 24.86180, 67.00000),
            ign_point(8, 7, false, 0.0, 24.86180, 67.00000),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert!(trips[0].ignition_confirmed);
    }

    // -------------------------------------------------------------------------
    // Signal absence and contract violations
    // -------------------------------------------------------------------------

    #[test]
    fn test_no_signal_window_is_an_error_not_a_trip() {
        let points = vec![
            speed_point(8, 0, None, 24.8600, 67.0000),
            speed_point(8, 5, None, 24.8700, 67.0100),
        ];

        let err = segmenter().segment("dev-1", &points).unwrap_err();
        assert!(matches!(err, CoreError::NoMotionSignal { .. }));
    }

    #[test]
    fn test_unordered_points_rejected() {
        let points = vec![
            ign_point(8, 10, true, 30.0, 24.8600, 67.0000),
            ign_point(8, 0, true, 30.0, 24.8700, 67.0100),
        ];

        let err = segmenter().segment("dev-1", &points).unwrap_err();
        assert_eq!(err, CoreError::UnorderedPoints { index: 1 });
    }

    #[test]
    fn test_empty_window_yields_no_trips() {
        assert!(segmenter().segment("dev-1", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_dangling_trip_closed_at_window_end() {
        // Ignition never goes off inside the window: the trip closes at
        // the last seen point.
        let points = vec![
            ign_point(8, 0, true, 30.0, 24.8600, 67.0000),
            ign_point(8, 10, true, 40.0, 24.8800, 67.0200),
        ];

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].end_time, at(8, 10));
    }

    #[test]
    fn test_missing_fix_yields_null_coordinates() {
        // (0, 0) endpoints are left null for reconciliation.
        let mut points = vec![
            ign_point(8, 0, true, 30.0, 0.0, 0.0),
            ign_point(8, 10, true, 40.0, 24.8800, 67.0200),
            ign_point(8, 20, false, 0.0, 24.9000, 67.0400),
            ign_point(8, 25, false, 0.0, 24.9000, 67.0400),
        ];
        points[0].odometer_km = None;

        let trips = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].start_lat, None);
        assert_eq!(trips[0].start_lon, None);
        assert_eq!(trips[0].end_lat, Some(24.9000));
    }

    #[test]
    fn test_determinism_same_window_same_candidates() {
        let points = vec![
            ign_point(8, 0, true, 0.0, 24.8600, 67.0000),
            ign_point(8, 5, true, 40.0, 24.8700, 67.0100),
            ign_point(8, 20, false, 0.0, 24.9000, 67.0400),
            ign_point(8, 25, false, 0.0, 24.9000, 67.0400),
        ];

        let first = segmenter().segment("dev-1", &points).unwrap();
        let second = segmenter().segment("dev-1", &points).unwrap();
        assert_eq!(first, second);
    }

    // -------------------------------------------------------------------------
    // Continuity
    // -------------------------------------------------------------------------

    #[test]
    fn test_continuity_flags_large_jump() {
        let base = TripCandidate {
            start_time: at(8, 0),
            end_time: at(8, 20),
            start_lat: Some(24.8600),
            start_lon: Some(67.0000),
            end_lat: Some(24.9000),
            end_lon: Some(67.0400),
            distance_km: 5.0,
            distance_source: DistanceSource::Haversine,
            duration_seconds: 1200,
            avg_speed_kmh: None,
            max_speed_kmh: None,
            ignition_confirmed: true,
            continuity_flagged: false,
        };

        // Second trip starts right where the first ended: fine.
        let mut contiguous = vec![
            base.clone(),
            TripCandidate {
                start_time: at(9, 0),
                end_time: at(9, 30),
                start_lat: Some(24.9001),
                start_lon: Some(67.0401),
                ..base.clone()
            },
        ];
        assert_eq!(check_continuity(&mut contiguous, 1.0), 0);
        assert!(!contiguous[1].continuity_flagged);

        // Third trip starts ~50 km away: flagged, not dropped.
        let mut jumped = vec![
            base.clone(),
            TripCandidate {
                start_time: at(9, 0),
                end_time: at(9, 30),
                start_lat: Some(25.3000),
                start_lon: Some(67.0400),
                ..base
            },
        ];
        assert_eq!(check_continuity(&mut jumped, 1.0), 1);
        assert!(jumped[1].continuity_flagged);
        assert_eq!(jumped.len(), 2);
    }
}
