//! # Coordinate Reconciliation
//!
//! Repairs trips whose endpoint coordinates are missing because the
//! vehicle had no GPS fix at the ignition transition (cold start in a
//! garage, urban canyon).
//!
//! ## Repair Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  ReconcileEngine::run(request)                          │
//! │                                                                         │
//! │  ReconcileRequest scopes the pass: full sweep, one device, or a        │
//! │  date range - whatever bounds the run time.                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  trips in range WHERE any endpoint is null or (0, 0) (bounded batch)   │
//! │       │                                                                 │
//! │       ▼  per trip, per missing side:                                    │
//! │  nearest fixed point within ± window of the endpoint time              │
//! │       │                                                                 │
//! │       ├── found    → patch (a present coordinate is never              │
//! │       │              overwritten)                                       │
//! │       └── not found → a miss; the trip is retried next pass            │
//! │                                                                         │
//! │  After patching: a placeholder distance is recomputed from the         │
//! │  stored track, with the same jitter rejection segmentation uses.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use tripline_core::geo::jitter_rejecting_path_km;
use tripline_core::{DistanceSource, Trip};
use tripline_db::Database;

/// What to reconcile: a full sweep, one device, or a date slice.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    /// Restrict the pass to one device; `None` sweeps the fleet.
    pub device_id: Option<String>,

    /// Only trips starting at or after this instant.
    pub start: DateTime<Utc>,

    /// Only trips starting at or before this instant.
    pub end: DateTime<Utc>,
}

impl ReconcileRequest {
    /// A fleet-wide sweep over [start, end].
    pub fn sweep(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        ReconcileRequest {
            device_id: None,
            start,
            end,
        }
    }

    /// A single-device pass over [start, end].
    pub fn for_device(device_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        ReconcileRequest {
            device_id: Some(device_id.to_string()),
            start,
            end,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Trips examined this pass.
    pub trips_examined: usize,

    /// Trips that had at least one endpoint coordinate repaired.
    pub trips_patched: usize,

    /// Placeholder distances recomputed from the stored track.
    pub distances_recomputed: usize,

    /// Trips still missing a coordinate after this pass (no usable
    /// fix within the window; retried next pass).
    pub misses: usize,
}

/// Repairs missing trip endpoint coordinates from nearby telemetry.
pub struct ReconcileEngine {
    db: Database,
    config: SyncConfig,
}

impl ReconcileEngine {
    pub fn new(db: Database, config: SyncConfig) -> Self {
        ReconcileEngine { db, config }
    }

    /// Runs one bounded reconciliation pass over the requested scope.
    pub async fn run(&self, request: ReconcileRequest) -> SyncResult<ReconcileReport> {
        let window = Duration::minutes(self.config.reconcile.window_minutes);
        let queue = self
            .db
            .trips()
            .missing_coordinates(
                request.device_id.as_deref(),
                request.start,
                request.end,
                self.config.reconcile.batch_limit,
            )
            .await?;

        let mut report = ReconcileReport {
            trips_examined: queue.len(),
            ..Default::default()
        };

        for trip in &queue {
            self.reconcile_trip(trip, window, &mut report).await?;
        }

        if report.trips_examined > 0 {
            info!(
                examined = report.trips_examined,
                patched = report.trips_patched,
                misses = report.misses,
                "Reconciliation pass complete"
            );
        }

        Ok(report)
    }

    async fn reconcile_trip(
        &self,
        trip: &Trip,
        window: Duration,
        report: &mut ReconcileReport,
    ) -> SyncResult<()> {
        let positions = self.db.positions();

        let start = if trip.start_coordinate_missing() {
            positions
                .find_nearest_fix(&trip.device_id, trip.start_time, window)
                .await?
                .map(|p| (p.lat, p.lon))
        } else {
            None
        };

        let end = match (trip.end_coordinate_missing(), trip.end_time) {
            (true, Some(end_time)) => positions
                .find_nearest_fix(&trip.device_id, end_time, window)
                .await?
                .map(|p| (p.lat, p.lon)),
            _ => None,
        };

        if start.is_some() || end.is_some() {
            report.trips_patched += 1;
            self.db.trips().patch_coordinates(&trip.id, start, end).await?;
            debug!(trip_id = %trip.id, ?start, ?end, "Patched trip coordinates");

            if trip.distance_source == DistanceSource::Placeholder {
                if self.recompute_distance(trip).await? {
                    report.distances_recomputed += 1;
                }
            }
        }

        let start_resolved = !trip.start_coordinate_missing() || start.is_some();
        let end_resolved = !trip.end_coordinate_missing() || end.is_some();
        if !start_resolved || !end_resolved {
            warn!(trip_id = %trip.id, "No usable fix within window, endpoint left as-is");
            report.misses += 1;
        }

        Ok(())
    }

    /// Recomputes a placeholder distance from the stored track,
    /// applying the same jitter rejection segmentation uses.
    async fn recompute_distance(&self, trip: &Trip) -> SyncResult<bool> {
        let Some(end_time) = trip.end_time else {
            return Ok(false);
        };

        let points = self
            .db
            .positions()
            .range(&trip.device_id, trip.start_time, end_time)
            .await?;

        let track: Vec<_> = points
            .iter()
            .filter(|p| p.has_valid_fix())
            .map(|p| (p.lat, p.lon, p.gps_time))
            .collect();

        if track.len() < 2 {
            return Ok(false);
        }

        let distance_km =
            jitter_rejecting_path_km(&track, self.config.segment.max_plausible_speed_kmh);

        let avg_speed_kmh = if trip.duration_seconds > 0 && distance_km > 0.0 {
            Some(distance_km / (trip.duration_seconds as f64 / 3600.0))
        } else {
            None
        };

        self.db
            .trips()
            .update_distance(&trip.id, distance_km, DistanceSource::Haversine, avg_speed_kmh)
            .await?;

        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
