//! # Position Repository
//!
//! Telemetry persistence: the append-only point log plus the
//! one-row-per-device live position cache.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     record_batch(points)                                │
//! │                                                                         │
//! │  For each point (one transaction):                                     │
//! │                                                                         │
//! │  1. INSERT OR IGNORE INTO position_points                              │
//! │     └── UNIQUE(device_id, gps_time) makes overlapping sync             │
//! │         windows a no-op, not a duplicate                               │
//! │                                                                         │
//! │  2. UPSERT INTO latest_positions                                       │
//! │     └── guarded by excluded.gps_time > current.gps_time so a           │
//! │         historical backfill never regresses the live position         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tripline_core::{LatestPosition, PositionPoint};

/// Outcome of a batch insert: how many rows landed vs. how many were
/// already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub duplicates: u64,
}

/// Repository for telemetry point operations.
#[derive(Debug, Clone)]
pub struct PositionRepository {
    pool: SqlitePool,
}

impl PositionRepository {
    /// Creates a new PositionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PositionRepository { pool }
    }

    /// Appends a batch of normalized points and refreshes the live
    /// cache, all in one transaction.
    ///
    /// Duplicate (device_id, gps_time) pairs are silently skipped and
    /// counted in the outcome; re-syncing an overlapping window is
    /// safe by construction.
    pub async fn record_batch(&self, points: &[PositionPoint]) -> DbResult<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for point in points {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO position_points (
                    device_id, gps_time, lat, lon,
                    speed_kmh, heading, ignition_on, ignition_confidence,
                    detection_method, raw_status, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&point.device_id)
            .bind(point.gps_time)
            .bind(point.lat)
            .bind(point.lon)
            .bind(point.speed_kmh)
            .bind(point.heading)
            .bind(point.ignition_on)
            .bind(point.ignition_confidence)
            .bind(point.detection_method)
            .bind(&point.raw_status)
            .bind(point.recorded_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }

            // The cache only ever moves forward in gps_time, so
            // backfilling history cannot regress the live position
            sqlx::query(
                r#"
                INSERT INTO latest_positions (
                    device_id, gps_time, lat, lon, speed_kmh, heading, ignition_on, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(device_id) DO UPDATE SET
                    gps_time = excluded.gps_time,
                    lat = excluded.lat,
                    lon = excluded.lon,
                    speed_kmh = excluded.speed_kmh,
                    heading = excluded.heading,
                    ignition_on = excluded.ignition_on,
                    updated_at = excluded.updated_at
                WHERE excluded.gps_time > latest_positions.gps_time
                "#,
            )
            .bind(&point.device_id)
            .bind(point.gps_time)
            .bind(point.lat)
            .bind(point.lon)
            .bind(point.speed_kmh)
            .bind(point.heading)
            .bind(point.ignition_on)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "Recorded position batch"
        );

        Ok(outcome)
    }

    /// Points for a device within [from, to], gps_time ascending -
    /// the segmentation engine's input window.
    pub async fn range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<PositionPoint>> {
        let points = sqlx::query_as::<_, PositionPoint>(
            r#"
            SELECT device_id, gps_time, lat, lon,
                   speed_kmh, heading, ignition_on, ignition_confidence,
                   detection_method, raw_status, recorded_at
            FROM position_points
            WHERE device_id = ?1 AND gps_time >= ?2 AND gps_time <= ?3
            ORDER BY gps_time ASC
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(points)
    }

    /// The point with a usable GPS fix nearest in time to `around`,
    /// within ± `window`. Feeds coordinate reconciliation.
    ///
    /// Returns `None` when no fixed point falls inside the window -
    /// the caller leaves the trip endpoint null rather than guess.
    pub async fn find_nearest_fix(
        &self,
        device_id: &str,
        around: DateTime<Utc>,
        window: Duration,
    ) -> DbResult<Option<PositionPoint>> {
        let from = around - window;
        let to = around + window;

        let point = sqlx::query_as::<_, PositionPoint>(
            r#"
            SELECT device_id, gps_time, lat, lon,
                   speed_kmh, heading, ignition_on, ignition_confidence,
                   detection_method, raw_status, recorded_at
            FROM position_points
            WHERE device_id = ?1
              AND gps_time >= ?2 AND gps_time <= ?3
              AND NOT (lat = 0 AND lon = 0)
            ORDER BY ABS(strftime('%s', gps_time) - strftime('%s', ?4)) ASC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .bind(around)
        .fetch_optional(&self.pool)
        .await?;

        Ok(point)
    }

    /// The cached live position for a device, if any telemetry has
    /// ever arrived.
    pub async fn latest(&self, device_id: &str) -> DbResult<Option<LatestPosition>> {
        let position = sqlx::query_as::<_, LatestPosition>(
            r#"
            SELECT device_id, gps_time, lat, lon, speed_kmh, heading, ignition_on, updated_at
            FROM latest_positions
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(position)
    }

    /// Deletes telemetry older than the cutoff, returning the number
    /// of rows removed. Retention policy; trips derived from the
    /// deleted points survive.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM position_points WHERE gps_time < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;
    use tripline_core::DetectionMethod;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn point(device_id: &str, h: u32, m: u32, lat: f64, lon: f64) -> PositionPoint {
        PositionPoint {
            device_id: device_id.to_string(),
            gps_time: at(h, m),
            lat,
            lon,
            speed_kmh: Some(40.0),
            heading: None,
            ignition_on: Some(true),
            ignition_confidence: Some(0.9),
            detection_method: DetectionMethod::StringParse,
            raw_status: Some("ACC ON".into()),
            recorded_at: Utc::now(),
        }
    }

    async fn registered(db: &Database) -> String {
        db.devices()
            .register("Truck 7", "vendor-123")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_record_batch_dedup() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.positions();

        let batch = vec![point(&dev, 8, 0, 24.86, 67.00), point(&dev, 8, 5, 24.87, 67.01)];

        let first = repo.record_batch(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.duplicates, 0);

        // Overlapping window re-sync: all duplicates, nothing added
        let second = repo.record_batch(&batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);

        let stored = repo.range(&dev, at(8, 0), at(9, 0)).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].gps_time, at(8, 0));
    }

    #[tokio::test]
    async fn test_latest_cache_never_regresses() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.positions();

        repo.record_batch(&[point(&dev, 9, 0, 25.00, 67.10)])
            .await
            .unwrap();

        // Historical backfill arrives after the newer fix
        repo.record_batch(&[point(&dev, 8, 0, 24.86, 67.00)])
            .await
            .unwrap();

        let latest = repo.latest(&dev).await.unwrap().unwrap();
        assert_eq!(latest.gps_time, at(9, 0));
        assert_eq!(latest.lat, 25.00);
    }

    #[tokio::test]
    async fn test_find_nearest_fix_skips_zero_island() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.positions();

        repo.record_batch(&[
            point(&dev, 8, 0, 0.0, 0.0), // no-fix placeholder
            point(&dev, 8, 4, 24.87, 67.01),
        ])
        .await
        .unwrap();

        let fix = repo
            .find_nearest_fix(&dev, at(8, 0), Duration::minutes(15))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fix.gps_time, at(8, 4));

        // Nothing fixed within a narrow window
        let none = repo
            .find_nearest_fix(&dev, at(8, 0), Duration::minutes(2))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_retention_delete() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.positions();

        repo.record_batch(&[point(&dev, 8, 0, 24.86, 67.00), point(&dev, 10, 0, 24.90, 67.04)])
            .await
            .unwrap();

        let removed = repo.delete_older_than(at(9, 0)).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = repo.range(&dev, at(0, 0), at(23, 0)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].gps_time, at(10, 0));
    }
}
