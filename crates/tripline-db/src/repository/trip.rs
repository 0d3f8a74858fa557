//! # Trip Repository
//!
//! Trip persistence, coordinate patching, and continuity flags.
//!
//! ## Idempotence
//! `UNIQUE(device_id, start_time, end_time)` plus `INSERT OR IGNORE`
//! means re-segmenting an already-processed window writes zero new
//! rows. Only closed trips are persisted; an in-progress trip has no
//! stable end_time to key on.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tripline_core::{DistanceSource, Trip};

/// Repository for trip database operations.
#[derive(Debug, Clone)]
pub struct TripRepository {
    pool: SqlitePool,
}

impl TripRepository {
    /// Creates a new TripRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TripRepository { pool }
    }

    /// Inserts a trip, returning `true` if a row was written and
    /// `false` if an identical (device, start, end) trip already
    /// existed.
    pub async fn insert(&self, trip: &Trip) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trips (
                id, device_id, start_time, end_time,
                start_lat, start_lon, end_lat, end_lon,
                distance_km, distance_source, duration_seconds,
                avg_speed_kmh, max_speed_kmh, continuity_flagged, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&trip.id)
        .bind(&trip.device_id)
        .bind(trip.start_time)
        .bind(trip.end_time)
        .bind(trip.start_lat)
        .bind(trip.start_lon)
        .bind(trip.end_lat)
        .bind(trip.end_lon)
        .bind(trip.distance_km)
        .bind(trip.distance_source)
        .bind(trip.duration_seconds)
        .bind(trip.avg_speed_kmh)
        .bind(trip.max_speed_kmh)
        .bind(trip.continuity_flagged)
        .bind(trip.created_at)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() == 1;
        debug!(id = %trip.id, device_id = %trip.device_id, written, "Trip insert");
        Ok(written)
    }

    /// Gets a trip by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Trip>> {
        let trip = sqlx::query_as::<_, Trip>(
            r#"
            SELECT id, device_id, start_time, end_time,
                   start_lat, start_lon, end_lat, end_lon,
                   distance_km, distance_source, duration_seconds,
                   avg_speed_kmh, max_speed_kmh, continuity_flagged, created_at
            FROM trips
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(trip)
    }

    /// Trips for a device within [from, to] by start_time, ascending.
    pub async fn for_device(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Trip>> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"
            SELECT id, device_id, start_time, end_time,
                   start_lat, start_lon, end_lat, end_lon,
                   distance_km, distance_source, duration_seconds,
                   avg_speed_kmh, max_speed_kmh, continuity_flagged, created_at
            FROM trips
            WHERE device_id = ?1 AND start_time >= ?2 AND start_time <= ?3
            ORDER BY start_time ASC
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(trips)
    }

    /// Trips within [from, to] with at least one missing endpoint
    /// coordinate - the reconciliation engine's work queue. A (0, 0)
    /// endpoint is the vendor's no-fix placeholder and counts as
    /// missing. `device_id` scopes the sweep to one device when set.
    pub async fn missing_coordinates(
        &self,
        device_id: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Trip>> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"
            SELECT id, device_id, start_time, end_time,
                   start_lat, start_lon, end_lat, end_lon,
                   distance_km, distance_source, duration_seconds,
                   avg_speed_kmh, max_speed_kmh, continuity_flagged, created_at
            FROM trips
            WHERE (start_lat IS NULL OR start_lon IS NULL
                OR end_lat IS NULL OR end_lon IS NULL
                OR (start_lat = 0 AND start_lon = 0)
                OR (end_lat = 0 AND end_lon = 0))
              AND start_time >= ?1 AND start_time <= ?2
              AND (?3 IS NULL OR device_id = ?3)
            ORDER BY start_time ASC
            LIMIT ?4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(trips)
    }

    /// Patches missing endpoint coordinates. A `None` side is left
    /// untouched, and a coordinate that is already present (non-null
    /// and not the (0, 0) placeholder) is never overwritten.
    pub async fn patch_coordinates(
        &self,
        id: &str,
        start: Option<(f64, f64)>,
        end: Option<(f64, f64)>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trips SET
                start_lat = CASE
                    WHEN ?1 IS NOT NULL AND (start_lat IS NULL OR (start_lat = 0 AND start_lon = 0))
                    THEN ?1 ELSE start_lat END,
                start_lon = CASE
                    WHEN ?2 IS NOT NULL AND (start_lon IS NULL OR (start_lat = 0 AND start_lon = 0))
                    THEN ?2 ELSE start_lon END,
                end_lat = CASE
                    WHEN ?3 IS NOT NULL AND (end_lat IS NULL OR (end_lat = 0 AND end_lon = 0))
                    THEN ?3 ELSE end_lat END,
                end_lon = CASE
                    WHEN ?4 IS NOT NULL AND (end_lon IS NULL OR (end_lat = 0 AND end_lon = 0))
                    THEN ?4 ELSE end_lon END
            WHERE id = ?5
            "#,
        )
        .bind(start.map(|(lat, _)| lat))
        .bind(start.map(|(_, lon)| lon))
        .bind(end.map(|(lat, _)| lat))
        .bind(end.map(|(_, lon)| lon))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Trip", id));
        }

        Ok(())
    }

    /// Replaces a placeholder distance after reconciliation recomputed
    /// it from repaired endpoints.
    pub async fn update_distance(
        &self,
        id: &str,
        distance_km: f64,
        source: DistanceSource,
        avg_speed_kmh: Option<f64>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trips SET distance_km = ?1, distance_source = ?2, avg_speed_kmh = ?3
            WHERE id = ?4
            "#,
        )
        .bind(distance_km)
        .bind(source)
        .bind(avg_speed_kmh)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Trip", id));
        }

        Ok(())
    }

    /// Sets the continuity flag on a trip.
    pub async fn flag_continuity(&self, id: &str, flagged: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE trips SET continuity_flagged = ?1 WHERE id = ?2")
            .bind(flagged)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Trip", id));
        }

        Ok(())
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
    use uuid::Uuid;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn trip(device_id: &str, start_h: u32, end_h: u32) -> Trip {
        Trip {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            start_time: at(start_h, 0),
            end_time: Some(at(end_h, 0)),
            start_lat: Some(24.86),
            start_lon: Some(67.00),
            end_lat: Some(24.90),
            end_lon: Some(67.04),
            distance_km: 5.0,
            distance_source: DistanceSource::Haversine,
            duration_seconds: 3600,
            avg_speed_kmh: Some(5.0),
            max_speed_kmh: Some(45.0),
            continuity_flagged: false,
            created_at: Utc::now(),
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
    async fn test_insert_is_idempotent_on_same_window() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        let first = trip(&dev, 8, 9);
        assert!(repo.insert(&first).await.unwrap());

        // Same (device, start, end) under a fresh UUID: ignored
        let replay = Trip {
            id: Uuid::new_v4().to_string(),
            ..first.clone()
        };
        assert!(!repo.insert(&replay).await.unwrap());

        let stored = repo.for_device(&dev, at(0, 0), at(23, 0)).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, first.id);
    }

    #[tokio::test]
    async fn test_missing_coordinates_queue_and_patch() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        let mut broken = trip(&dev, 8, 9);
        broken.start_lat = None;
        broken.start_lon = None;
        repo.insert(&broken).await.unwrap();

        let complete = trip(&dev, 10, 11);
        repo.insert(&complete).await.unwrap();

        let queue = repo
            .missing_coordinates(None, at(0, 0), at(23, 0), 10)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, broken.id);

        repo.patch_coordinates(&broken.id, Some((24.87, 67.01)), None)
            .await
            .unwrap();

        assert!(repo
            .missing_coordinates(None, at(0, 0), at(23, 0), 10)
            .await
            .unwrap()
            .is_empty());

        let patched = repo.get_by_id(&broken.id).await.unwrap().unwrap();
        assert_eq!(patched.start_lat, Some(24.87));
        // The end side, already present, was untouched
        assert_eq!(patched.end_lat, Some(24.90));
    }

    #[tokio::test]
    async fn test_zero_coordinate_counts_as_missing() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        // A persisted (0, 0) no-fix endpoint must enter the queue and
        // be repairable, same as a null one
        let mut no_fix = trip(&dev, 8, 9);
        no_fix.start_lat = Some(0.0);
        no_fix.start_lon = Some(0.0);
        repo.insert(&no_fix).await.unwrap();

        let queue = repo
            .missing_coordinates(None, at(0, 0), at(23, 0), 10)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, no_fix.id);

        repo.patch_coordinates(&no_fix.id, Some((24.87, 67.01)), None)
            .await
            .unwrap();

        let patched = repo.get_by_id(&no_fix.id).await.unwrap().unwrap();
        assert_eq!(patched.start_lat, Some(24.87));
        assert_eq!(patched.start_lon, Some(67.01));
        assert!(repo
            .missing_coordinates(None, at(0, 0), at(23, 0), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_coordinates_scoped_by_device_and_range() {
        let db = test_db().await;
        let truck = registered(&db).await;
        let van = db.devices().register("Van 2", "vendor-456").await.unwrap().id;
        let repo = db.trips();

        let mut truck_early = trip(&truck, 6, 7);
        truck_early.end_lat = None;
        let mut truck_late = trip(&truck, 14, 15);
        truck_late.end_lat = None;
        let mut van_broken = trip(&van, 8, 9);
        van_broken.start_lat = None;
        repo.insert(&truck_early).await.unwrap();
        repo.insert(&truck_late).await.unwrap();
        repo.insert(&van_broken).await.unwrap();

        // Device scope
        let queue = repo
            .missing_coordinates(Some(&van), at(0, 0), at(23, 0), 10)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, van_broken.id);

        // Date scope: only the morning trips
        let queue = repo
            .missing_coordinates(None, at(5, 0), at(12, 0), 10)
            .await
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|t| t.start_time <= at(12, 0)));
    }

    #[tokio::test]
    async fn test_patch_never_overwrites_existing_coordinate() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        let complete = trip(&dev, 8, 9);
        repo.insert(&complete).await.unwrap();

        repo.patch_coordinates(&complete.id, Some((1.0, 1.0)), Some((2.0, 2.0)))
            .await
            .unwrap();

        let stored = repo.get_by_id(&complete.id).await.unwrap().unwrap();
        assert_eq!(stored.start_lat, Some(24.86));
        assert_eq!(stored.end_lat, Some(24.90));
    }

    #[tokio::test]
    async fn test_update_distance_after_reconciliation() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        let mut placeholder = trip(&dev, 8, 9);
        placeholder.distance_km = 0.0;
        placeholder.distance_source = DistanceSource::Placeholder;
        repo.insert(&placeholder).await.unwrap();

        repo.update_distance(&placeholder.id, 4.8, DistanceSource::Haversine, Some(4.8))
            .await
            .unwrap();

        let updated = repo.get_by_id(&placeholder.id).await.unwrap().unwrap();
        assert_eq!(updated.distance_km, 4.8);
        assert_eq!(updated.distance_source, DistanceSource::Haversine);
    }

    #[tokio::test]
    async fn test_flag_continuity() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.trips();

        let t = trip(&dev, 8, 9);
        repo.insert(&t).await.unwrap();
        repo.flag_continuity(&t.id, true).await.unwrap();

        let stored = repo.get_by_id(&t.id).await.unwrap().unwrap();
        assert!(stored.continuity_flagged);
    }
}
