//! # Sync State Repository
//!
//! Per-device sync cursor and phase, with a compare-and-set claim so
//! overlapping scheduler ticks never run the same device twice.
//!
//! ## Phase Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sync Phase Lifecycle                                │
//! │                                                                         │
//! │           claim() CAS succeeds                                         │
//! │   Idle ────────────────────────► Running                               │
//! │    ▲                               │                                    │
//! │    │ finish_ok()                   │ finish_error()                     │
//! │    ├───────────────────────────────┤                                    │
//! │    │                               ▼                                    │
//! │    │ reset_to_idle()             Error                                  │
//! │    ◄───────────────────────────────┘                                    │
//! │    ▲                                                                    │
//! │    │ backoff_until elapses       Backoff ◄── enter_backoff()           │
//! │    └──── (claim() ignores the row until then) ── (rate limited)        │
//! │                                                                         │
//! │  The cursor advances ONLY via advance_cursor(), ONLY after the         │
//! │  orchestrator has committed the corresponding points and trips.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tripline_core::{SyncPhase, SyncState};

/// Repository for sync state operations.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    /// Creates a new SyncStateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    /// Ensures a sync state row exists for the device (idle, no
    /// cursor). A no-op when the row is already present.
    pub async fn ensure(&self, device_id: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_states (device_id, phase, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(device_id)
        .bind(SyncPhase::Idle)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets the sync state for a device.
    pub async fn get(&self, device_id: &str) -> DbResult<Option<SyncState>> {
        let state = sqlx::query_as::<_, SyncState>(
            r#"
            SELECT device_id, cursor_time, phase, backoff_until,
                   trips_total, percent, current_operation,
                   last_error, last_synced_at, updated_at
            FROM sync_states
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// Atomically claims a device for syncing.
    ///
    /// The compare-and-set succeeds only when the device is not
    /// already running and any backoff window has elapsed. Returns
    /// `true` when this caller won the claim.
    pub async fn claim(&self, device_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                phase = ?1,
                current_operation = 'starting',
                last_error = NULL,
                percent = 0,
                updated_at = ?2
            WHERE device_id = ?3
              AND phase != ?1
              AND (backoff_until IS NULL OR backoff_until <= ?2)
            "#,
        )
        .bind(SyncPhase::Running)
        .bind(now)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(device_id, claimed, "Sync claim attempt");
        Ok(claimed)
    }

    /// Updates progress while a sync runs (operation label + percent).
    pub async fn update_progress(
        &self,
        device_id: &str,
        operation: &str,
        percent: f64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET current_operation = ?1, percent = ?2, updated_at = ?3
            WHERE device_id = ?4
            "#,
        )
        .bind(operation)
        .bind(percent.clamp(0.0, 100.0))
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
        }

        Ok(())
    }

    /// Advances the cursor after the window's points and trips have
    /// been committed. Never called on failure paths, so a crashed
    /// sync re-fetches from the last durable cursor.
    pub async fn advance_cursor(
        &self,
        device_id: &str,
        cursor_time: DateTime<Utc>,
        new_trips: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                cursor_time = ?1,
                trips_total = trips_total + ?2,
                updated_at = ?3
            WHERE device_id = ?4
            "#,
        )
        .bind(cursor_time)
        .bind(new_trips)
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
        }

        Ok(())
    }

    /// Marks a sync as completed successfully: back to idle, progress
    /// cleared, last_synced_at stamped.
    pub async fn finish_ok(&self, device_id: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                phase = ?1,
                percent = 100,
                current_operation = NULL,
                last_error = NULL,
                backoff_until = NULL,
                last_synced_at = ?2,
                updated_at = ?2
            WHERE device_id = ?3
            "#,
        )
        .bind(SyncPhase::Idle)
        .bind(now)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
        }

        Ok(())
    }

    /// Marks a sync as failed. The cursor is untouched, so the next
    /// run retries the same window.
    pub async fn finish_error(&self, device_id: &str, message: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                phase = ?1,
                current_operation = NULL,
                last_error = ?2,
                updated_at = ?3
            WHERE device_id = ?4
            "#,
        )
        .bind(SyncPhase::Error)
        .bind(message)
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
        }

        Ok(())
    }

    /// Puts a device into backoff until the given time. Used when the
    /// vendor rate-limits us; claim() skips the device until then.
    pub async fn enter_backoff(&self, device_id: &str, until: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                phase = ?1,
                backoff_until = ?2,
                current_operation = NULL,
                updated_at = ?3
            WHERE device_id = ?4
            "#,
        )
        .bind(SyncPhase::Backoff)
        .bind(until)
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
        }

        Ok(())
    }

    /// Forces a device back to idle, clearing backoff and errors.
    /// Recovery path for a wedged state after a crash mid-sync.
    pub async fn reset_to_idle(&self, device_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_states SET
                phase = ?1,
                backoff_until = NULL,
                current_operation = NULL,
                last_error = NULL,
                percent = 0,
                updated_at = ?2
            WHERE device_id = ?3
            "#,
        )
        .bind(SyncPhase::Idle)
        .bind(Utc::now())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncState", device_id));
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
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn registered(db: &Database) -> String {
        let id = db
            .devices()
            .register("Truck 7", "vendor-123")
            .await
            .unwrap()
            .id;
        db.sync_states().ensure(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();

        repo.ensure(&dev).await.unwrap();

        let state = repo.get(&dev).await.unwrap().unwrap();
        assert_eq!(state.phase, SyncPhase::Idle);
        assert!(state.cursor_time.is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();
        let now = Utc::now();

        assert!(repo.claim(&dev, now).await.unwrap());
        // Second claim while running must lose
        assert!(!repo.claim(&dev, now).await.unwrap());

        repo.finish_ok(&dev).await.unwrap();
        assert!(repo.claim(&dev, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_backoff_blocks_claim_until_elapsed() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();
        let now = Utc::now();

        repo.claim(&dev, now).await.unwrap();
        repo.enter_backoff(&dev, now + Duration::minutes(15)).await.unwrap();

        assert!(!repo.claim(&dev, now).await.unwrap());
        assert!(!repo.claim(&dev, now + Duration::minutes(14)).await.unwrap());
        // Window elapsed: claimable again
        assert!(repo.claim(&dev, now + Duration::minutes(16)).await.unwrap());
    }

    #[tokio::test]
    async fn test_cursor_survives_failure() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();
        let now = Utc::now();
        let cursor = now - Duration::hours(1);

        repo.claim(&dev, now).await.unwrap();
        repo.advance_cursor(&dev, cursor, 3).await.unwrap();
        repo.finish_error(&dev, "vendor timeout").await.unwrap();

        let state = repo.get(&dev).await.unwrap().unwrap();
        assert_eq!(state.phase, SyncPhase::Error);
        assert_eq!(state.cursor_time, Some(cursor));
        assert_eq!(state.trips_total, 3);
        assert_eq!(state.last_error.as_deref(), Some("vendor timeout"));
    }

    #[tokio::test]
    async fn test_finish_ok_clears_progress() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();
        let now = Utc::now();

        repo.claim(&dev, now).await.unwrap();
        repo.update_progress(&dev, "fetching history", 40.0).await.unwrap();
        repo.finish_ok(&dev).await.unwrap();

        let state = repo.get(&dev).await.unwrap().unwrap();
        assert_eq!(state.phase, SyncPhase::Idle);
        assert_eq!(state.percent, 100.0);
        assert!(state.current_operation.is_none());
        assert!(state.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_reset_to_idle_clears_wedged_state() {
        let db = test_db().await;
        let dev = registered(&db).await;
        let repo = db.sync_states();
        let now = Utc::now();

        repo.claim(&dev, now).await.unwrap();
        repo.enter_backoff(&dev, now + Duration::hours(1)).await.unwrap();
        repo.reset_to_idle(&dev).await.unwrap();

        let state = repo.get(&dev).await.unwrap().unwrap();
        assert_eq!(state.phase, SyncPhase::Idle);
        assert!(state.backoff_until.is_none());
        assert!(repo.claim(&dev, now).await.unwrap());
    }
}
