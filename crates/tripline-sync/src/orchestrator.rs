//! # Sync Orchestrator
//!
//! Drives the per-device pipeline: fetch → normalize → persist points →
//! segment → persist trips → advance cursor.
//!
//! ## Per-Device Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     sync_device(device)                                 │
//! │                                                                         │
//! │  1. CLAIM      sync_states CAS → skip if running or in backoff         │
//! │  2. WINDOW     [cursor | now - lookback, now], paged in chunks         │
//! │  3. FETCH      vendor history + latest position                        │
//! │  4. NORMALIZE  every raw record; unusable ones are counted and        │
//! │                logged, never silently dropped                          │
//! │  5. PERSIST    points (INSERT OR IGNORE) + live cache upsert           │
//! │  6. SEGMENT    window → trip candidates → continuity flags             │
//! │  7. PERSIST    trips (UNIQUE(device,start,end) dedup)                  │
//! │  8. CURSOR     advance ONLY after trips are durable                    │
//! │  9. FINISH     idle | error (cursor kept) | backoff (rate limit)       │
//! │                                                                         │
//! │  Failure isolation: one device's error never aborts the others.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::vendor::VendorApi;
use tripline_core::normalize::{map_vendor_record, normalize, CanonicalPoint};
use tripline_core::segment::check_continuity;
use tripline_core::{
    CoreError, Device, LatestPosition, PositionPoint, Trip, TripSegmenter,
};
use tripline_db::Database;

// =============================================================================
// Request / Report
// =============================================================================

/// What to sync.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Specific devices to sync; `None` means all active devices.
    pub device_ids: Option<Vec<String>>,

    /// Ignore the cursor and re-fetch the full lookback window.
    /// Idempotent persistence makes this safe at any time.
    pub force_full_sync: bool,
}

/// Outcome of one sync run across devices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Devices that completed the pipeline.
    pub devices_processed: usize,

    /// Devices skipped because another run held the claim or backoff
    /// had not elapsed.
    pub devices_skipped: usize,

    /// New telemetry rows written.
    pub points_inserted: u64,

    /// Raw records normalization could not produce a timestamped
    /// point from (rejected, counted, logged).
    pub points_rejected: u64,

    /// New trips written.
    pub trips_created: usize,

    /// Trip candidates that already existed (idempotent replay).
    pub trips_skipped: usize,

    /// Per-device failures: (device_id, message).
    pub errors: Vec<(String, String)>,
}

/// Result of one device's pipeline pass, folded into the report.
struct DeviceOutcome {
    points_inserted: u64,
    points_rejected: u64,
    trips_created: usize,
    trips_skipped: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates the sync pipeline for a fleet of devices.
pub struct SyncOrchestrator<V: VendorApi> {
    db: Database,
    vendor: Arc<V>,
    config: SyncConfig,
    segmenter: TripSegmenter,
}

impl<V: VendorApi> SyncOrchestrator<V> {
    pub fn new(db: Database, vendor: Arc<V>, config: SyncConfig) -> Self {
        let segmenter = TripSegmenter::new(config.segment.clone());
        SyncOrchestrator {
            db,
            vendor,
            config,
            segmenter,
        }
    }

    /// Runs one sync pass over the requested devices.
    ///
    /// Devices are processed sequentially; a failure on one is
    /// recorded in the report and the rest continue.
    pub async fn run(&self, request: SyncRequest) -> SyncResult<SyncReport> {
        let devices = self.resolve_devices(&request).await?;
        let mut report = SyncReport::default();

        info!(count = devices.len(), force = request.force_full_sync, "Sync run starting");

        for device in devices {
            match self.sync_device(&device, request.force_full_sync).await {
                Ok(Some(outcome)) => {
                    report.devices_processed += 1;
                    report.points_inserted += outcome.points_inserted;
                    report.points_rejected += outcome.points_rejected;
                    report.trips_created += outcome.trips_created;
                    report.trips_skipped += outcome.trips_skipped;
                }
                Ok(None) => report.devices_skipped += 1,
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "Device sync failed");
                    report.errors.push((device.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            processed = report.devices_processed,
            trips = report.trips_created,
            errors = report.errors.len(),
            "Sync run finished"
        );

        Ok(report)
    }

    /// The cached live position plus an online/offline verdict based
    /// on the configured staleness threshold.
    pub async fn live_status(
        &self,
        device_id: &str,
    ) -> SyncResult<Option<(LatestPosition, bool)>> {
        let Some(position) = self.db.positions().latest(device_id).await? else {
            return Ok(None);
        };

        let threshold = Duration::seconds(self.config.sync.online_threshold_secs);
        let online = position.is_online(Utc::now(), threshold);
        Ok(Some((position, online)))
    }

    // -------------------------------------------------------------------------
    // Device resolution
    // -------------------------------------------------------------------------

    async fn resolve_devices(&self, request: &SyncRequest) -> SyncResult<Vec<Device>> {
        match &request.device_ids {
            None => Ok(self.db.devices().list_active().await?),
            Some(ids) => {
                let mut devices = Vec::with_capacity(ids.len());
                for id in ids {
                    let device = self
                        .db
                        .devices()
                        .get_by_id(id)
                        .await?
                        .ok_or_else(|| SyncError::UnknownDevice(id.clone()))?;
                    devices.push(device);
                }
                Ok(devices)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Per-device pipeline
    // -------------------------------------------------------------------------

    /// Runs the full pipeline for one device. `Ok(None)` means the
    /// claim was not won (already running, or backing off).
    async fn sync_device(
        &self,
        device: &Device,
        force_full: bool,
    ) -> SyncResult<Option<DeviceOutcome>> {
        let states = self.db.sync_states();
        let now = Utc::now();

        states.ensure(&device.id).await?;
        if !states.claim(&device.id, now).await? {
            debug!(device_id = %device.id, "Claim not won, skipping");
            return Ok(None);
        }

        match self.run_pipeline(device, force_full, now).await {
            Ok(outcome) => {
                states.finish_ok(&device.id).await?;
                Ok(Some(outcome))
            }
            Err(SyncError::RateLimited { retry_after_secs }) => {
                // Rate limits park THIS device; the rest of the fleet
                // keeps syncing
                let until = now + Duration::seconds(retry_after_secs as i64);
                states.enter_backoff(&device.id, until).await?;
                Err(SyncError::RateLimited { retry_after_secs })
            }
            Err(e) => {
                states.finish_error(&device.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        device: &Device,
        force_full: bool,
        now: DateTime<Utc>,
    ) -> SyncResult<DeviceOutcome> {
        let states = self.db.sync_states();
        let lookback_start = now - Duration::days(self.config.sync.lookback_days);

        let from = if force_full {
            lookback_start
        } else {
            states
                .get(&device.id)
                .await?
                .and_then(|s| s.cursor_time)
                .unwrap_or(lookback_start)
        };

        // Fetch + normalize + persist, one chunk at a time
        let (canonical, points_rejected) = self.fetch_window(device, from, now).await?;

        let points = canonical
            .iter()
            .map(|cp| to_position_point(&device.id, cp, now))
            .collect::<Vec<_>>();

        states
            .update_progress(&device.id, "persisting telemetry", 60.0)
            .await?;
        let insert = self.db.positions().record_batch(&points).await?;

        // Segment the whole fetched window
        states
            .update_progress(&device.id, "segmenting trips", 75.0)
            .await?;
        let mut candidates = match self.segmenter.segment(&device.id, &canonical) {
            Ok(candidates) => candidates,
            // A window with no motion signal yields no trips, never a
            // fabricated one. The points are already persisted.
            Err(CoreError::NoMotionSignal { .. }) => {
                warn!(device_id = %device.id, "Window carries no motion signal, no trips derived");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let flagged = check_continuity(&mut candidates, self.config.segment.continuity_tolerance_km);
        if flagged > 0 {
            warn!(device_id = %device.id, flagged, "Continuity violations flagged");
        }

        states
            .update_progress(&device.id, "persisting trips", 90.0)
            .await?;

        let mut trips_created = 0;
        let mut trips_skipped = 0;
        for candidate in &candidates {
            let trip = Trip {
                id: Uuid::new_v4().to_string(),
                device_id: device.id.clone(),
                start_time: candidate.start_time,
                end_time: Some(candidate.end_time),
                start_lat: candidate.start_lat,
                start_lon: candidate.start_lon,
                end_lat: candidate.end_lat,
                end_lon: candidate.end_lon,
                distance_km: candidate.distance_km,
                distance_source: candidate.distance_source,
                duration_seconds: candidate.duration_seconds,
                avg_speed_kmh: candidate.avg_speed_kmh,
                max_speed_kmh: candidate.max_speed_kmh,
                continuity_flagged: candidate.continuity_flagged,
                created_at: Utc::now(),
            };

            if self.db.trips().insert(&trip).await? {
                trips_created += 1;
            } else {
                trips_skipped += 1;
            }
        }

        // The cursor moves only now, with points and trips durable. A
        // crash before this line re-fetches the same window, and the
        // dedup constraints make the replay a no-op.
        if let Some(last) = points.iter().map(|p| p.gps_time).max() {
            states
                .advance_cursor(&device.id, last, trips_created as i64)
                .await?;
        }

        debug!(
            device_id = %device.id,
            inserted = insert.inserted,
            trips_created,
            "Device pipeline complete"
        );

        Ok(DeviceOutcome {
            points_inserted: insert.inserted,
            points_rejected,
            trips_created,
            trips_skipped,
        })
    }

    /// Pauses between successive vendor calls so a long backfill stays
    /// under the vendor's request budget. The first call goes out
    /// immediately.
    async fn pace(&self, calls_made: &mut u64) {
        if *calls_made > 0 && self.config.vendor.inter_call_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(
                self.config.vendor.inter_call_delay_ms,
            ))
            .await;
        }
        *calls_made += 1;
    }

    /// Fetches [from, to] in chunks and normalizes every record.
    /// Returns gps_time-sorted canonical points plus the reject count.
    async fn fetch_window(
        &self,
        device: &Device,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<(Vec<CanonicalPoint>, u64)> {
        let states = self.db.sync_states();
        let chunk = Duration::hours(self.config.sync.chunk_hours);
        let total_secs = (to - from).num_seconds().max(1) as f64;

        let mut canonical = Vec::new();
        let mut rejected: u64 = 0;
        let mut cursor = from;
        let mut calls_made: u64 = 0;

        while cursor < to {
            let chunk_end = (cursor + chunk).min(to);

            self.pace(&mut calls_made).await;
            let raw = match self
                .vendor
                .position_history(&device.vendor_device_id, cursor, chunk_end)
                .await
            {
                Ok(raw) => raw,
                // A transient fault gets one in-place retry; anything
                // else aborts the device run
                Err(e) if e.is_retryable() => {
                    warn!(device_id = %device.id, error = %e, "Transient vendor fault, retrying chunk");
                    self.pace(&mut calls_made).await;
                    self.vendor
                        .position_history(&device.vendor_device_id, cursor, chunk_end)
                        .await?
                }
                Err(e) => return Err(e),
            };

            for record in &raw {
                match self.normalize_record(device, record) {
                    Some(point) => canonical.push(point),
                    None => rejected += 1,
                }
            }

            let done_secs = (chunk_end - from).num_seconds() as f64;
            let percent = (done_secs / total_secs * 50.0).clamp(0.0, 50.0);
            states
                .update_progress(&device.id, "fetching history", percent)
                .await?;

            cursor = chunk_end;
        }

        // The live endpoint can be ahead of the last history page
        self.pace(&mut calls_made).await;
        if let Some(record) = self.vendor.latest_position(&device.vendor_device_id).await? {
            match self.normalize_record(device, &record) {
                Some(point) => canonical.push(point),
                None => rejected += 1,
            }
        }

        // Vendors return pages in arbitrary order; segmentation
        // requires ascending gps_time
        canonical.sort_by_key(|p| p.gps_time);
        canonical.dedup_by_key(|p| p.gps_time);

        Ok((canonical, rejected))
    }

    /// Normalizes one raw record, returning `None` (logged + counted
    /// upstream) when no timestamped canonical point can be derived.
    fn normalize_record(&self, device: &Device, record: &serde_json::Value) -> Option<CanonicalPoint> {
        let raw = match map_vendor_record(record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Unusable vendor record");
                return None;
            }
        };

        let point = normalize(&device.id, &raw, Utc::now());
        if point.gps_time.is_none() {
            let err = CoreError::UnusableTimestamp(
                raw.gps_time_raw.unwrap_or_else(|| "absent".into()),
            );
            warn!(device_id = %device.id, error = %err, "Record rejected");
            return None;
        }

        Some(point)
    }
}

/// Converts a canonical point into its persisted form.
fn to_position_point(device_id: &str, cp: &CanonicalPoint, recorded_at: DateTime<Utc>) -> PositionPoint {
    PositionPoint {
        device_id: device_id.to_string(),
        // normalize_record rejects timestampless points before here
        gps_time: cp.gps_time.unwrap_or(recorded_at),
        lat: cp.lat,
        lon: cp.lon,
        speed_kmh: cp.speed_kmh,
        heading: cp.heading,
        ignition_on: cp.ignition_on,
        ignition_confidence: (cp.ignition_confidence > 0.0).then_some(cp.ignition_confidence),
        detection_method: cp.detection_method,
        raw_status: cp.raw_status.clone(),
        recorded_at,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
