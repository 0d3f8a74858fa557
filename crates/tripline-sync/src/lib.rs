//! # tripline-sync: Sync Engine for Tripline
//!
//! This crate drives the incremental vendor sync pipeline: fetching raw
//! telemetry from the tracking vendor, normalizing and segmenting it
//! via `tripline-core`, and persisting the results via `tripline-db`.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Pipeline                                    │
//! │                                                                         │
//! │  Scheduler tick (every N minutes)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  For each active device (sequential, isolated):                        │
//! │       │                                                                 │
//! │       ├── claim sync state (CAS; skip if running or backing off)       │
//! │       ├── fetch history [cursor → now] in chunks                       │
//! │       ├── normalize every raw record (never drop)                      │
//! │       ├── persist points (INSERT OR IGNORE dedup)                      │
//! │       ├── segment window into trips                                    │
//! │       ├── persist trips (UNIQUE(device,start,end) dedup)               │
//! │       ├── advance cursor ← only after trips are durable                │
//! │       └── finish (idle | error | backoff)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ReconcileEngine: repair trips with missing endpoint coordinates       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types and retry categorization
//! - [`vendor`] - VendorApi trait and HTTP client implementation
//! - [`orchestrator`] - Per-device fetch/normalize/segment/persist
//! - [`reconcile`] - Trip coordinate repair
//! - [`scheduler`] - Periodic background driver

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod scheduler;
pub mod vendor;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncRequest};
pub use reconcile::{ReconcileEngine, ReconcileReport, ReconcileRequest};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use vendor::{HttpVendorClient, VendorApi};
