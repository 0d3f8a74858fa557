//! # Repository Module
//!
//! Database repository implementations for Tripline.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                    │
//! │                                                                         │
//! │  Sync Orchestrator                                                      │
//! │       │                                                                 │
//! │       │  db.positions().record_batch(&points)                           │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  PositionRepository                                                    │
//! │  ├── record_batch(&self, points)                                       │
//! │  ├── range(&self, device, from, to)                                    │
//! │  ├── find_nearest_fix(&self, device, around, window)                   │
//! │  └── latest(&self, device)                                             │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place                                        │
//! │  • Dedup semantics live next to the schema they depend on              │
//! │  • Orchestrator stays free of SQL                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`device::DeviceRepository`] - Device registry
//! - [`position::PositionRepository`] - Telemetry append + live cache
//! - [`trip::TripRepository`] - Trip persistence and coordinate patching
//! - [`sync_state::SyncStateRepository`] - Per-device sync cursor and phase

pub mod device;
pub mod position;
pub mod sync_state;
pub mod trip;
