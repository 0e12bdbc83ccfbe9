// Occupancy Monitor - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod registry;
pub mod reading;        // Raw rows -> canonical readings
pub mod latest;         // Latest reading per entity
pub mod classifier;     // Tier + staleness
pub mod reconciliation; // Registry x readings -> reconciled set
pub mod summary;        // Building / floor aggregates, filters
pub mod camera;         // Camera-number view
pub mod display;
pub mod source;
pub mod db;
pub mod monitor;

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use error::{ConfigError, ConfigResult};
pub use config::{MonitorConfig, OccupancyThresholds};
pub use registry::{entity_key, EntityRegistry, RegisteredEntity};
pub use reading::{coerce_count, parse_timestamp, RawRecord, Reading, ReadingNormalizer};
pub use latest::{reduce_by, reduce_to_latest, sort_newest_first, BatchOrder, LatestReadings};
pub use classifier::{EntityStatus, StatusClassifier, Tier};
pub use reconciliation::{ReconciledEntity, ReconciliationEngine, ReconciliationReport};
pub use summary::{floor_status, FloorSummary, OccupancySummary, RoomFilter};
pub use camera::{floor_of_camera, latest_by_camera, parse_camera_id, CameraReading};
pub use display::{entity_age, format_age, status_label};
pub use source::{CsvFileSource, JsonFileSource, MemorySource, ReadingSource};
pub use db::{
    canonical_timestamp, fetch_latest, insert_detections, load_csv, setup_database, table_columns,
    verify_count, Detection, FetchQuery, ImportStats, SqliteSource,
};
pub use monitor::{failure_hint, FetchFailure, Monitor, MonitorStatus, RefreshOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
