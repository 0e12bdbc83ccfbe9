// ⚙️ Configuration - thresholds, freshness window, data source settings
//
// Layering: built-in defaults -> optional JSON file -> OCCUPANCY_* environment
// variables -> validate(). A config that fails validation blocks startup.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOW_THRESHOLD: i64 = 8;
pub const DEFAULT_MODERATE_THRESHOLD: i64 = 20;
pub const DEFAULT_STALENESS_SECONDS: i64 = 5 * 60;
pub const DEFAULT_MAX_CAPACITY: i64 = 30;
pub const DEFAULT_REFRESH_SECONDS: i64 = 30;
pub const DEFAULT_BATCH_LIMIT: i64 = 500;

/// Environment variable naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "OCCUPANCY_CONFIG";

/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "occupancy.json";

// ============================================================================
// OCCUPANCY THRESHOLDS
// ============================================================================

/// Validated tier boundaries.
///
/// `count <= low` is light, `count <= moderate` is moderate, above is busy.
/// Only constructible through [`OccupancyThresholds::new`], so `low < moderate`
/// always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancyThresholds {
    low: u32,
    moderate: u32,
}

impl OccupancyThresholds {
    pub fn new(low: i64, moderate: i64) -> ConfigResult<Self> {
        let low_value = non_negative("low_threshold", low)?;
        let moderate_value = non_negative("moderate_threshold", moderate)?;

        if low_value >= moderate_value {
            return Err(ConfigError::ThresholdOrder { low, moderate });
        }

        Ok(OccupancyThresholds {
            low: low_value,
            moderate: moderate_value,
        })
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn moderate(&self) -> u32 {
        self.moderate
    }
}

impl Default for OccupancyThresholds {
    fn default() -> Self {
        OccupancyThresholds {
            low: DEFAULT_LOW_THRESHOLD as u32,
            moderate: DEFAULT_MODERATE_THRESHOLD as u32,
        }
    }
}

fn non_negative(field: &'static str, value: i64) -> ConfigResult<u32> {
    if value < 0 {
        return Err(ConfigError::NegativeValue { field, value });
    }
    u32::try_from(value).map_err(|_| ConfigError::Parse {
        what: field.to_string(),
        message: format!("{} is out of range", value),
    })
}

fn positive(field: &'static str, value: i64) -> ConfigResult<u32> {
    let value = non_negative(field, value)?;
    if value == 0 {
        return Err(ConfigError::ZeroValue { field });
    }
    Ok(value)
}

// ============================================================================
// MONITOR CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Upper bound (inclusive) of the light tier
    pub low_threshold: i64,

    /// Upper bound (inclusive) of the moderate tier
    pub moderate_threshold: i64,

    /// Readings older than this are stale
    pub staleness_threshold_seconds: i64,

    /// Denominator for the capacity percentage
    pub max_capacity_per_room: i64,

    /// Auto-refresh period for the TUI and the server
    pub refresh_interval_seconds: i64,

    /// Maximum rows fetched per refresh cycle
    pub batch_limit: i64,

    /// Backend table holding detections
    pub table_name: String,

    /// Field carrying the entity reference in fetched rows
    pub entity_field: String,

    /// Field carrying the observation timestamp in fetched rows
    pub timestamp_field: String,

    /// Accepted names for the count field, highest priority first
    pub count_fields: Vec<String>,

    /// SQLite database with the detections table
    pub db_path: PathBuf,

    /// Optional JSON registry replacing the built-in room list
    pub registry_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            moderate_threshold: DEFAULT_MODERATE_THRESHOLD,
            staleness_threshold_seconds: DEFAULT_STALENESS_SECONDS,
            max_capacity_per_room: DEFAULT_MAX_CAPACITY,
            refresh_interval_seconds: DEFAULT_REFRESH_SECONDS,
            batch_limit: DEFAULT_BATCH_LIMIT,
            table_name: "detections".to_string(),
            entity_field: "room_id".to_string(),
            timestamp_field: "timestamp".to_string(),
            count_fields: vec!["people_count".to_string(), "person_count".to_string()],
            db_path: PathBuf::from("occupancy.db"),
            registry_path: None,
        }
    }
}

impl MonitorConfig {
    /// Load config from a JSON file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            what: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Resolve the full configuration for a process and validate it.
    ///
    /// Reads `$OCCUPANCY_CONFIG`, or `occupancy.json` in the working
    /// directory, then applies `OCCUPANCY_*` overrides.
    pub fn load() -> ConfigResult<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);

        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OCCUPANCY_*` overrides through `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let integer_overrides: [(&str, &mut i64); 5] = [
            ("OCCUPANCY_LOW_THRESHOLD", &mut self.low_threshold),
            ("OCCUPANCY_MODERATE_THRESHOLD", &mut self.moderate_threshold),
            ("OCCUPANCY_STALENESS_SECONDS", &mut self.staleness_threshold_seconds),
            ("OCCUPANCY_REFRESH_SECONDS", &mut self.refresh_interval_seconds),
            ("OCCUPANCY_BATCH_LIMIT", &mut self.batch_limit),
        ];

        for (key, slot) in integer_overrides {
            if let Some(raw) = lookup(key) {
                *slot = raw.trim().parse().map_err(|_| ConfigError::Parse {
                    what: key.to_string(),
                    message: format!("expected an integer, got {:?}", raw),
                })?;
                tracing::info!(key, value = *slot, "config override from environment");
            }
        }

        if let Some(table) = lookup("OCCUPANCY_TABLE") {
            tracing::info!(table = %table, "config override from environment");
            self.table_name = table;
        }
        if let Some(db) = lookup("OCCUPANCY_DB") {
            self.db_path = PathBuf::from(db);
        }
        if let Some(registry) = lookup("OCCUPANCY_REGISTRY") {
            self.registry_path = Some(PathBuf::from(registry));
        }

        Ok(())
    }

    /// Reject misconfigured deployments before anything runs
    pub fn validate(&self) -> ConfigResult<()> {
        self.thresholds()?;
        non_negative("staleness_threshold_seconds", self.staleness_threshold_seconds)?;
        positive("max_capacity_per_room", self.max_capacity_per_room)?;
        positive("refresh_interval_seconds", self.refresh_interval_seconds)?;
        positive("batch_limit", self.batch_limit)?;

        if !is_valid_identifier(&self.table_name) {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }
        if self.count_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(ConfigError::NoCountFields);
        }

        Ok(())
    }

    pub fn thresholds(&self) -> ConfigResult<OccupancyThresholds> {
        OccupancyThresholds::new(self.low_threshold, self.moderate_threshold)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_seconds.max(0))
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_seconds.max(1) as u64)
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity_per_room.clamp(1, u32::MAX as i64) as u32
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit.max(1) as usize
    }
}

/// Table names end up in SQL text, so only plain identifiers are accepted
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// TESTS
// ============================================================================
