// 🚫 Configuration errors
// The only failures the occupancy core reports to its caller. Data problems
// (garbled counts, bad timestamps, unknown rooms) never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Tier boundaries must be strictly increasing
    #[error("low threshold ({low}) must be below moderate threshold ({moderate})")]
    ThresholdOrder { low: i64, moderate: i64 },

    #[error("{field} must not be negative (got {value})")]
    NegativeValue { field: &'static str, value: i64 },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    /// Registry ids collide under case-insensitive comparison
    #[error("duplicate entity id in registry: {0}")]
    DuplicateEntityId(String),

    #[error("entity at position {index} has an empty id")]
    EmptyEntityId { index: usize },

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("at least one count field name is required")]
    NoCountFields,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
