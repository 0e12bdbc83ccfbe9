// 📥 Reading Normalizer - raw fetched rows -> canonical readings
//
// Sensor rows arrive with inconsistent column names and sometimes garbage
// values. Normalization never fails: bad counts become 0, bad timestamps
// become None (and are later treated as stale).

use crate::config::MonitorConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::registry::entity_key;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Count column names accepted by default, highest priority first
pub const DEFAULT_COUNT_FIELDS: &[&str] = &["people_count", "person_count"];

// ============================================================================
// RAW RECORD
// ============================================================================

/// One fetched row, field name -> JSON value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        RawRecord { fields: Map::new() }
    }

    /// Builder pattern: set a field
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        RawRecord { fields }
    }
}

// ============================================================================
// READING
// ============================================================================

/// Canonical reading. `count` is never negative by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Entity reference, surrounding whitespace removed
    pub entity_ref: String,

    pub count: u32,

    /// None when the source timestamp was missing or unparseable
    pub observed_at: Option<DateTime<Utc>>,
}

impl Reading {
    pub fn new(entity_ref: &str, count: u32, observed_at: Option<DateTime<Utc>>) -> Self {
        Reading {
            entity_ref: entity_ref.trim().to_string(),
            count,
            observed_at,
        }
    }

    /// Key used to match this reading against registry ids
    pub fn key(&self) -> String {
        entity_key(&self.entity_ref)
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReadingNormalizer {
    entity_field: String,
    timestamp_field: String,
    count_fields: Vec<String>,
}

impl ReadingNormalizer {
    pub fn new(
        entity_field: &str,
        timestamp_field: &str,
        count_fields: &[String],
    ) -> ConfigResult<Self> {
        let count_fields: Vec<String> = count_fields
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        if count_fields.is_empty() {
            return Err(ConfigError::NoCountFields);
        }

        Ok(ReadingNormalizer {
            entity_field: entity_field.to_string(),
            timestamp_field: timestamp_field.to_string(),
            count_fields,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> ConfigResult<Self> {
        Self::new(&config.entity_field, &config.timestamp_field, &config.count_fields)
    }

    pub fn entity_field(&self) -> &str {
        &self.entity_field
    }

    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    pub fn count_fields(&self) -> &[String] {
        &self.count_fields
    }

    pub fn normalize(&self, record: &RawRecord) -> Reading {
        let entity_ref = match record.get(&self.entity_field) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        // First alias that is present and non-null wins, even if it coerces to 0
        let count = self
            .count_fields
            .iter()
            .find_map(|field| record.get(field).filter(|v| !v.is_null()))
            .map(coerce_count)
            .unwrap_or(0);

        let observed_at = record.get(&self.timestamp_field).and_then(parse_timestamp);

        Reading {
            entity_ref,
            count,
            observed_at,
        }
    }

    pub fn normalize_batch(&self, records: &[RawRecord]) -> Vec<Reading> {
        records.iter().map(|r| self.normalize(r)).collect()
    }
}

impl Default for ReadingNormalizer {
    fn default() -> Self {
        ReadingNormalizer {
            entity_field: "room_id".to_string(),
            timestamp_field: "timestamp".to_string(),
            count_fields: DEFAULT_COUNT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

// ============================================================================
// COERCION HELPERS
// ============================================================================

/// Integer-prefix coercion: fractions truncate, negatives and non-numbers become 0
pub fn coerce_count(value: &Value) -> u32 {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                clamp_count(i)
            } else if let Some(u) = n.as_u64() {
                u.min(u32::MAX as u64) as u32
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f > 0.0 => f.trunc() as u32,
                    _ => 0,
                }
            }
        }
        Value::String(s) => parse_int_prefix(s).map(clamp_count).unwrap_or(0),
        _ => 0,
    }
}

fn clamp_count(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

/// Leading optional sign followed by digits; trailing junk is ignored
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    let mut seen_digit = false;
    for c in digits.chars() {
        match c.to_digit(10) {
            Some(d) => {
                seen_digit = true;
                value = value.saturating_mul(10).saturating_add(d as i64);
            }
            None => break,
        }
    }

    if !seen_digit {
        return None;
    }
    Some(if negative { -value } else { value })
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339, `+00`-style offsets, naive datetimes as UTC, or epoch milliseconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(count_field: &str, count: Value) -> RawRecord {
        RawRecord::new()
            .with("room_id", " G7 ")
            .with("timestamp", "2025-03-01T10:00:00Z")
            .with(count_field, count)
    }

    #[test]
    fn test_normalize_basic() {
        let normalizer = ReadingNormalizer::default();
        let reading = normalizer.normalize(&record("person_count", json!(12)));

        assert_eq!(reading.entity_ref, "G7");
        assert_eq!(reading.key(), "g7");
        assert_eq!(reading.count, 12);
        assert_eq!(
            reading.observed_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_count_alias_priority() {
        let normalizer = ReadingNormalizer::default();
        let both = record("people_count", json!(4)).with("person_count", json!(9));
        assert_eq!(normalizer.normalize(&both).count, 4);

        // A null first alias falls through to the next one
        let null_first = record("people_count", Value::Null).with("person_count", json!(9));
        assert_eq!(normalizer.normalize(&null_first).count, 9);

        // A present zero does not
        let zero_first = record("people_count", json!(0)).with("person_count", json!(9));
        assert_eq!(normalizer.normalize(&zero_first).count, 0);
    }

    #[test]
    fn test_custom_alias_list() {
        let fields = vec!["occupants".to_string(), "people_count".to_string()];
        let normalizer = ReadingNormalizer::new("room_id", "timestamp", &fields).unwrap();
        let reading = normalizer.normalize(&record("occupants", json!("7")));
        assert_eq!(reading.count, 7);
    }

    #[test]
    fn test_empty_alias_list_rejected() {
        let fields = vec!["  ".to_string()];
        assert!(matches!(
            ReadingNormalizer::new("room_id", "timestamp", &fields),
            Err(ConfigError::NoCountFields)
        ));
    }

    #[test]
    fn test_count_clamping() {
        assert_eq!(coerce_count(&json!(-5)), 0);
        assert_eq!(coerce_count(&json!("abc")), 0);
        assert_eq!(coerce_count(&json!("-5")), 0);
        assert_eq!(coerce_count(&json!(-2.5)), 0);
        assert_eq!(coerce_count(&json!(true)), 0);
        assert_eq!(coerce_count(&Value::Null), 0);
        assert_eq!(coerce_count(&json!({ "n": 3 })), 0);
    }

    #[test]
    fn test_count_integer_prefix() {
        assert_eq!(coerce_count(&json!("12")), 12);
        assert_eq!(coerce_count(&json!("  12 ")), 12);
        assert_eq!(coerce_count(&json!("12abc")), 12);
        assert_eq!(coerce_count(&json!("+3")), 3);
        assert_eq!(coerce_count(&json!("3.9")), 3);
        assert_eq!(coerce_count(&json!(12.9)), 12);
        assert_eq!(coerce_count(&json!(0.4)), 0);
    }

    #[test]
    fn test_count_saturates() {
        assert_eq!(coerce_count(&json!(u64::MAX)), u32::MAX);
        assert_eq!(coerce_count(&json!("99999999999999999999999")), u32::MAX);
    }

    #[test]
    fn test_missing_count_is_zero() {
        let normalizer = ReadingNormalizer::default();
        let rec = RawRecord::new().with("room_id", "VA").with("timestamp", "2025-03-01T10:00:00Z");
        assert_eq!(normalizer.normalize(&rec).count, 0);
    }

    #[test]
    fn test_numeric_entity_ref() {
        let normalizer = ReadingNormalizer::default();
        let rec = RawRecord::new().with("room_id", 401).with("person_count", 2);
        assert_eq!(normalizer.normalize(&rec).entity_ref, "401");

        let missing = RawRecord::new().with("person_count", 2);
        assert_eq!(normalizer.normalize(&missing).entity_ref, "");
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();

        assert_eq!(parse_timestamp_str("2025-03-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp_str("2025-03-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp_str("2025-03-01 10:00:00+00"), Some(expected));
        assert_eq!(parse_timestamp_str("2025-03-01 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp_str("2025-03-01T10:00:00"), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );

        let fractional = parse_timestamp_str("2025-03-01T10:00:00.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_invalid_timestamps() {
        assert_eq!(parse_timestamp_str("yesterday"), None);
        assert_eq!(parse_timestamp_str(""), None);
        assert_eq!(parse_timestamp(&Value::Null), None);
        assert_eq!(parse_timestamp(&json!(true)), None);

        let normalizer = ReadingNormalizer::default();
        let rec = RawRecord::new().with("room_id", "VA").with("timestamp", "not a date");
        assert_eq!(normalizer.normalize(&rec).observed_at, None);
    }

    #[test]
    fn test_raw_record_deserializes_from_row() {
        let rec: RawRecord = serde_json::from_str(
            r#"{ "room_id": "Library", "timestamp": "2025-03-01T10:00:00Z", "people_count": "5" }"#,
        )
        .unwrap();
        let reading = ReadingNormalizer::default().normalize(&rec);
        assert_eq!(reading.entity_ref, "Library");
        assert_eq!(reading.count, 5);
    }
}
