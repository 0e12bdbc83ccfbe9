// 📡 Reading Sources - where a refresh cycle gets its raw batch
//
// Every source hands back at most `limit` rows in a declared order, sorted
// newest-first on the parsed timestamp.

use crate::latest::BatchOrder;
use crate::reading::{parse_timestamp, RawRecord};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ReadingSource: Send + Sync {
    /// Short label for logs and the status endpoint
    fn name(&self) -> &str;

    /// Order of the rows returned by `fetch_batch`
    fn order(&self) -> BatchOrder {
        BatchOrder::NewestFirst
    }

    fn fetch_batch(&self, limit: usize) -> Result<Vec<RawRecord>>;
}

/// Stable newest-first sort on `timestamp_field`; unparseable timestamps go last
pub fn sort_records_newest_first(records: &mut [RawRecord], timestamp_field: &str) {
    records.sort_by_cached_key(|record| {
        std::cmp::Reverse(record.get(timestamp_field).and_then(parse_timestamp))
    });
}

fn newest_first(mut records: Vec<RawRecord>, timestamp_field: &str, limit: usize) -> Vec<RawRecord> {
    sort_records_newest_first(&mut records, timestamp_field);
    records.truncate(limit);
    records
}

// ============================================================================
// JSON FILE
// ============================================================================

/// A JSON array of row objects, re-read on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    timestamp_field: String,
    label: String,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P, timestamp_field: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        JsonFileSource {
            label: format!("json:{}", path.display()),
            path,
            timestamp_field: timestamp_field.to_string(),
        }
    }
}

impl ReadingSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn fetch_batch(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        let rows = match value {
            Value::Array(rows) => rows,
            other => anyhow::bail!(
                "{} must contain a JSON array of rows, found {}",
                self.path.display(),
                json_kind(&other)
            ),
        };

        // Non-object rows carry no fields; they normalize to an empty reading
        let records = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(fields) => RawRecord::from(fields),
                _ => RawRecord::new(),
            })
            .collect();

        Ok(newest_first(records, &self.timestamp_field, limit))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// CSV FILE
// ============================================================================

/// A headered CSV export; every cell arrives as a string
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    timestamp_field: String,
    label: String,
}

impl CsvFileSource {
    pub fn new<P: AsRef<Path>>(path: P, timestamp_field: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        CsvFileSource {
            label: format!("csv:{}", path.display()),
            path,
            timestamp_field: timestamp_field.to_string(),
        }
    }
}

impl ReadingSource for CsvFileSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn fetch_batch(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .context("Failed to open CSV file")?;

        let headers = rdr.headers().context("Failed to read CSV header")?.clone();

        let mut records = Vec::new();
        for result in rdr.records() {
            let row = result.context("Failed to read CSV row")?;
            let mut record = RawRecord::new();
            for (header, cell) in headers.iter().zip(row.iter()) {
                record.insert(header, Value::String(cell.to_string()));
            }
            records.push(record);
        }

        Ok(newest_first(records, &self.timestamp_field, limit))
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Fixed rows, replaceable between refreshes
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Mutex<Vec<RawRecord>>,
    order: BatchOrder,
}

impl MemorySource {
    pub fn new(rows: Vec<RawRecord>, order: BatchOrder) -> Self {
        MemorySource {
            rows: Mutex::new(rows),
            order,
        }
    }

    pub fn replace(&self, rows: Vec<RawRecord>) {
        match self.rows.lock() {
            Ok(mut guard) => *guard = rows,
            Err(poisoned) => *poisoned.into_inner() = rows,
        }
    }
}

impl ReadingSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn order(&self) -> BatchOrder {
        self.order
    }

    fn fetch_batch(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("memory source lock poisoned"))?;
        let take = limit.min(rows.len());
        // Keep the newest rows under the declared order
        let batch = match self.order {
            BatchOrder::NewestFirst => rows[..take].to_vec(),
            BatchOrder::OldestFirst => rows[rows.len() - take..].to_vec(),
        };
        Ok(batch)
    }
}
