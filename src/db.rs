// 🗄️ Detections Store - SQLite table the sensors write into
//
// Import is idempotent: each row is keyed by a SHA-256 of its content and
// re-importing the same CSV inserts nothing. Timestamps are stored as
// fixed-width UTC text so that ORDER BY on the column is chronological.
// Fetching returns raw rows for the normalizer, newest first.

use crate::config::{is_valid_identifier, MonitorConfig};
use crate::latest::BatchOrder;
use crate::reading::{parse_timestamp_str, RawRecord};
use crate::source::{sort_records_newest_first, ReadingSource};
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// One imported detection row
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Detection {
    pub room_id: String,

    pub timestamp: String,

    /// Kept as text: sensor exports are not trusted to hold integers
    #[serde(alias = "people_count", default)]
    pub person_count: String,
}

impl Detection {
    pub fn new(room_id: &str, timestamp: &str, person_count: &str) -> Self {
        Detection {
            room_id: room_id.to_string(),
            timestamp: timestamp.to_string(),
            person_count: person_count.to_string(),
        }
    }

    /// Same detection with its timestamp rewritten as `STORED_TIMESTAMP_FORMAT`.
    /// Unparseable timestamps are kept as written.
    pub fn canonicalized(&self) -> Self {
        Detection {
            room_id: self.room_id.trim().to_string(),
            timestamp: canonical_timestamp(&self.timestamp),
            person_count: self.person_count.clone(),
        }
    }

    /// Deduplication key for import
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.room_id, self.timestamp, self.person_count
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Fixed-width UTC, so text order equals time order
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn canonical_timestamp(raw: &str) -> String {
    match parse_timestamp_str(raw) {
        Some(ts) => ts.format(STORED_TIMESTAMP_FORMAT).to_string(),
        None => raw.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
}

fn checked_table(table: &str) -> Result<&str> {
    if is_valid_identifier(table) {
        Ok(table)
    } else {
        Err(anyhow!("invalid table name: {:?}", table))
    }
}

/// Double-quoted SQL identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn setup_database(conn: &Connection, table: &str) -> Result<()> {
    let table = checked_table(table)?;

    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_hash TEXT UNIQUE NOT NULL,
                room_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                person_count TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp)"),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_room ON {table}(room_id)"),
        [],
    )?;

    Ok(())
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<Detection>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .context("Failed to open CSV file")?;

    let mut detections = Vec::new();
    for result in rdr.deserialize() {
        let detection: Detection = result.context("Failed to deserialize detection")?;
        detections.push(detection);
    }

    Ok(detections)
}

pub fn insert_detections(conn: &Connection, table: &str, detections: &[Detection]) -> Result<ImportStats> {
    let table = checked_table(table)?;
    let sql = format!(
        "INSERT INTO {table} (idempotency_hash, room_id, timestamp, person_count)
         VALUES (?1, ?2, ?3, ?4)"
    );

    let mut stats = ImportStats::default();

    for detection in detections {
        let detection = detection.canonicalized();
        let hash = detection.compute_idempotency_hash();

        let result = conn.execute(
            &sql,
            params![
                hash,
                detection.room_id,
                detection.timestamp,
                detection.person_count,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                stats.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        table,
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        "detections imported"
    );

    Ok(stats)
}

pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    let table = checked_table(table)?;
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

/// Column names and table for one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub table: String,
    pub entity_field: String,
    pub timestamp_field: String,

    /// Tried in order until one exists in the table
    pub count_fields: Vec<String>,
}

impl FetchQuery {
    pub fn from_config(config: &MonitorConfig) -> Self {
        FetchQuery {
            table: config.table_name.clone(),
            entity_field: config.entity_field.clone(),
            timestamp_field: config.timestamp_field.clone(),
            count_fields: config
                .count_fields
                .iter()
                .filter(|f| !f.trim().is_empty())
                .cloned()
                .collect(),
        }
    }

    fn sql(&self, count_field: Option<&str>) -> Result<String> {
        let table = checked_table(&self.table)?;
        let mut columns = vec![quote_ident(&self.entity_field), quote_ident(&self.timestamp_field)];
        if let Some(count) = count_field {
            columns.push(quote_ident(count));
        }
        Ok(format!(
            "SELECT {} FROM {} ORDER BY {} DESC LIMIT ?1",
            columns.join(", "),
            table,
            quote_ident(&self.timestamp_field)
        ))
    }

    /// First configured count field that exists in `columns`
    fn resolve_count_field<'a>(&'a self, columns: &[String]) -> Option<&'a str> {
        self.count_fields
            .iter()
            .map(String::as_str)
            .find(|field| has_column(columns, field))
    }
}

/// Column names of `table`, empty when the table does not exist
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

// SQLite column names are case-insensitive
fn has_column(columns: &[String], name: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Newest `limit` rows, each as a raw record keyed by column name.
///
/// Columns are checked against the table before querying: SQLite reads a
/// quoted name that matches no column as a string literal. The first count
/// field present is used; with none present, rows come back without a count.
/// Rows are re-sorted on their parsed timestamp, unparseable ones last.
pub fn fetch_latest(conn: &Connection, query: &FetchQuery, limit: usize) -> Result<Vec<RawRecord>> {
    let table = checked_table(&query.table)?;
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        bail!("no such table: {}", table);
    }

    for field in [&query.entity_field, &query.timestamp_field] {
        if !has_column(&columns, field) {
            bail!("no such column: {} in table {}", field, table);
        }
    }

    let count_field = query.resolve_count_field(&columns);
    if count_field.is_none() {
        warn!(
            table,
            tried = ?query.count_fields,
            "no count column found, counts default to 0"
        );
    }

    let mut rows = run_fetch(conn, &query.sql(count_field)?, limit)?;
    sort_records_newest_first(&mut rows, &query.timestamp_field);
    Ok(rows)
}

fn run_fetch(conn: &Connection, sql: &str, limit: usize) -> rusqlite::Result<Vec<RawRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows = stmt
        .query_map(params![limit], |row| {
            let mut record = RawRecord::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name, sql_to_json(row.get_ref(index)?));
            }
            Ok(record)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

// ============================================================================
// SQLITE SOURCE
// ============================================================================

/// `ReadingSource` over a SQLite detections table
pub struct SqliteSource {
    conn: Mutex<Connection>,
    query: FetchQuery,
    label: String,
}

impl SqliteSource {
    pub fn new(conn: Connection, query: FetchQuery) -> Self {
        SqliteSource {
            label: format!("sqlite:{}", query.table),
            conn: Mutex::new(conn),
            query,
        }
    }

    /// Open `config.db_path`. The table is not created here; a missing table
    /// surfaces as a fetch failure.
    pub fn open(config: &MonitorConfig) -> Result<Self> {
        let conn = Connection::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
        Ok(SqliteSource::new(conn, FetchQuery::from_config(config)))
    }
}

impl ReadingSource for SqliteSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn order(&self) -> BatchOrder {
        BatchOrder::NewestFirst
    }

    fn fetch_batch(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        fetch_latest(&conn, &self.query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, "detections").unwrap();
        conn
    }

    fn sample() -> Vec<Detection> {
        vec![
            Detection::new("105", "2025-03-01T09:00:00Z", "7"),
            Detection::new("Library", "2025-03-01T09:05:00Z", "12"),
            Detection::new("105", "2025-03-01T09:10:00Z", "3"),
        ]
    }

    #[test]
    fn test_idempotency_import_twice() {
        let conn = test_db();

        let first = insert_detections(&conn, "detections", &sample()).unwrap();
        let second = insert_detections(&conn, "detections", &sample()).unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(verify_count(&conn, "detections").unwrap(), 3);

        println!("✅ Idempotency test PASSED: 0 duplicates inserted on second import");
    }

    #[test]
    fn test_compute_idempotency_hash() {
        let a = Detection::new("105", "2025-03-01T09:00:00Z", "7");
        let b = Detection::new("105", "2025-03-01T09:00:00Z", "8");

        assert_eq!(a.compute_idempotency_hash(), a.compute_idempotency_hash());
        assert_ne!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        assert_eq!(a.compute_idempotency_hash().len(), 64);
    }

    #[test]
    fn test_fetch_latest_newest_first_with_limit() {
        let conn = test_db();
        insert_detections(&conn, "detections", &sample()).unwrap();

        let query = FetchQuery::from_config(&MonitorConfig::default());
        let rows = fetch_latest(&conn, &query, 2).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("room_id"), Some(&Value::from("105")));
        assert_eq!(rows[0].get("person_count"), Some(&Value::from("3")));
        assert_eq!(rows[0].get("people_count"), None);
        assert_eq!(rows[1].get("room_id"), Some(&Value::from("Library")));
    }

    #[test]
    fn test_canonical_timestamp() {
        assert_eq!(canonical_timestamp("2025-03-01 10:00:00"), "2025-03-01T10:00:00.000000Z");
        assert_eq!(canonical_timestamp("2025-03-01T10:00:00+02:00"), "2025-03-01T08:00:00.000000Z");
        assert_eq!(canonical_timestamp("2025-03-01T10:00:00.5Z"), "2025-03-01T10:00:00.500000Z");
        assert_eq!(canonical_timestamp("garbage"), "garbage");
    }

    #[test]
    fn test_import_stores_canonical_timestamps() {
        let conn = test_db();
        let stats = insert_detections(
            &conn,
            "detections",
            &[
                Detection::new("G7", "2025-03-01 10:00:00", "1"),
                Detection::new("G7", "2025-03-01T10:00:00Z", "1"),
            ],
        )
        .unwrap();

        // Same instant in two spellings is one detection
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.duplicates, 1);

        let stored: String = conn
            .query_row("SELECT timestamp FROM detections", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, "2025-03-01T10:00:00.000000Z");
    }

    #[test]
    fn test_fetch_orders_rows_by_parsed_timestamp() {
        let conn = test_db();
        // Written directly, bypassing import canonicalization
        conn.execute_batch(
            "INSERT INTO detections (idempotency_hash, room_id, timestamp, person_count) VALUES
                ('h1', 'G7', '2025-03-01 10:00:00', '1'),
                ('h2', 'G7', '2025-03-01T09:00:00Z', '25'),
                ('h3', 'VA', '2025-03-01T10:00:00+02:00', '30'),
                ('h4', 'VA', '2025-03-01T09:30:00Z', '2'),
                ('h5', 'VA', 'not a time', '9');",
        )
        .unwrap();

        let query = FetchQuery::from_config(&MonitorConfig::default());
        let rows = fetch_latest(&conn, &query, 10).unwrap();
        let counts: Vec<_> = rows.iter().map(|r| r.get("person_count").cloned().unwrap()).collect();

        assert_eq!(
            counts,
            vec![
                Value::from("1"),
                Value::from("2"),
                Value::from("25"),
                Value::from("30"),
                Value::from("9"),
            ]
        );
    }

    #[test]
    fn test_sqlite_counts_reach_monitor() {
        use crate::monitor::{Monitor, RefreshOutcome};
        use crate::reconciliation::ReconciliationEngine;
        use crate::registry::{EntityRegistry, RegisteredEntity};
        use chrono::{TimeZone, Utc};

        let conn = test_db();
        insert_detections(
            &conn,
            "detections",
            &[
                Detection::new("G7", "2025-03-01 10:00:00", "1"),
                Detection::new("G7", "2025-03-01T09:00:00Z", "25"),
                Detection::new("VA", "2025-03-01T10:00:00+02:00", "30"),
                Detection::new("VA", "2025-03-01T09:30:00Z", "2"),
            ],
        )
        .unwrap();

        let registry = EntityRegistry::new(vec![
            RegisteredEntity::new("G7", "G7", "Ground", 0),
            RegisteredEntity::new("VA", "Visual Arts", "Ground", 0),
        ])
        .unwrap();
        let source = SqliteSource::new(conn, FetchQuery::from_config(&MonitorConfig::default()));
        let monitor = Monitor::new(registry, ReconciliationEngine::default(), Box::new(source), 500);

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 2, 0).unwrap();
        let report = match monitor.refresh(now) {
            RefreshOutcome::Updated(report) => report,
            other => panic!("expected a report, got {:?}", other),
        };

        let g7 = report.get("G7").unwrap();
        assert_eq!(g7.count, 1);
        assert_eq!(g7.observed_at, Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()));
        assert!(!g7.is_stale);

        let va = report.get("VA").unwrap();
        assert_eq!(va.count, 2);
        assert_eq!(va.observed_at, Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()));
        assert_eq!(report.summary.total_occupancy, 3);
    }

    #[test]
    fn test_fetch_falls_back_to_next_count_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE counts (room_id TEXT, timestamp TEXT, occupants INTEGER);
             INSERT INTO counts VALUES ('G7', '2025-03-01T09:00:00Z', 4);",
        )
        .unwrap();

        let query = FetchQuery {
            table: "counts".to_string(),
            entity_field: "room_id".to_string(),
            timestamp_field: "timestamp".to_string(),
            count_fields: vec!["people_count".to_string(), "occupants".to_string()],
        };
        let rows = fetch_latest(&conn, &query, 10).unwrap();
        assert_eq!(rows[0].get("occupants"), Some(&Value::from(4)));

        let no_counts = FetchQuery {
            count_fields: vec!["people_count".to_string()],
            ..query
        };
        let rows = fetch_latest(&conn, &no_counts, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("occupants"), None);
        assert_eq!(rows[0].get("people_count"), None);
        assert_eq!(rows[0].get("\"people_count\""), None);
    }

    #[test]
    fn test_missing_entity_or_timestamp_column() {
        let conn = test_db();
        let query = FetchQuery {
            entity_field: "camera".to_string(),
            ..FetchQuery::from_config(&MonitorConfig::default())
        };
        let err = fetch_latest(&conn, &query, 10).unwrap_err();
        assert!(err.to_string().contains("no such column: camera"));

        let query = FetchQuery {
            timestamp_field: "seen_at".to_string(),
            ..FetchQuery::from_config(&MonitorConfig::default())
        };
        let err = fetch_latest(&conn, &query, 10).unwrap_err();
        assert!(err.to_string().contains("no such column: seen_at"));
    }

    #[test]
    fn test_missing_table_error_message() {
        let conn = Connection::open_in_memory().unwrap();
        let query = FetchQuery::from_config(&MonitorConfig::default());

        let err = fetch_latest(&conn, &query, 10).unwrap_err();
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn test_invalid_table_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(setup_database(&conn, "detections; DROP TABLE x").is_err());
        assert!(verify_count(&conn, "").is_err());
    }

    #[test]
    fn test_sqlite_source() {
        let conn = test_db();
        insert_detections(&conn, "detections", &sample()).unwrap();

        let source = SqliteSource::new(conn, FetchQuery::from_config(&MonitorConfig::default()));
        assert_eq!(source.name(), "sqlite:detections");
        let rows = source.fetch_batch(10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("person_count"), Some(&Value::from("12")));
    }

    #[test]
    fn test_load_csv_accepts_people_count_header() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "room_id,timestamp,people_count").unwrap();
        writeln!(file, "201,2025-03-01 10:00:00,9").unwrap();

        let detections = load_csv(file.path()).unwrap();
        assert_eq!(detections, vec![Detection::new("201", "2025-03-01 10:00:00", "9")]);
    }
}
