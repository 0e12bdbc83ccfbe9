use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use occupancy_monitor::{
    insert_detections, load_csv, setup_database, verify_count, CsvFileSource, JsonFileSource,
    Monitor, MonitorConfig, ReadingSource, RefreshOutcome, SqliteSource,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("ui");
    let rest = args.get(1..).unwrap_or(&[]);

    match command {
        "import" => run_import(rest),
        "snapshot" => run_snapshot(rest),
        "ui" => run_ui_mode(rest),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage() {
    println!("occupancy-monitor {}", occupancy_monitor::VERSION);
    println!();
    println!("USAGE:");
    println!("  occupancy-monitor import <csv> [db]      Import detections into SQLite");
    println!("  occupancy-monitor snapshot [--source F]  Print one reconciled report as JSON");
    println!("  occupancy-monitor ui [--source F]        Terminal dashboard (default)");
    println!();
    println!("  --source F   read rows from a .json or .csv file instead of the database");
    println!("  Config: $OCCUPANCY_CONFIG or ./occupancy.json, overridden by OCCUPANCY_* variables");
}

/// Logs always go to stderr; stdout carries command output
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `--source <path>` if given
fn source_arg(args: &[String]) -> Result<Option<PathBuf>> {
    match args.iter().position(|a| a == "--source") {
        Some(i) => match args.get(i + 1) {
            Some(path) => Ok(Some(PathBuf::from(path))),
            None => bail!("--source needs a file path"),
        },
        None => Ok(None),
    }
}

fn open_source(config: &MonitorConfig, path: Option<&Path>) -> Result<Box<dyn ReadingSource>> {
    let Some(path) = path else {
        return Ok(Box::new(SqliteSource::open(config)?));
    };

    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("json") => Ok(Box::new(JsonFileSource::new(path, &config.timestamp_field))),
        Some("csv") => Ok(Box::new(CsvFileSource::new(path, &config.timestamp_field))),
        _ => bail!("unsupported source file {} (expected .json or .csv)", path.display()),
    }
}

fn run_import(args: &[String]) -> Result<()> {
    init_tracing("occupancy_monitor=info");
    let config = MonitorConfig::load()?;

    let Some(csv_path) = args.first().map(PathBuf::from) else {
        bail!("usage: occupancy-monitor import <csv> [db]");
    };
    let db_path = args.get(1).map(PathBuf::from).unwrap_or_else(|| config.db_path.clone());

    println!("🗄️  Data Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    println!("\n📂 Loading CSV...");
    let detections = load_csv(&csv_path)?;
    println!("✓ Loaded {} detections from {}", detections.len(), csv_path.display());

    // 2. Setup database
    println!("\n🔧 Setting up database...");
    let conn = Connection::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    setup_database(&conn, &config.table_name)?;
    println!("✓ Database initialized with WAL mode ({})", db_path.display());

    // 3. Insert detections
    println!("\n💾 Inserting detections...");
    let stats = insert_detections(&conn, &config.table_name, &detections)?;
    println!("✓ Inserted: {}", stats.inserted);
    println!("✓ Skipped duplicates: {}", stats.duplicates);

    // 4. Verify count
    let count = verify_count(&conn, &config.table_name)?;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Table {} contains {} detections", config.table_name, count);

    Ok(())
}

fn run_snapshot(args: &[String]) -> Result<()> {
    init_tracing("occupancy_monitor=warn");
    let config = MonitorConfig::load()?;
    let source = open_source(&config, source_arg(args)?.as_deref())?;
    let monitor = Monitor::from_config(&config, source)?;

    match monitor.refresh(Utc::now()) {
        RefreshOutcome::Updated(report) => {
            println!("{}", serde_json::to_string_pretty(report.as_ref())?);
            Ok(())
        }
        RefreshOutcome::Failed(failure) => {
            if let Some(hint) = &failure.hint {
                eprintln!("💡 {}", hint);
            }
            bail!("fetch from {} failed: {}", failure.source, failure.message)
        }
        RefreshOutcome::Skipped => bail!("refresh skipped"),
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(args: &[String]) -> Result<()> {
    // Only log when asked to; output would corrupt the alternate screen otherwise
    if env::var_os("RUST_LOG").is_some() {
        init_tracing("occupancy_monitor=info");
    }

    let config = MonitorConfig::load()?;
    let source = open_source(&config, source_arg(args)?.as_deref())?;
    let monitor = std::sync::Arc::new(Monitor::from_config(&config, source)?);

    println!("🖥️  Loading occupancy dashboard from {}...", monitor.source_name());

    let mut app = occupancy_monitor::ui::App::new(std::sync::Arc::clone(&monitor));
    app.refresh(Utc::now());

    println!("Starting UI... (Press 'q' to quit)\n");
    occupancy_monitor::ui::run_ui(&mut app, config.refresh_interval())?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_args: &[String]) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the web dashboard: cargo run --bin occupancy-server --features server");
    std::process::exit(1);
}
