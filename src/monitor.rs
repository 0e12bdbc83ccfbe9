// 🔄 Monitor - one fetch-and-reconcile cycle at a time
//
// Holds the registry, the engine and a reading source. The current report is
// swapped as a whole Arc; readers never see a half-built set. A failed fetch
// keeps the previous report and records why.

use crate::config::MonitorConfig;
use crate::error::ConfigResult;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::registry::EntityRegistry;
use crate::source::ReadingSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Why a refresh produced no new report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub source: String,
    pub message: String,

    /// Troubleshooting advice for well-known backend errors
    pub hint: Option<String>,

    pub at: DateTime<Utc>,
}

impl FetchFailure {
    pub fn new(source: &str, err: &anyhow::Error, at: DateTime<Utc>) -> Self {
        let message = format!("{:#}", err);
        FetchFailure {
            source: source.to_string(),
            hint: failure_hint(&message).map(str::to_string),
            message,
            at,
        }
    }
}

/// Map backend error text to advice for the operator
pub fn failure_hint(message: &str) -> Option<&'static str> {
    if message.contains("no such table") || message.contains("Could not find the table") {
        Some("Check the configured table name (table_name / OCCUPANCY_TABLE)")
    } else if message.contains("does not exist") {
        Some("The detections table does not exist yet; create it or run `occupancy-monitor import`")
    } else if message.contains("no such column") {
        Some("Check entity_field, timestamp_field and count_fields against the table columns")
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// New report installed
    Updated(Arc<ReconciliationReport>),

    /// Another cycle was in flight; nothing fetched
    Skipped,

    /// Fetch failed; previous report kept
    Failed(FetchFailure),
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated(_))
    }
}

/// Snapshot for the status endpoint and the TUI footer
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub source: String,
    pub busy: bool,
    pub registered: usize,
    pub completed_cycles: u64,
    pub last_cycle_id: Option<Uuid>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_failure: Option<FetchFailure>,
}

// ============================================================================
// BUSY GUARD
// ============================================================================

/// Holds the busy flag for the lifetime of one cycle
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct Monitor {
    registry: EntityRegistry,
    engine: ReconciliationEngine,
    source: Box<dyn ReadingSource>,
    batch_limit: usize,

    busy: AtomicBool,
    completed_cycles: AtomicU64,
    current: RwLock<Option<Arc<ReconciliationReport>>>,
    last_failure: RwLock<Option<FetchFailure>>,
}

impl Monitor {
    pub fn new(
        registry: EntityRegistry,
        engine: ReconciliationEngine,
        source: Box<dyn ReadingSource>,
        batch_limit: usize,
    ) -> Self {
        Monitor {
            registry,
            engine,
            source,
            batch_limit: batch_limit.max(1),
            busy: AtomicBool::new(false),
            completed_cycles: AtomicU64::new(0),
            current: RwLock::new(None),
            last_failure: RwLock::new(None),
        }
    }

    /// Registry from `registry_path` (or the built-in rooms) plus an engine built from `config`
    pub fn from_config(config: &MonitorConfig, source: Box<dyn ReadingSource>) -> ConfigResult<Self> {
        let registry = match &config.registry_path {
            Some(path) => EntityRegistry::from_file(path)?,
            None => EntityRegistry::default_rooms(),
        };
        let engine = ReconciliationEngine::from_config(config)?;
        Ok(Monitor::new(registry, engine, source, config.batch_limit()))
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Latest successful report, if any cycle has completed
    pub fn current(&self) -> Option<Arc<ReconciliationReport>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_failure(&self) -> Option<FetchFailure> {
        self.last_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one cycle unless another is already in flight
    pub fn refresh(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let _guard = match BusyGuard::acquire(&self.busy) {
            Some(guard) => guard,
            None => {
                debug!(source = self.source.name(), "refresh skipped, cycle already in flight");
                return RefreshOutcome::Skipped;
            }
        };

        debug!(source = self.source.name(), limit = self.batch_limit, "refresh started");

        let batch = match self.source.fetch_batch(self.batch_limit) {
            Ok(batch) => batch,
            Err(err) => {
                let failure = FetchFailure::new(self.source.name(), &err, now);
                error!(
                    source = %failure.source,
                    error = %failure.message,
                    hint = failure.hint.as_deref().unwrap_or(""),
                    "refresh failed, keeping previous report"
                );
                *self.last_failure.write().unwrap_or_else(PoisonError::into_inner) = Some(failure.clone());
                return RefreshOutcome::Failed(failure);
            }
        };

        let report = Arc::new(self.engine.run(&self.registry, &batch, self.source.order(), now));

        info!(
            cycle_id = %report.cycle_id,
            rows = report.batch_size,
            entities = report.entities.len(),
            reporting = report.summary.reporting,
            stale = report.summary.stale,
            "refresh finished"
        );

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&report));
        *self.last_failure.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.completed_cycles.fetch_add(1, Ordering::Relaxed);

        RefreshOutcome::Updated(report)
    }

    pub fn status(&self) -> MonitorStatus {
        let current = self.current();
        MonitorStatus {
            source: self.source.name().to_string(),
            busy: self.is_busy(),
            registered: self.registry.len(),
            completed_cycles: self.completed_cycles.load(Ordering::Relaxed),
            last_cycle_id: current.as_ref().map(|r| r.cycle_id),
            last_refresh: current.as_ref().map(|r| r.reconciled_at),
            last_failure: self.last_failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latest::BatchOrder;
    use crate::reading::RawRecord;
    use crate::registry::RegisteredEntity;
    use crate::source::MemorySource;
    use chrono::TimeZone;
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            RegisteredEntity::new("A", "Room A", "Ground", 0),
            RegisteredEntity::new("B", "Room B", "Ground", 0),
        ])
        .unwrap()
    }

    fn rows() -> Vec<RawRecord> {
        vec![RawRecord::new()
            .with("room_id", "a")
            .with("person_count", 30)
            .with("timestamp", at(100).to_rfc3339())]
    }

    /// Fails while `failing` is set, otherwise serves fixed rows
    struct FlakySource {
        failing: AtomicBool,
        rows: Vec<RawRecord>,
    }

    impl ReadingSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch_batch(&self, _limit: usize) -> anyhow::Result<Vec<RawRecord>> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("no such table: detections");
            }
            Ok(self.rows.clone())
        }
    }

    /// Blocks inside fetch until released
    struct GatedSource {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ReadingSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        fn fetch_batch(&self, _limit: usize) -> anyhow::Result<Vec<RawRecord>> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_refresh_installs_report() {
        let source = MemorySource::new(rows(), BatchOrder::NewestFirst);
        let monitor = Monitor::new(registry(), ReconciliationEngine::default(), Box::new(source), 100);

        assert!(monitor.current().is_none());

        let outcome = monitor.refresh(at(100));
        assert!(outcome.is_updated());

        let report = monitor.current().unwrap();
        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.entities[0].count, 30);
        assert!(!report.entities[1].has_reading);

        let status = monitor.status();
        assert_eq!(status.completed_cycles, 1);
        assert_eq!(status.last_cycle_id, Some(report.cycle_id));
        assert!(!status.busy);
    }

    #[test]
    fn test_failure_keeps_previous_report() {
        let source = FlakySource {
            failing: AtomicBool::new(false),
            rows: rows(),
        };
        let monitor = Monitor::new(registry(), ReconciliationEngine::default(), Box::new(source), 100);

        let first = match monitor.refresh(at(100)) {
            RefreshOutcome::Updated(report) => report,
            other => panic!("expected update, got {:?}", other),
        };

        // Swap in a failing source, keeping the installed report
        let flaky = FlakySource {
            failing: AtomicBool::new(true),
            rows: Vec::new(),
        };
        let failing_monitor = Monitor {
            source: Box::new(flaky),
            ..monitor
        };

        match failing_monitor.refresh(at(200)) {
            RefreshOutcome::Failed(failure) => {
                assert_eq!(failure.source, "flaky");
                assert!(failure.message.contains("no such table"));
                assert!(failure.hint.is_some());
                assert_eq!(failure.at, at(200));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let kept = failing_monitor.current().unwrap();
        assert_eq!(kept.cycle_id, first.cycle_id);
        assert!(failing_monitor.last_failure().is_some());
        assert!(!failing_monitor.is_busy());
    }

    #[test]
    fn test_success_clears_failure() {
        let source = FlakySource {
            failing: AtomicBool::new(true),
            rows: rows(),
        };
        let monitor = Monitor::new(registry(), ReconciliationEngine::default(), Box::new(source), 100);

        assert!(matches!(monitor.refresh(at(100)), RefreshOutcome::Failed(_)));
        assert!(monitor.current().is_none());
        assert!(monitor.last_failure().is_some());

        let monitor = Monitor {
            source: Box::new(MemorySource::new(rows(), BatchOrder::NewestFirst)),
            ..monitor
        };
        assert!(monitor.refresh(at(100)).is_updated());
        assert!(monitor.last_failure().is_none());
    }

    #[test]
    fn test_single_flight() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let source = GatedSource {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let monitor = Monitor::new(registry(), ReconciliationEngine::default(), Box::new(source), 100);

        std::thread::scope(|s| {
            let first = s.spawn(|| monitor.refresh(at(100)));

            entered_rx.recv().unwrap();
            assert!(monitor.is_busy());
            assert!(matches!(monitor.refresh(at(100)), RefreshOutcome::Skipped));

            release_tx.send(()).unwrap();
            assert!(first.join().unwrap().is_updated());
        });

        assert!(!monitor.is_busy());
        assert_eq!(monitor.status().completed_cycles, 1);
    }

    #[test]
    fn test_failure_hints() {
        assert!(failure_hint("no such table: detections").unwrap().contains("table name"));
        assert!(failure_hint("Could not find the table 'public.x'").is_some());
        assert!(failure_hint("relation \"x\" does not exist").unwrap().contains("import"));
        assert!(failure_hint("no such column: people_count").unwrap().contains("count_fields"));
        assert_eq!(failure_hint("connection refused"), None);
    }

    #[test]
    fn test_from_config_uses_built_in_rooms() {
        let source = MemorySource::new(Vec::new(), BatchOrder::NewestFirst);
        let monitor = Monitor::from_config(&MonitorConfig::default(), Box::new(source)).unwrap();
        assert_eq!(monitor.registry().len(), EntityRegistry::default_rooms().len());
        assert_eq!(monitor.source_name(), "memory");
    }
}
