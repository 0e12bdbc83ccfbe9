// ⚖️ Reconciliation Engine - registry x latest readings -> one record per room
//
// Pipeline per refresh cycle:
//   raw batch -> normalize -> reduce to latest -> merge with registry -> classify
//
// Every stage returns a new collection. A report is built whole and replaces
// the previous one; nothing is patched in place.

use crate::camera::{latest_by_camera, CameraReading};
use crate::classifier::{EntityStatus, StatusClassifier, Tier};
use crate::config::MonitorConfig;
use crate::error::ConfigResult;
use crate::latest::{reduce_to_latest, BatchOrder, LatestReadings};
use crate::reading::{RawRecord, ReadingNormalizer};
use crate::registry::{EntityRegistry, RegisteredEntity};
use crate::summary::OccupancySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// RECONCILED ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledEntity {
    pub id: String,
    pub display_name: String,
    pub group_key: i32,
    pub group_label: String,

    /// Count from the latest matching reading, 0 without one
    pub count: u32,

    /// Timestamp of that reading; None without one or when unparseable
    pub observed_at: Option<DateTime<Utc>>,

    /// True iff at least one reading matched this entity
    pub has_reading: bool,

    pub tier: Tier,

    /// Never true when `has_reading` is false
    pub is_stale: bool,

    pub capacity_percent: u8,
}

impl ReconciledEntity {
    pub fn status(&self) -> EntityStatus {
        EntityStatus::from_parts(self.has_reading, self.tier, self.is_stale)
    }

    pub fn is_occupied(&self) -> bool {
        self.count > 0
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Unique per refresh cycle
    pub cycle_id: Uuid,
    pub reconciled_at: DateTime<Utc>,

    /// Registry order preserved
    pub entities: Vec<ReconciledEntity>,

    pub summary: OccupancySummary,

    /// Rows in the fetched batch
    pub batch_size: usize,

    /// Reading keys that matched no registry entity, sorted
    pub unmatched_refs: Vec<String>,

    /// Same batch keyed by camera number
    pub cameras: Vec<CameraReading>,
}

impl ReconciliationReport {
    pub fn get(&self, id: &str) -> Option<&ReconciledEntity> {
        let key = crate::registry::entity_key(id);
        self.entities
            .iter()
            .find(|e| crate::registry::entity_key(&e.id) == key)
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}/{} room(s) reporting, {} people, {} active, {} busy, {} stale",
            self.summary.reporting,
            self.summary.registered,
            self.summary.total_occupancy,
            self.summary.active,
            self.summary.busy,
            self.summary.stale,
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    normalizer: ReadingNormalizer,
    classifier: StatusClassifier,
}

impl ReconciliationEngine {
    pub fn new(normalizer: ReadingNormalizer, classifier: StatusClassifier) -> Self {
        ReconciliationEngine {
            normalizer,
            classifier,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> ConfigResult<Self> {
        Ok(ReconciliationEngine {
            normalizer: ReadingNormalizer::from_config(config)?,
            classifier: StatusClassifier::from_config(config)?,
        })
    }

    pub fn normalizer(&self) -> &ReadingNormalizer {
        &self.normalizer
    }

    pub fn classifier(&self) -> &StatusClassifier {
        &self.classifier
    }

    /// Merge the registry with the latest readings.
    ///
    /// Exactly one output per registry entry, in registry order. Registry
    /// entries without a reading and readings without a registry entry are
    /// both normal.
    pub fn reconcile(
        &self,
        registry: &[RegisteredEntity],
        latest: &LatestReadings,
        now: DateTime<Utc>,
    ) -> Vec<ReconciledEntity> {
        registry
            .iter()
            .map(|entity| {
                let matched = latest.get(&entity.match_key());
                let has_reading = matched.is_some();
                let count = matched.map(|r| r.count).unwrap_or(0);
                let observed_at = matched.and_then(|r| r.observed_at);

                ReconciledEntity {
                    id: entity.id.clone(),
                    display_name: entity.display_name.clone(),
                    group_key: entity.group_key,
                    group_label: entity.group_label.clone(),
                    count,
                    observed_at,
                    has_reading,
                    tier: self.classifier.classify(count),
                    is_stale: self.classifier.is_stale(has_reading, observed_at, now),
                    capacity_percent: self.classifier.capacity_percent(count),
                }
            })
            .collect()
    }

    /// Full cycle over one fetched batch
    pub fn run(
        &self,
        registry: &EntityRegistry,
        records: &[RawRecord],
        order: BatchOrder,
        now: DateTime<Utc>,
    ) -> ReconciliationReport {
        let readings = self.normalizer.normalize_batch(records);
        let latest = reduce_to_latest(&readings, order);
        let entities = self.reconcile(registry.entities(), &latest, now);

        let registered: HashSet<String> = registry.iter().map(|e| e.match_key()).collect();
        let mut unmatched_refs: Vec<String> = latest
            .keys()
            .filter(|key| !registered.contains(*key))
            .cloned()
            .collect();
        unmatched_refs.sort();

        if !unmatched_refs.is_empty() {
            debug!(unmatched = ?unmatched_refs, "readings with no registered entity");
        }

        let summary = OccupancySummary::from_entities(&entities);
        let cameras = latest_by_camera(&readings, order, &self.classifier, now);

        ReconciliationReport {
            cycle_id: Uuid::new_v4(),
            reconciled_at: now,
            entities,
            summary,
            batch_size: records.len(),
            unmatched_refs,
            cameras,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
