// 🚦 Status Classifier - occupancy tier + freshness
//
// Tier and staleness are independent. "No data" is its own state and is never
// reported as stale.

use crate::config::{MonitorConfig, OccupancyThresholds, DEFAULT_MAX_CAPACITY, DEFAULT_STALENESS_SECONDS};
use crate::error::ConfigResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Nobody detected
    Empty,

    /// 1..=low
    Light,

    /// low+1..=moderate
    Moderate,

    /// Above moderate
    Busy,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Empty, Tier::Light, Tier::Moderate, Tier::Busy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Empty => "empty",
            Tier::Light => "light",
            Tier::Moderate => "moderate",
            Tier::Busy => "busy",
        }
    }

    /// Label shown on room cards
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Empty => "Available",
            Tier::Light => "Light",
            Tier::Moderate => "Moderate",
            Tier::Busy => "Busy",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ENTITY STATUS
// ============================================================================

/// Display state of one entity: no data takes precedence over tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tier", rename_all = "snake_case")]
pub enum EntityStatus {
    NoData,
    Fresh(Tier),
    Stale(Tier),
}

impl EntityStatus {
    pub fn from_parts(has_reading: bool, tier: Tier, is_stale: bool) -> Self {
        match (has_reading, is_stale) {
            (false, _) => EntityStatus::NoData,
            (true, false) => EntityStatus::Fresh(tier),
            (true, true) => EntityStatus::Stale(tier),
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            EntityStatus::NoData => None,
            EntityStatus::Fresh(tier) | EntityStatus::Stale(tier) => Some(*tier),
        }
    }
}

// ============================================================================
// STATUS CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StatusClassifier {
    thresholds: OccupancyThresholds,
    staleness_threshold: Duration,
    max_capacity: u32,
}

impl StatusClassifier {
    pub fn new(thresholds: OccupancyThresholds, staleness_threshold: Duration) -> Self {
        StatusClassifier {
            thresholds,
            staleness_threshold,
            max_capacity: DEFAULT_MAX_CAPACITY as u32,
        }
    }

    /// Builder pattern: capacity used for the percentage bar (minimum 1)
    pub fn with_max_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = max_capacity.max(1);
        self
    }

    pub fn from_config(config: &MonitorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(StatusClassifier::new(config.thresholds()?, config.staleness_threshold())
            .with_max_capacity(config.max_capacity()))
    }

    pub fn thresholds(&self) -> OccupancyThresholds {
        self.thresholds
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    /// Upper bounds are inclusive: `count == low` is still light
    pub fn classify(&self, count: u32) -> Tier {
        if count == 0 {
            Tier::Empty
        } else if count <= self.thresholds.low() {
            Tier::Light
        } else if count <= self.thresholds.moderate() {
            Tier::Moderate
        } else {
            Tier::Busy
        }
    }

    /// Stale iff there is a reading and its age strictly exceeds the threshold.
    ///
    /// A reading with an unparseable timestamp (`observed_at == None`) is stale.
    pub fn is_stale(
        &self,
        has_reading: bool,
        observed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if !has_reading {
            return false;
        }
        match observed_at {
            Some(observed) => now.signed_duration_since(observed) > self.staleness_threshold,
            None => true,
        }
    }

    /// `min(round(count / max_capacity * 100), 100)`
    pub fn capacity_percent(&self, count: u32) -> u8 {
        let percent = (count as f64 / self.max_capacity as f64 * 100.0).round();
        percent.min(100.0) as u8
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        StatusClassifier::new(
            OccupancyThresholds::default(),
            Duration::seconds(DEFAULT_STALENESS_SECONDS),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_boundary_tiers() {
        let classifier = StatusClassifier::default();

        assert_eq!(classifier.classify(0), Tier::Empty);
        assert_eq!(classifier.classify(1), Tier::Light);
        assert_eq!(classifier.classify(8), Tier::Light);
        assert_eq!(classifier.classify(9), Tier::Moderate);
        assert_eq!(classifier.classify(20), Tier::Moderate);
        assert_eq!(classifier.classify(21), Tier::Busy);
        assert_eq!(classifier.classify(u32::MAX), Tier::Busy);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = OccupancyThresholds::new(2, 4).unwrap();
        let classifier = StatusClassifier::new(thresholds, Duration::minutes(5));

        assert_eq!(classifier.classify(2), Tier::Light);
        assert_eq!(classifier.classify(3), Tier::Moderate);
        assert_eq!(classifier.classify(5), Tier::Busy);
    }

    #[test]
    fn test_zero_low_threshold_skips_light() {
        let thresholds = OccupancyThresholds::new(0, 3).unwrap();
        let classifier = StatusClassifier::new(thresholds, Duration::minutes(5));
        assert_eq!(classifier.classify(1), Tier::Moderate);
    }

    #[test]
    fn test_staleness_boundary() {
        let classifier = StatusClassifier::default();
        let exactly = now() - Duration::minutes(5);
        let older = exactly - Duration::microseconds(1);

        assert!(!classifier.is_stale(true, Some(exactly), now()));
        assert!(classifier.is_stale(true, Some(older), now()));
        assert!(!classifier.is_stale(true, Some(now()), now()));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let classifier = StatusClassifier::default();
        assert!(!classifier.is_stale(true, Some(now() + Duration::hours(1)), now()));
    }

    #[test]
    fn test_unparseable_timestamp_is_stale() {
        let classifier = StatusClassifier::default();
        assert!(classifier.is_stale(true, None, now()));
    }

    #[test]
    fn test_no_data_never_stale() {
        let classifier = StatusClassifier::default();
        assert!(!classifier.is_stale(false, None, now()));
        assert!(!classifier.is_stale(false, Some(now() - Duration::days(3)), now()));
    }

    #[test]
    fn test_entity_status_distinguishes_no_data() {
        assert_eq!(EntityStatus::from_parts(false, Tier::Empty, false), EntityStatus::NoData);
        assert_eq!(
            EntityStatus::from_parts(true, Tier::Empty, true),
            EntityStatus::Stale(Tier::Empty)
        );
        assert_eq!(
            EntityStatus::from_parts(true, Tier::Busy, false),
            EntityStatus::Fresh(Tier::Busy)
        );
        assert_eq!(EntityStatus::NoData.tier(), None);
    }

    #[test]
    fn test_capacity_percent() {
        let classifier = StatusClassifier::default();
        assert_eq!(classifier.capacity_percent(0), 0);
        assert_eq!(classifier.capacity_percent(15), 50);
        assert_eq!(classifier.capacity_percent(1), 3);
        assert_eq!(classifier.capacity_percent(45), 100);

        let tiny = StatusClassifier::default().with_max_capacity(0);
        assert_eq!(tiny.max_capacity(), 1);
        assert_eq!(tiny.capacity_percent(1), 100);
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = MonitorConfig::default();
        config.low_threshold = 30;
        assert!(StatusClassifier::from_config(&config).is_err());

        let classifier = StatusClassifier::from_config(&MonitorConfig::default()).unwrap();
        assert_eq!(classifier, StatusClassifier::default());
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&Tier::Busy).unwrap(), "\"busy\"");
        assert_eq!(Tier::Empty.label(), "Available");
        assert_eq!(
            serde_json::to_value(EntityStatus::Stale(Tier::Light)).unwrap(),
            serde_json::json!({ "state": "stale", "tier": "light" })
        );
    }
}
