// 📊 Aggregate counters - building totals, floor overview, room filters
//
// Derived from a reconciled set on demand; none of this is stored state.

use crate::classifier::Tier;
use crate::reconciliation::ReconciledEntity;
use serde::{Deserialize, Serialize};

/// Floors with more active rooms than this read as "moderate"
pub const FLOOR_ACTIVE_ROOMS_MODERATE: usize = 5;

// ============================================================================
// BUILDING SUMMARY
// ============================================================================

/// Tier, occupancy and activity counts only include entities with a reading
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancySummary {
    /// Entities in the registry
    pub registered: usize,

    /// Entities with at least one reading
    pub reporting: usize,

    /// Sum of counts
    pub total_occupancy: u64,

    /// Entities with count > 0
    pub active: usize,

    pub empty: usize,
    pub light: usize,
    pub moderate: usize,
    pub busy: usize,

    pub stale: usize,
}

impl OccupancySummary {
    pub fn from_entities(entities: &[ReconciledEntity]) -> Self {
        let mut summary = OccupancySummary {
            registered: entities.len(),
            ..Default::default()
        };

        for entity in entities.iter().filter(|e| e.has_reading) {
            summary.reporting += 1;
            summary.total_occupancy += entity.count as u64;
            if entity.count > 0 {
                summary.active += 1;
            }
            if entity.is_stale {
                summary.stale += 1;
            }
            match entity.tier {
                Tier::Empty => summary.empty += 1,
                Tier::Light => summary.light += 1,
                Tier::Moderate => summary.moderate += 1,
                Tier::Busy => summary.busy += 1,
            }
        }

        summary
    }

    pub fn tier_count(&self, tier: Tier) -> usize {
        match tier {
            Tier::Empty => self.empty,
            Tier::Light => self.light,
            Tier::Moderate => self.moderate,
            Tier::Busy => self.busy,
        }
    }

    pub fn no_data(&self) -> usize {
        self.registered - self.reporting
    }
}

// ============================================================================
// FLOOR SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorSummary {
    pub group_key: i32,
    pub group_label: String,
    pub rooms: usize,
    pub occupancy: u64,
    pub active: usize,
    pub busy: usize,
    pub status: Tier,
}

impl FloorSummary {
    /// One summary per floor, in first-appearance order
    pub fn from_entities(entities: &[ReconciledEntity]) -> Vec<FloorSummary> {
        let mut floors: Vec<FloorSummary> = Vec::new();

        for entity in entities {
            let index = match floors.iter().position(|f| f.group_key == entity.group_key) {
                Some(index) => index,
                None => {
                    floors.push(FloorSummary {
                        group_key: entity.group_key,
                        group_label: entity.group_label.clone(),
                        rooms: 0,
                        occupancy: 0,
                        active: 0,
                        busy: 0,
                        status: Tier::Empty,
                    });
                    floors.len() - 1
                }
            };

            let floor = &mut floors[index];
            floor.rooms += 1;
            if entity.has_reading {
                floor.occupancy += entity.count as u64;
                if entity.count > 0 {
                    floor.active += 1;
                }
                if entity.tier == Tier::Busy {
                    floor.busy += 1;
                }
            }
        }

        for floor in &mut floors {
            floor.status = floor_status(floor.active, floor.busy);
        }

        floors
    }
}

/// Any busy room makes the floor busy; otherwise judged by active room count
pub fn floor_status(active: usize, busy: usize) -> Tier {
    if busy > 0 {
        Tier::Busy
    } else if active > FLOOR_ACTIVE_ROOMS_MODERATE {
        Tier::Moderate
    } else if active > 0 {
        Tier::Light
    } else {
        Tier::Empty
    }
}

// ============================================================================
// ROOM FILTER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomFilter {
    #[default]
    All,
    Occupied,
    Empty,
}

impl RoomFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "all" => Some(RoomFilter::All),
            "occupied" => Some(RoomFilter::Occupied),
            "empty" => Some(RoomFilter::Empty),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoomFilter::All => "All",
            RoomFilter::Occupied => "Occupied",
            RoomFilter::Empty => "Empty",
        }
    }

    pub fn matches(&self, entity: &ReconciledEntity) -> bool {
        match self {
            RoomFilter::All => true,
            RoomFilter::Occupied => entity.count > 0,
            RoomFilter::Empty => entity.count == 0,
        }
    }

    /// Filtered copy, order preserved
    pub fn apply(&self, entities: &[ReconciledEntity]) -> Vec<ReconciledEntity> {
        entities.iter().filter(|e| self.matches(e)).cloned().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
