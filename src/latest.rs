// 🕐 Latest-Reading Reducer - one reading per entity, most recent wins
//
// The reducer trusts the caller's ordering and never sorts. With a
// newest-first batch the first occurrence of a key is the latest reading.

use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the caller ordered the batch by `observed_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchOrder {
    /// Descending timestamps (the backend query's ORDER BY ... DESC)
    #[default]
    NewestFirst,

    /// Ascending timestamps
    OldestFirst,
}

/// Latest reading per normalized entity key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestReadings {
    by_key: HashMap<String, Reading>,
}

impl LatestReadings {
    /// Look up by normalized key (see [`crate::registry::entity_key`])
    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.by_key.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.by_key.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Reading)> {
        self.by_key.iter()
    }

    pub fn into_map(self) -> HashMap<String, Reading> {
        self.by_key
    }
}

/// Keep exactly one reading per case-insensitive entity key.
///
/// `NewestFirst`: the first occurrence wins, so equal timestamps resolve to
/// the earlier row. `OldestFirst`: the last occurrence wins.
pub fn reduce_to_latest(readings: &[Reading], order: BatchOrder) -> LatestReadings {
    LatestReadings {
        by_key: reduce_by(readings, order, |r| Some(r.key())),
    }
}

/// Generic form of [`reduce_to_latest`]; readings with no key are dropped
pub fn reduce_by<K, F>(readings: &[Reading], order: BatchOrder, key_fn: F) -> HashMap<K, Reading>
where
    K: std::hash::Hash + Eq,
    F: Fn(&Reading) -> Option<K>,
{
    let mut latest = HashMap::new();

    let mut keep_first = |reading: &Reading| {
        if let Some(key) = key_fn(reading) {
            latest.entry(key).or_insert_with(|| reading.clone());
        }
    };

    match order {
        BatchOrder::NewestFirst => readings.iter().for_each(&mut keep_first),
        BatchOrder::OldestFirst => readings.iter().rev().for_each(&mut keep_first),
    }

    latest
}

/// Stable newest-first ordering, unparseable timestamps last.
///
/// For collaborators whose source does not guarantee ordering.
pub fn sort_newest_first(readings: &mut [Reading]) {
    readings.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
}

// ============================================================================
// TESTS
// ============================================================================
