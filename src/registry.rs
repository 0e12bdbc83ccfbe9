// 🏢 Entity Registry - the fixed list of rooms/cameras the dashboard always shows
//
// Loaded once at startup and never mutated. Order is display order: rooms are
// listed floor by floor, and every consumer keeps that order.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// ============================================================================
// REGISTERED ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredEntity {
    /// Stable identifier, matched case-insensitively against readings
    pub id: String,

    /// Human-readable label
    pub display_name: String,

    /// Floor order (-1 = playground, 0 = ground, ...), used for grouping only
    pub group_key: i32,

    /// Floor name shown in group headers
    #[serde(default)]
    pub group_label: String,
}

impl RegisteredEntity {
    pub fn new(id: &str, display_name: &str, group_label: &str, group_key: i32) -> Self {
        RegisteredEntity {
            id: id.to_string(),
            display_name: display_name.to_string(),
            group_key,
            group_label: group_label.to_string(),
        }
    }

    /// Key used to match readings against this entity
    pub fn match_key(&self) -> String {
        entity_key(&self.id)
    }
}

/// Normalized lookup key: trimmed and lower-cased
pub fn entity_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ============================================================================
// ENTITY REGISTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRegistry {
    entities: Vec<RegisteredEntity>,
}

impl EntityRegistry {
    /// Build a registry, rejecting empty or case-insensitively duplicated ids
    pub fn new(entities: Vec<RegisteredEntity>) -> ConfigResult<Self> {
        let mut seen = HashSet::new();

        for (index, entity) in entities.iter().enumerate() {
            let key = entity.match_key();
            if key.is_empty() {
                return Err(ConfigError::EmptyEntityId { index });
            }
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateEntityId(entity.id.clone()));
            }
        }

        Ok(EntityRegistry { entities })
    }

    /// Load a registry from a JSON array of entities
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let entities: Vec<RegisteredEntity> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                what: path.display().to_string(),
                message: e.to_string(),
            })?;

        Self::new(entities)
    }

    /// The monitored rooms, in floor order
    pub fn default_rooms() -> Self {
        let rooms = vec![
            // Playground floor (below ground)
            RegisteredEntity::new("Fitness Centre", "Fitness Centre", "Playground", -1),
            RegisteredEntity::new("Canteen", "Canteen", "Playground", -1),
            // Ground floor
            RegisteredEntity::new("G7", "G7", "Ground", 0),
            RegisteredEntity::new("VA", "VA", "Ground", 0),
            // 1st floor
            RegisteredEntity::new("105", "105", "1st", 1),
            RegisteredEntity::new("106", "106", "1st", 1),
            RegisteredEntity::new("107", "107", "1st", 1),
            RegisteredEntity::new("STEM Maker Lab", "STEM Maker Lab", "1st", 1),
            RegisteredEntity::new("Chinese Academy", "Chinese Academy", "1st", 1),
            // 2nd floor
            RegisteredEntity::new("201", "201", "2nd", 2),
            RegisteredEntity::new("202", "202", "2nd", 2),
            RegisteredEntity::new("203", "203", "2nd", 2),
            RegisteredEntity::new("204", "204", "2nd", 2),
            RegisteredEntity::new("205", "205", "2nd", 2),
            RegisteredEntity::new("209", "209", "2nd", 2),
            RegisteredEntity::new("Home Economics Room", "Home Economics Room", "2nd", 2),
            // 3rd floor
            RegisteredEntity::new("Phy Lab", "Physics Lab", "3rd", 3),
            RegisteredEntity::new("Bio Lab", "Biology Lab", "3rd", 3),
            // 4th floor
            RegisteredEntity::new("Chem Lab", "Chemistry Lab", "4th", 4),
            // 6th floor
            RegisteredEntity::new("Library", "Library", "6th", 6),
        ];

        EntityRegistry { entities: rooms }
    }

    /// Case-insensitive lookup by id
    pub fn get(&self, id: &str) -> Option<&RegisteredEntity> {
        let key = entity_key(id);
        self.entities.iter().find(|e| e.match_key() == key)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegisteredEntity> {
        self.entities.iter()
    }

    pub fn entities(&self) -> &[RegisteredEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Distinct (group_key, group_label) pairs in first-appearance order
    pub fn groups(&self) -> Vec<(i32, String)> {
        let mut groups: Vec<(i32, String)> = Vec::new();
        for entity in &self.entities {
            if !groups.iter().any(|(key, _)| *key == entity.group_key) {
                groups.push((entity.group_key, entity.group_label.clone()));
            }
        }
        groups
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::default_rooms()
    }
}

impl<'a> IntoIterator for &'a EntityRegistry {
    type Item = &'a RegisteredEntity;
    type IntoIter = std::slice::Iter<'a, RegisteredEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================
