// 📷 Camera View - readings keyed by camera number instead of room
//
// Camera numbers follow floor * 100 + index (101-110, 201-210, ...). Any
// entity reference carrying three consecutive digits maps onto one.

use crate::classifier::{StatusClassifier, Tier};
use crate::latest::{reduce_by, BatchOrder};
use crate::reading::Reading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First three consecutive ASCII digits in `entity_ref`.
///
/// `"401"`, `"room-401"` and `"camera_401"` all give 401.
pub fn parse_camera_id(entity_ref: &str) -> Option<u32> {
    let bytes = entity_ref.as_bytes();
    bytes
        .windows(3)
        .find(|w| w.iter().all(u8::is_ascii_digit))
        .map(|w| w.iter().fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32))
}

pub fn floor_of_camera(camera_id: u32) -> u32 {
    camera_id / 100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraReading {
    pub camera_id: u32,
    pub floor: u32,

    /// Raw reference the camera number was taken from
    pub entity_ref: String,

    pub count: u32,
    pub observed_at: Option<DateTime<Utc>>,
    pub tier: Tier,
    pub is_stale: bool,
}

/// Latest reading per camera, sorted by camera number.
///
/// Readings without a camera number are skipped.
pub fn latest_by_camera(
    readings: &[Reading],
    order: BatchOrder,
    classifier: &StatusClassifier,
    now: DateTime<Utc>,
) -> Vec<CameraReading> {
    let latest = reduce_by(readings, order, |r| parse_camera_id(&r.entity_ref));

    let mut cameras: Vec<CameraReading> = latest
        .into_iter()
        .map(|(camera_id, reading)| CameraReading {
            camera_id,
            floor: floor_of_camera(camera_id),
            tier: classifier.classify(reading.count),
            is_stale: classifier.is_stale(true, reading.observed_at, now),
            count: reading.count,
            observed_at: reading.observed_at,
            entity_ref: reading.entity_ref,
        })
        .collect();

    cameras.sort_by_key(|c| c.camera_id);
    cameras
}

/// Cameras on one floor, still in camera-number order
pub fn cameras_on_floor(cameras: &[CameraReading], floor: u32) -> Vec<&CameraReading> {
    cameras.iter().filter(|c| c.floor == floor).collect()
}
