// Presentation helpers shared by the TUI, the CLI snapshot and the HTTP API

use crate::classifier::EntityStatus;
use crate::reconciliation::ReconciledEntity;
use chrono::{DateTime, Utc};

/// `"Ns ago"` under a minute, `"Nm ago"` under an hour, else wall-clock `HH:MM:SS`.
///
/// Future timestamps read as `"0s ago"`.
pub fn format_age(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(observed_at);
    let secs = age.num_seconds().max(0);

    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 60 * 60 {
        format!("{}m ago", secs / 60)
    } else {
        observed_at.format("%H:%M:%S").to_string()
    }
}

/// Age text for an entity; "No data" and "Unknown" cover the missing cases
pub fn entity_age(entity: &ReconciledEntity, now: DateTime<Utc>) -> String {
    match (entity.has_reading, entity.observed_at) {
        (false, _) => "No data".to_string(),
        (true, None) => "Unknown".to_string(),
        (true, Some(at)) => format_age(at, now),
    }
}

/// Badge text: no data wins over tier, staleness is appended
pub fn status_label(status: EntityStatus) -> String {
    match status {
        EntityStatus::NoData => "No data".to_string(),
        EntityStatus::Fresh(tier) => tier.label().to_string(),
        EntityStatus::Stale(tier) => format!("{} (stale)", tier.label()),
    }
}

pub fn people_label(count: u32) -> String {
    if count == 1 {
        "1 person".to_string()
    } else {
        format!("{} people", count)
    }
}
