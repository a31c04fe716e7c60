// libs/scheduling-cell/src/services/rules.rs
//
// Business-rule filtering applied after conflict filtering. Rule order is
// fixed: past slots, advance window, blocked dates, enabled-window re-check,
// blocked time slots, then the per-day cap on the sorted list.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::debug;

use crate::models::{AvailabilitySettings, CandidateSlot};

use super::conflict::overlaps;

pub fn apply_business_rules(
    slots: Vec<CandidateSlot>,
    settings: &AvailabilitySettings,
    now: DateTime<Utc>,
) -> Vec<CandidateSlot> {
    let before = slots.len();

    let mut kept: Vec<CandidateSlot> = slots
        .into_iter()
        .filter(|slot| slot.start_time >= now)
        .filter(|slot| (slot.start_time - now).num_days() <= settings.advance_booking_days)
        .filter(|slot| !settings.blocked_dates.contains(&slot.start_time.date_naive()))
        .filter(|slot| within_enabled_window(slot, settings))
        .filter(|slot| !overlaps_blocked_time_slot(slot, settings))
        .collect();

    // Ascending by start, stable tie-break on provider id.
    kept.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });

    if let Some(max_per_day) = settings.max_slots_per_day {
        kept = cap_slots_per_day(kept, max_per_day as usize);
    }

    debug!("Business rules kept {} of {} slots", kept.len(), before);
    kept
}

/// Re-check the generator's guarantee that the slot sits inside the enabled
/// window for its weekday.
fn within_enabled_window(slot: &CandidateSlot, settings: &AvailabilitySettings) -> bool {
    let date = slot.start_time.date_naive();
    let window = settings.business_hours.day(date.weekday());
    if !window.enabled {
        return false;
    }

    let window_start = date.and_time(window.start).and_utc();
    let window_end = date.and_time(window.end).and_utc();
    slot.start_time >= window_start && slot.end_time <= window_end
}

fn overlaps_blocked_time_slot(slot: &CandidateSlot, settings: &AvailabilitySettings) -> bool {
    let date = slot.start_time.date_naive();
    settings
        .blocked_time_slots
        .iter()
        .filter(|blocked| blocked.date == date)
        .any(|blocked| {
            let blocked_start = blocked.date.and_time(blocked.start).and_utc();
            let blocked_end = blocked.date.and_time(blocked.end).and_utc();
            overlaps(slot.start_time, slot.end_time, blocked_start, blocked_end)
        })
}

/// Keep only the earliest `max_per_day` slots per calendar date. Input must
/// already be sorted ascending by start time.
fn cap_slots_per_day(slots: Vec<CandidateSlot>, max_per_day: usize) -> Vec<CandidateSlot> {
    let mut counts: HashMap<NaiveDate, usize> = HashMap::new();

    slots
        .into_iter()
        .filter(|slot| {
            let count = counts.entry(slot.start_time.date_naive()).or_insert(0);
            *count += 1;
            *count <= max_per_day
        })
        .collect()
}
