// libs/scheduling-cell/src/services/slots.rs
//
// Pure candidate-slot generation from business hours. No I/O here; existing
// bookings and business rules are applied by separate filters.

use chrono::{Datelike, Duration, NaiveDate};
use uuid::Uuid;

use crate::models::{CandidateSlot, WeeklyHours};

/// Generate candidate slots for every calendar day in `[from_date, to_date]`.
///
/// Disabled weekdays emit nothing. Each enabled day is walked from its
/// configured start in `slot_duration` increments; a final step whose end
/// would exceed the day's configured end is discarded, so no partial slot is
/// ever emitted and no slot crosses a day boundary.
pub fn generate_slots(
    from_date: NaiveDate,
    to_date: NaiveDate,
    slot_duration: Duration,
    provider_id: Option<Uuid>,
    practice_id: Option<Uuid>,
    business_hours: &WeeklyHours,
) -> Vec<CandidateSlot> {
    let mut slots = Vec::new();

    if slot_duration <= Duration::zero() || from_date > to_date {
        return slots;
    }

    let mut date = from_date;
    loop {
        let window = business_hours.day(date.weekday());
        if window.enabled && window.start < window.end {
            let day_start = date.and_time(window.start).and_utc();
            let day_end = date.and_time(window.end).and_utc();

            let mut current_time = day_start;
            while current_time + slot_duration <= day_end {
                slots.push(CandidateSlot {
                    start_time: current_time,
                    end_time: current_time + slot_duration,
                    provider_id,
                    practice_id,
                    duration_minutes: slot_duration.num_minutes(),
                });
                current_time += slot_duration;
            }
        }

        if date == to_date {
            break;
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn slot_duration_is_uniform() {
        let hours = WeeklyHours::default();
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(); // a Monday

        let slots = generate_slots(date, date, Duration::minutes(45), None, None, &hours);

        assert!(!slots.is_empty());
        for slot in &slots {
            assert_eq!(slot.end_time - slot.start_time, Duration::minutes(45));
        }
    }

    #[test]
    fn no_partial_final_slot() {
        let mut hours = WeeklyHours::default();
        hours.monday.end = NaiveTime::from_hms_opt(9, 50, 0).unwrap(); // 50-minute day

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let slots = generate_slots(date, date, Duration::minutes(30), None, None, &hours);

        assert_eq!(slots.len(), 1);
        assert_eq!(
            slots[0].end_time.time(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
    }
}
