// libs/scheduling-cell/src/services/conflict.rs
//
// Conflict filtering and the bounded forward-shift resolver. Both are pure:
// callers fetch existing appointments and overlay entries first, so every
// decision here is deterministic and unit-testable.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{
    BookedSlotOverlayEntry, CandidateSlot, ConflictScope, ExistingAppointment, ResolvedSlot,
    SchedulingError,
};

/// Half-open interval overlap: a slot ending exactly when another begins does
/// not conflict.
pub fn overlaps(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

/// Busy intervals in scope, with the fallback duration applied to
/// appointments that carry no end time. Cancelled and otherwise inactive
/// appointments are excluded.
pub fn busy_intervals(
    existing: &[ExistingAppointment],
    scope: &ConflictScope,
    fallback_duration: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    existing
        .iter()
        .filter(|appointment| appointment.status.is_active() && scope.matches(appointment))
        .map(|appointment| {
            (
                appointment.start_time,
                appointment.end_or(fallback_duration),
            )
        })
        .collect()
}

/// Drop candidates overlapping any in-scope existing appointment or any
/// overlay entry. Overlay entries are already scope-keyed, so only their
/// intervals are checked.
pub fn filter_conflicts(
    candidates: Vec<CandidateSlot>,
    existing: &[ExistingAppointment],
    overlay: &[BookedSlotOverlayEntry],
    scope: &ConflictScope,
    fallback_duration: Duration,
) -> Vec<CandidateSlot> {
    let busy = busy_intervals(existing, scope, fallback_duration);

    let before = candidates.len();
    let kept: Vec<CandidateSlot> = candidates
        .into_iter()
        .filter(|slot| {
            let against_existing = busy
                .iter()
                .any(|(start, end)| overlaps(slot.start_time, slot.end_time, *start, *end));
            let against_overlay = overlay.iter().any(|entry| {
                overlaps(slot.start_time, slot.end_time, entry.start_time, entry.end_time)
            });
            !against_existing && !against_overlay
        })
        .collect();

    debug!(
        "Conflict filter kept {} of {} candidates ({} busy intervals, {} overlay entries)",
        kept.len(),
        before,
        busy.len(),
        overlay.len()
    );

    kept
}

/// Resolve a requested interval to the nearest free one by shifting forward
/// in `increment` steps, preserving the requested duration.
///
/// `max_attempts` bounds how many candidates are examined: once the budget
/// is spent the resolver fails with `NoSlotFound` without looking at the
/// candidate reached by the final shift. Given the same inputs the result is
/// always the same.
pub fn resolve_booking_conflict(
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    increment: Duration,
    max_attempts: u32,
) -> Result<ResolvedSlot, SchedulingError> {
    if requested_end <= requested_start {
        return Err(SchedulingError::Validation(
            "end time must be after start time".to_string(),
        ));
    }
    if increment <= Duration::zero() {
        return Err(SchedulingError::Validation(
            "shift increment must be positive".to_string(),
        ));
    }

    let duration = requested_end - requested_start;
    let mut candidate = requested_start;
    let mut attempts: u32 = 0;

    loop {
        if attempts == max_attempts {
            return Err(SchedulingError::NoSlotFound { attempts });
        }

        let candidate_end = candidate + duration;

        let has_conflict = busy
            .iter()
            .any(|(start, end)| overlaps(candidate, candidate_end, *start, *end));

        if !has_conflict {
            return Ok(ResolvedSlot {
                start_time: candidate,
                end_time: candidate_end,
                was_adjusted: attempts > 0,
                attempts,
            });
        }

        candidate += increment;
        attempts += 1;
    }
}
