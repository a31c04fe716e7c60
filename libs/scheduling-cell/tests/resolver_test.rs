// libs/scheduling-cell/tests/resolver_test.rs
//
// Bounded forward-shift conflict resolution: shift behavior, attempt bound,
// duration preservation, determinism.

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, Utc};

use scheduling_cell::models::SchedulingError;
use scheduling_cell::services::conflict::resolve_booking_conflict;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    chrono::NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc()
}

#[test]
fn free_request_is_returned_unchanged() {
    let resolved =
        resolve_booking_conflict(at(10, 0), at(10, 30), &[], Duration::minutes(15), 24).unwrap();

    assert_eq!(resolved.start_time, at(10, 0));
    assert_eq!(resolved.end_time, at(10, 30));
    assert!(!resolved.was_adjusted);
    assert_eq!(resolved.attempts, 0);
}

#[test]
fn single_shift_clears_a_conflict_ending_at_the_shifted_start() {
    // Busy 09:45-10:15; the first 15-minute shift lands at 10:15, which only
    // touches the busy interval and is therefore free.
    let busy = vec![(at(9, 45), at(10, 15))];

    let resolved =
        resolve_booking_conflict(at(10, 0), at(10, 30), &busy, Duration::minutes(15), 24).unwrap();

    assert_eq!(resolved.start_time, at(10, 15));
    assert_eq!(resolved.end_time, at(10, 45));
    assert!(resolved.was_adjusted);
    assert_eq!(resolved.attempts, 1);
}

#[test]
fn identical_busy_interval_shifts_past_its_end() {
    // Busy 10:00-10:30, request 10:00-10:30. The 10:15 candidate still
    // overlaps, so the resolver lands on 10:30.
    let busy = vec![(at(10, 0), at(10, 30))];

    let resolved =
        resolve_booking_conflict(at(10, 0), at(10, 30), &busy, Duration::minutes(15), 24).unwrap();

    assert_eq!(resolved.start_time, at(10, 30));
    assert_eq!(resolved.end_time, at(11, 0));
    assert_eq!(resolved.attempts, 2);
}

#[test]
fn requested_duration_is_preserved_across_shifts() {
    let busy = vec![(at(9, 0), at(12, 0))];

    let resolved =
        resolve_booking_conflict(at(9, 0), at(9, 50), &busy, Duration::minutes(15), 24).unwrap();

    assert_eq!(resolved.end_time - resolved.start_time, Duration::minutes(50));
    assert_eq!(resolved.start_time, at(12, 0));
}

#[test]
fn exhausting_max_attempts_fails_with_no_slot_found() {
    // A full day of busy time that 24 shifts of 15 minutes cannot escape.
    let busy = vec![(at(8, 0), at(20, 0))];

    let result = resolve_booking_conflict(at(9, 0), at(9, 30), &busy, Duration::minutes(15), 24);

    assert_matches!(result, Err(SchedulingError::NoSlotFound { attempts: 24 }));
}

#[test]
fn final_shift_candidate_is_not_examined_once_the_budget_is_spent() {
    // Busy through 09:45. The candidate reached by the third shift (09:45)
    // is free, but a budget of 3 is spent before it is looked at.
    let busy = vec![(at(9, 0), at(9, 45))];

    let exhausted = resolve_booking_conflict(at(9, 0), at(9, 30), &busy, Duration::minutes(15), 3);
    assert_matches!(exhausted, Err(SchedulingError::NoSlotFound { attempts: 3 }));

    // One more attempt and the same candidate resolves.
    let resolved =
        resolve_booking_conflict(at(9, 0), at(9, 30), &busy, Duration::minutes(15), 4).unwrap();
    assert_eq!(resolved.start_time, at(9, 45));
    assert_eq!(resolved.attempts, 3);
}

#[test]
fn zero_attempt_budget_fails_without_resolving() {
    let busy = vec![(at(10, 0), at(10, 30))];

    let result = resolve_booking_conflict(at(10, 0), at(10, 30), &busy, Duration::minutes(15), 0);

    assert_matches!(result, Err(SchedulingError::NoSlotFound { attempts: 0 }));
}

#[test]
fn resolver_only_moves_forward() {
    // Free space exists before the request; the resolver must not use it.
    let busy = vec![(at(10, 0), at(11, 0))];

    let resolved =
        resolve_booking_conflict(at(10, 0), at(10, 30), &busy, Duration::minutes(15), 24).unwrap();

    assert!(resolved.start_time >= at(10, 0));
    assert_eq!(resolved.start_time, at(11, 0));
}

#[test]
fn resolution_is_deterministic() {
    let busy = vec![
        (at(9, 0), at(9, 30)),
        (at(10, 0), at(10, 45)),
        (at(11, 0), at(11, 30)),
    ];

    let first =
        resolve_booking_conflict(at(9, 0), at(9, 45), &busy, Duration::minutes(15), 24).unwrap();
    let second =
        resolve_booking_conflict(at(9, 0), at(9, 45), &busy, Duration::minutes(15), 24).unwrap();

    assert_eq!(first, second);
}

#[test]
fn invalid_inputs_are_rejected() {
    assert_matches!(
        resolve_booking_conflict(at(10, 0), at(10, 0), &[], Duration::minutes(15), 24),
        Err(SchedulingError::Validation(_))
    );
    assert_matches!(
        resolve_booking_conflict(at(10, 0), at(10, 30), &[], Duration::minutes(0), 24),
        Err(SchedulingError::Validation(_))
    );
}
