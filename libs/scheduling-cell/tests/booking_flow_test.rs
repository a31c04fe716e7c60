// libs/scheduling-cell/tests/booking_flow_test.rs
//
// End-to-end facade behavior against a mocked practice-management API:
// the overlay bridging stale upstream reads, forward-shift adjustment,
// fail-closed booking, fail-open availability, and reschedule compensation.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use async_trait::async_trait;

use scheduling_cell::models::{
    AppointmentStatus, AvailabilityQuery, BookAppointmentRequest, ConflictScope,
    CreateAppointmentCall, CreatedAppointment, ExistingAppointment, RescheduleAppointmentRequest,
    RescheduleOutcome, SchedulingError,
};
use scheduling_cell::services::booking::SchedulingService;
use scheduling_cell::services::cache::InMemoryCacheBackend;
use scheduling_cell::services::directory::{AppointmentDirectory, PracticeDirectory};
use scheduling_cell::services::settings::SettingsStore;
use shared_config::AppConfig;
use shared_practice::PracticeClient;

/// The next weekday at least two days out, so generated slots sit inside the
/// default advance-booking window and never in the past.
fn bookable_day() -> NaiveDate {
    let mut day = (Utc::now() + Duration::days(2)).date_naive();
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += Duration::days(1);
    }
    day
}

fn at(day: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    day.and_hms_opt(hour, minute, 0).unwrap().and_utc()
}

fn service_for(server: &MockServer) -> SchedulingService {
    let config = AppConfig {
        practice_api_url: server.uri(),
        practice_api_key: "test-key".to_string(),
        redis_url: None,
        http_timeout_seconds: 5,
    };
    let client = Arc::new(PracticeClient::new(&config));
    SchedulingService::new(
        SettingsStore::new(Arc::clone(&client)),
        Arc::new(PracticeDirectory::new(client)),
        Arc::new(InMemoryCacheBackend::new()),
    )
}

async fn mock_default_settings(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v1/availability_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![serde_json::to_value(
            scheduling_cell::models::AvailabilitySettings::default(),
        )
        .unwrap()]))
        .mount(server)
        .await;
}

async fn mock_no_appointments(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Array(vec![])))
        .mount(server)
        .await;
}

fn created_body(start: DateTime<Utc>, end: DateTime<Utc>) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "start_time": start.to_rfc3339(),
        "end_time": end.to_rfc3339(),
    })
}

fn book_request(provider_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        provider_id: Some(provider_id),
        practice_id: None,
        resource_id: None,
        start_time: start,
        end_time: end,
        patient_notes: None,
    }
}

fn day_query(day: NaiveDate, provider_id: Uuid) -> AvailabilityQuery {
    AvailabilityQuery {
        from_date: day,
        to_date: day,
        provider_id: Some(provider_id),
        practice_id: None,
        resource_id: None,
        patient_id: None,
        limit: None,
        offset: None,
    }
}

// ==============================================================================
// OVERLAY CONSISTENCY BRIDGE
// ==============================================================================

#[tokio::test]
async fn freshly_booked_slot_disappears_even_while_upstream_reads_are_stale() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    // Upstream never reflects the write within this test: its reads stay empty.
    mock_no_appointments(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(created_body(at(day, 10, 0), at(day, 10, 30))),
        )
        .mount(&server)
        .await;

    let service = service_for(&server);

    let confirmation = service
        .book_appointment(book_request(provider, at(day, 10, 0), at(day, 10, 30)))
        .await
        .expect("booking succeeds");
    assert!(!confirmation.was_adjusted);

    let page = service
        .get_availability(day_query(day, provider))
        .await
        .expect("availability succeeds");

    assert!(!page.slots.is_empty());
    assert!(
        page.slots.iter().all(|s| s.start_time != at(day, 10, 0)),
        "booked slot must not be offered again"
    );
    assert!(page.slots.iter().any(|s| s.start_time == at(day, 10, 30)));
}

#[tokio::test]
async fn booking_adjusts_forward_when_the_requested_slot_is_taken() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![json!({
            "id": Uuid::new_v4(),
            "start_time": at(day, 10, 0).to_rfc3339(),
            "end_time": at(day, 10, 30).to_rfc3339(),
            "provider_id": provider,
            "resource_id": null,
            "patient_id": null,
            "status": "confirmed",
        })]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(created_body(at(day, 10, 30), at(day, 11, 0))),
        )
        .mount(&server)
        .await;

    let service = service_for(&server);
    let confirmation = service
        .book_appointment(book_request(provider, at(day, 10, 0), at(day, 10, 30)))
        .await
        .expect("booking succeeds");

    assert!(confirmation.was_adjusted);
    assert_eq!(confirmation.requested_start_time, at(day, 10, 0));
    assert_eq!(confirmation.scheduled_start_time, at(day, 10, 30));
    assert_eq!(confirmation.scheduled_end_time, at(day, 11, 0));
}

/// Directory serving a fixed appointment list, honoring the requested range
/// the way the real API does.
struct FixedDirectory {
    appointments: Vec<ExistingAppointment>,
}

#[async_trait]
impl AppointmentDirectory for FixedDirectory {
    async fn appointments_in_range(
        &self,
        _scope: &ConflictScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExistingAppointment>, SchedulingError> {
        Ok(self
            .appointments
            .iter()
            .filter(|a| a.start_time >= from && a.start_time < to)
            .cloned()
            .collect())
    }

    async fn create_appointment(
        &self,
        call: &CreateAppointmentCall,
    ) -> Result<CreatedAppointment, SchedulingError> {
        Ok(CreatedAppointment {
            id: Uuid::new_v4(),
            start_time: call.start_time,
            end_time: call.end_time,
        })
    }

    async fn cancel_appointment(&self, _appointment_id: Uuid) -> Result<(), SchedulingError> {
        Ok(())
    }
}

fn service_with_directory(directory: Arc<dyn AppointmentDirectory>) -> SchedulingService {
    // Settings endpoint unreachable; reads fall back to defaults.
    let config = AppConfig {
        practice_api_url: "http://127.0.0.1:9".to_string(),
        practice_api_key: "test-key".to_string(),
        redis_url: None,
        http_timeout_seconds: 1,
    };
    let client = Arc::new(PracticeClient::new(&config));
    SchedulingService::new(
        SettingsStore::new(client),
        directory,
        Arc::new(InMemoryCacheBackend::new()),
    )
}

#[tokio::test]
async fn late_night_booking_sees_conflicts_on_the_following_day() {
    let day = bookable_day();
    let next_day = day + Duration::days(1);
    let provider = Uuid::new_v4();

    // The only existing appointment sits just past midnight on the next day.
    let service = service_with_directory(Arc::new(FixedDirectory {
        appointments: vec![ExistingAppointment {
            id: Some(Uuid::new_v4()),
            start_time: at(next_day, 0, 0),
            end_time: Some(at(next_day, 0, 30)),
            provider_id: Some(provider),
            resource_id: None,
            patient_id: None,
            status: AppointmentStatus::Confirmed,
        }],
    }));

    let confirmation = service
        .book_appointment(book_request(provider, at(day, 23, 45), at(next_day, 0, 15)))
        .await
        .expect("booking succeeds");

    // 23:45, 00:00 and 00:15 all collide with the midnight appointment.
    assert!(confirmation.was_adjusted);
    assert_eq!(confirmation.scheduled_start_time, at(next_day, 0, 30));
    assert_eq!(confirmation.scheduled_end_time, at(next_day, 1, 0));
}

// ==============================================================================
// FAILURE POLICY
// ==============================================================================

#[tokio::test]
async fn external_write_failure_fails_the_booking_and_leaves_the_slot_offered() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    mock_no_appointments(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let result = service
        .book_appointment(book_request(provider, at(day, 10, 0), at(day, 10, 30)))
        .await;

    assert_matches!(result, Err(SchedulingError::ExternalWrite(_)));

    // No overlay entry was written, so the slot is still available.
    let page = service
        .get_availability(day_query(day, provider))
        .await
        .expect("availability succeeds");
    assert!(page.slots.iter().any(|s| s.start_time == at(day, 10, 0)));
}

#[tokio::test]
async fn booking_fails_closed_when_existing_appointments_cannot_be_read() {
    let server = MockServer::start().await;
    let day = bookable_day();

    mock_default_settings(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3) // one attempt plus two retries
        .mount(&server)
        .await;

    let service = service_for(&server);
    let result = service
        .book_appointment(book_request(Uuid::new_v4(), at(day, 10, 0), at(day, 10, 30)))
        .await;

    assert_matches!(result, Err(SchedulingError::ExternalQuery(_)));
}

#[tokio::test]
async fn availability_fails_open_when_existing_appointments_cannot_be_read() {
    let server = MockServer::start().await;
    let day = bookable_day();

    mock_default_settings(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let page = service
        .get_availability(day_query(day, Uuid::new_v4()))
        .await
        .expect("availability degrades instead of failing");

    // Default hours 09:00-17:00 at 30 minutes: the full day is offered.
    assert_eq!(page.total, 16);
    assert!(page.slots.iter().any(|s| s.start_time == at(day, 10, 0)));
}

#[tokio::test]
async fn invalid_booking_window_is_rejected_before_any_external_call() {
    let server = MockServer::start().await;
    let day = bookable_day();

    let service = service_for(&server);
    let result = service
        .book_appointment(book_request(Uuid::new_v4(), at(day, 10, 30), at(day, 10, 0)))
        .await;

    assert_matches!(result, Err(SchedulingError::Validation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ==============================================================================
// RESCHEDULE COMPENSATION
// ==============================================================================

fn reschedule_request(
    provider_id: Uuid,
    day: NaiveDate,
) -> RescheduleAppointmentRequest {
    RescheduleAppointmentRequest {
        patient_id: Uuid::new_v4(),
        provider_id: Some(provider_id),
        practice_id: None,
        resource_id: None,
        original_start_time: at(day, 9, 0),
        original_end_time: at(day, 9, 30),
        new_start_time: at(day, 14, 0),
        new_end_time: at(day, 14, 30),
        reason: None,
    }
}

async fn mock_cancel_ok(server: &MockServer) {
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/api/v1/appointments/[0-9a-f-]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn successful_reschedule_reports_the_new_slot() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    mock_no_appointments(&server).await;
    mock_cancel_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(created_body(at(day, 14, 0), at(day, 14, 30))),
        )
        .mount(&server)
        .await;

    let service = service_for(&server);
    let response = service
        .reschedule_appointment(Uuid::new_v4(), reschedule_request(provider, day))
        .await
        .expect("reschedule succeeds");

    assert_eq!(response.outcome, RescheduleOutcome::Rescheduled);
    let confirmation = response.appointment.expect("new appointment present");
    assert_eq!(confirmation.scheduled_start_time, at(day, 14, 0));
}

#[tokio::test]
async fn failed_rebooking_rolls_back_to_the_original_slot() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    mock_no_appointments(&server).await;
    mock_cancel_ok(&server).await;
    // The first create (the new slot) fails; the compensating create of the
    // original interval succeeds. Mount order decides which mock answers.
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(created_body(at(day, 9, 0), at(day, 9, 30))),
        )
        .mount(&server)
        .await;

    let service = service_for(&server);
    let response = service
        .reschedule_appointment(Uuid::new_v4(), reschedule_request(provider, day))
        .await
        .expect("rollback is reported, not raised");

    assert_eq!(response.outcome, RescheduleOutcome::RolledBack);
    let confirmation = response.appointment.expect("restored appointment present");
    assert_eq!(confirmation.scheduled_start_time, at(day, 9, 0));
    assert_eq!(confirmation.scheduled_end_time, at(day, 9, 30));
}

#[tokio::test]
async fn lost_original_is_reported_when_compensation_also_fails() {
    let server = MockServer::start().await;
    let day = bookable_day();
    let provider = Uuid::new_v4();

    mock_default_settings(&server).await;
    mock_no_appointments(&server).await;
    mock_cancel_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let response = service
        .reschedule_appointment(Uuid::new_v4(), reschedule_request(provider, day))
        .await
        .expect("lost original is reported, not raised");

    assert_eq!(response.outcome, RescheduleOutcome::OriginalLost);
    assert!(response.appointment.is_none());
    assert_eq!(response.original_start_time, at(day, 9, 0));
}

#[tokio::test]
async fn cancel_failure_aborts_the_reschedule_before_any_booking() {
    let server = MockServer::start().await;
    let day = bookable_day();

    mock_default_settings(&server).await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/api/v1/appointments/[0-9a-f-]+$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let result = service
        .reschedule_appointment(Uuid::new_v4(), reschedule_request(Uuid::new_v4(), day))
        .await;

    assert_matches!(result, Err(SchedulingError::ExternalWrite(_)));
}
