// libs/scheduling-cell/src/services/booking.rs
//
// SchedulingService orchestrates settings, slot generation, conflict and
// business-rule filtering, the overlay, the availability cache, and the
// external system of record.
//
// Failure policy: external reads during availability computation fail open
// (assume no conflicts known); external reads and writes during a booking
// attempt fail closed; cache failures are always non-fatal.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::models::{
    AvailabilityPage, AvailabilityQuery, BookAppointmentRequest, BookingConfirmation,
    CancelAppointmentRequest, ConflictScope, CreateAppointmentCall,
    RescheduleAppointmentRequest, RescheduleOutcome, RescheduleResponse, SchedulingError,
};
use crate::services::cache::{AvailabilityCache, BookingOverlayCache, CacheBackend};
use crate::services::conflict;
use crate::services::directory::AppointmentDirectory;
use crate::services::rules;
use crate::services::settings::SettingsStore;
use crate::services::slots;

/// Filtered availability pages stay cached for a minute; booking mutations
/// invalidate them earlier.
const AVAILABILITY_CACHE_TTL: StdDuration = StdDuration::from_secs(60);

/// How long the system of record is assumed to need before its own reads
/// reflect a confirmed write. Overlay entries older than this are redundant.
const OVERLAY_TTL: StdDuration = StdDuration::from_secs(300);

const DEFAULT_SHIFT_INCREMENT_MINUTES: i64 = 15;
const DEFAULT_MAX_SHIFT_ATTEMPTS: u32 = 24;
const DEFAULT_PAGE_LIMIT: usize = 50;

pub struct SchedulingService {
    settings: SettingsStore,
    directory: Arc<dyn AppointmentDirectory>,
    availability_cache: AvailabilityCache,
    overlay: BookingOverlayCache,
    shift_increment: Duration,
    max_shift_attempts: u32,
}

/// Shared axum state for the scheduling routes.
pub struct SchedulingState {
    pub service: SchedulingService,
    pub config: AppConfig,
}

impl SchedulingService {
    pub fn new(
        settings: SettingsStore,
        directory: Arc<dyn AppointmentDirectory>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            settings,
            directory,
            availability_cache: AvailabilityCache::new(
                Arc::clone(&cache_backend),
                AVAILABILITY_CACHE_TTL,
            ),
            overlay: BookingOverlayCache::new(cache_backend, OVERLAY_TTL),
            shift_increment: Duration::minutes(DEFAULT_SHIFT_INCREMENT_MINUTES),
            max_shift_attempts: DEFAULT_MAX_SHIFT_ATTEMPTS,
        }
    }

    pub fn with_resolver_config(mut self, increment: Duration, max_attempts: u32) -> Self {
        self.shift_increment = increment;
        self.max_shift_attempts = max_attempts;
        self
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.settings
    }

    // ==========================================================================
    // AVAILABILITY
    // ==========================================================================

    pub async fn get_availability(
        &self,
        query: AvailabilityQuery,
    ) -> Result<AvailabilityPage, SchedulingError> {
        if query.to_date < query.from_date {
            return Err(SchedulingError::Validation(
                "to_date must not be before from_date".to_string(),
            ));
        }

        if let Some(page) = self.availability_cache.get(&query).await {
            return Ok(page);
        }

        let settings = self.settings.get_settings().await;
        let slot_duration = settings.slot_duration();
        let scope = query.scope();

        let candidates = slots::generate_slots(
            query.from_date,
            query.to_date,
            slot_duration,
            query.provider_id,
            query.practice_id,
            &settings.business_hours,
        );

        let range_start = query
            .from_date
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);
        let range_end = (query.to_date + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);

        // Read failures here degrade to "no conflicts known": a transient
        // upstream error must not blank out all availability.
        let existing = match self
            .directory
            .appointments_in_range(&scope, range_start, range_end)
            .await
        {
            Ok(appointments) => appointments,
            Err(e) => {
                warn!("Appointment query failed, assuming no conflicts known: {}", e);
                Vec::new()
            }
        };

        let overlay_entries = self.overlay.get_all(&scope.scope_key()).await;

        let filtered = conflict::filter_conflicts(
            candidates,
            &existing,
            &overlay_entries,
            &scope,
            slot_duration,
        );
        let ruled = rules::apply_business_rules(filtered, &settings, Utc::now());

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let offset = query.offset.unwrap_or(0);
        let total = ruled.len();
        let page_slots = ruled.into_iter().skip(offset).take(limit).collect();

        let page = AvailabilityPage {
            slots: page_slots,
            total,
            limit,
            offset,
        };

        // The page is complete at this point; a single cache write means a
        // cancelled request can never leave a partially filtered list behind.
        self.availability_cache.set(&query, &page).await;

        Ok(page)
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookingConfirmation, SchedulingError> {
        if request.end_time <= request.start_time {
            return Err(SchedulingError::Validation(
                "end time must be after start time".to_string(),
            ));
        }

        info!(
            "Booking request for patient {} at {}",
            request.patient_id, request.start_time
        );

        let settings = self.settings.get_settings().await;
        let scope = request.scope();
        let scope_key = scope.scope_key();

        let busy = self
            .busy_intervals_for_day(&scope, request.start_time, &settings)
            .await?;

        let resolved = conflict::resolve_booking_conflict(
            request.start_time,
            request.end_time,
            &busy,
            self.shift_increment,
            self.max_shift_attempts,
        )?;

        if resolved.was_adjusted {
            info!(
                "Requested slot taken, shifted to {} after {} attempts",
                resolved.start_time, resolved.attempts
            );
        }

        // External create must succeed before anything else happens; a write
        // failure fails the whole booking.
        let created = self
            .directory
            .create_appointment(&CreateAppointmentCall {
                patient_id: request.patient_id,
                provider_id: request.provider_id,
                resource_id: request.resource_id,
                start_time: resolved.start_time,
                end_time: resolved.end_time,
                patient_notes: request.patient_notes.clone(),
            })
            .await?;

        // Overlay first, then invalidate: a concurrent availability query
        // that recomputes after the invalidation must already see the
        // overlay entry.
        self.overlay
            .put(&scope_key, resolved.start_time, resolved.end_time)
            .await;
        self.availability_cache.invalidate(Some(&scope_key)).await;

        info!(
            "Booked appointment {} for patient {} at {}",
            created.id, request.patient_id, resolved.start_time
        );

        Ok(BookingConfirmation {
            appointment_id: created.id,
            requested_start_time: request.start_time,
            requested_end_time: request.end_time,
            scheduled_start_time: resolved.start_time,
            scheduled_end_time: resolved.end_time,
            was_adjusted: resolved.was_adjusted,
        })
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: uuid::Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<(), SchedulingError> {
        self.directory.cancel_appointment(appointment_id).await?;

        let scope = ConflictScope {
            provider_id: request.provider_id,
            resource_id: request.resource_id,
            patient_id: request.patient_id,
        };

        // Unknown scope invalidates everything rather than serving stale
        // availability.
        if scope == ConflictScope::default() {
            self.availability_cache.invalidate(None).await;
        } else {
            self.availability_cache
                .invalidate(Some(&scope.scope_key()))
                .await;
        }

        info!("Cancelled appointment {}", appointment_id);
        Ok(())
    }

    /// Cancel-old-then-book-new. Not atomic: if the new booking fails after
    /// the cancellation succeeded, one compensating re-book of the original
    /// interval is attempted, and the outcome always says what happened.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: uuid::Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<RescheduleResponse, SchedulingError> {
        if request.new_end_time <= request.new_start_time {
            return Err(SchedulingError::Validation(
                "end time must be after start time".to_string(),
            ));
        }

        self.directory.cancel_appointment(appointment_id).await?;

        let book_request = BookAppointmentRequest {
            patient_id: request.patient_id,
            provider_id: request.provider_id,
            practice_id: request.practice_id,
            resource_id: request.resource_id,
            start_time: request.new_start_time,
            end_time: request.new_end_time,
            patient_notes: request.reason.clone(),
        };
        let scope_key = book_request.scope().scope_key();
        self.availability_cache.invalidate(Some(&scope_key)).await;

        match self.book_appointment(book_request).await {
            Ok(confirmation) => Ok(RescheduleResponse {
                outcome: RescheduleOutcome::Rescheduled,
                appointment: Some(confirmation),
                original_start_time: request.original_start_time,
                original_end_time: request.original_end_time,
            }),
            Err(book_error) => {
                warn!(
                    "Reschedule booking failed after cancellation, re-booking original slot: {}",
                    book_error
                );

                let rollback = self
                    .directory
                    .create_appointment(&CreateAppointmentCall {
                        patient_id: request.patient_id,
                        provider_id: request.provider_id,
                        resource_id: request.resource_id,
                        start_time: request.original_start_time,
                        end_time: request.original_end_time,
                        patient_notes: request.reason.clone(),
                    })
                    .await;

                match rollback {
                    Ok(restored) => {
                        self.overlay
                            .put(
                                &scope_key,
                                request.original_start_time,
                                request.original_end_time,
                            )
                            .await;
                        self.availability_cache.invalidate(Some(&scope_key)).await;

                        Ok(RescheduleResponse {
                            outcome: RescheduleOutcome::RolledBack,
                            appointment: Some(BookingConfirmation {
                                appointment_id: restored.id,
                                requested_start_time: request.new_start_time,
                                requested_end_time: request.new_end_time,
                                scheduled_start_time: request.original_start_time,
                                scheduled_end_time: request.original_end_time,
                                was_adjusted: false,
                            }),
                            original_start_time: request.original_start_time,
                            original_end_time: request.original_end_time,
                        })
                    }
                    Err(rollback_error) => {
                        warn!(
                            "Compensating re-book failed, patient holds no appointment: {}",
                            rollback_error
                        );
                        Ok(RescheduleResponse {
                            outcome: RescheduleOutcome::OriginalLost,
                            appointment: None,
                            original_start_time: request.original_start_time,
                            original_end_time: request.original_end_time,
                        })
                    }
                }
            }
        }
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    /// Busy intervals for the calendar day of a requested booking, widened by
    /// the configured buffer. The window extends past the day end by the
    /// resolver's maximum reach, so a late-night request shifted across
    /// midnight is still checked against next-day appointments. Read failures
    /// here fail closed: booking against unknown state risks a double-booking.
    async fn busy_intervals_for_day(
        &self,
        scope: &ConflictScope,
        requested_start: DateTime<Utc>,
        settings: &crate::models::AvailabilitySettings,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, SchedulingError> {
        let day = requested_start.date_naive();
        let day_start = day
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(requested_start);
        let day_end = day_start
            + Duration::days(1)
            + self.shift_increment * (self.max_shift_attempts as i32);

        let existing = self
            .directory
            .appointments_in_range(scope, day_start, day_end)
            .await?;

        let buffer = Duration::minutes(settings.buffer_minutes);
        let mut busy: Vec<(DateTime<Utc>, DateTime<Utc>)> =
            conflict::busy_intervals(&existing, scope, settings.slot_duration())
                .into_iter()
                .map(|(start, end)| (start - buffer, end + buffer))
                .collect();

        for entry in self.overlay.get_all(&scope.scope_key()).await {
            busy.push((entry.start_time - buffer, entry.end_time + buffer));
        }

        Ok(busy)
    }
}
