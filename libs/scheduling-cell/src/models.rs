// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY SETTINGS
// ==============================================================================

/// Enabled window for a single weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub enabled: bool,
}

impl DayWindow {
    pub fn new(start_h: u32, end_h: u32, enabled: bool) -> Self {
        Self {
            start: NaiveTime::from_hms_opt(start_h, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(end_h, 0, 0).unwrap_or(NaiveTime::MIN),
            enabled,
        }
    }
}

/// Business hours with all 7 weekdays always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub monday: DayWindow,
    pub tuesday: DayWindow,
    pub wednesday: DayWindow,
    pub thursday: DayWindow,
    pub friday: DayWindow,
    pub saturday: DayWindow,
    pub sunday: DayWindow,
}

impl WeeklyHours {
    pub fn day(&self, weekday: Weekday) -> &DayWindow {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn day_mut(&mut self, weekday: Weekday) -> &mut DayWindow {
        match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }
}

impl Default for WeeklyHours {
    fn default() -> Self {
        let open = DayWindow::new(9, 17, true);
        let closed = DayWindow::new(9, 17, false);
        Self {
            monday: open,
            tuesday: open,
            wednesday: open,
            thursday: open,
            friday: open,
            saturday: closed,
            sunday: closed,
        }
    }
}

/// An admin-blocked interval on a specific date. Natural identity is
/// (date, start, end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTimeSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Persisted business rules for slot generation and filtering. Single row,
/// created with defaults on first read if absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    pub business_hours: WeeklyHours,
    pub blocked_dates: BTreeSet<NaiveDate>,
    pub blocked_time_slots: Vec<BlockedTimeSlot>,
    pub advance_booking_days: i64,
    pub slot_duration_minutes: i64,
    pub buffer_minutes: i64,
    pub max_slots_per_day: Option<u32>,
    pub timezone: String,
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            business_hours: WeeklyHours::default(),
            blocked_dates: BTreeSet::new(),
            blocked_time_slots: Vec::new(),
            advance_booking_days: 30,
            slot_duration_minutes: 30,
            buffer_minutes: 0,
            max_slots_per_day: None,
            timezone: "UTC".to_string(),
        }
    }
}

impl AvailabilitySettings {
    pub fn slot_duration(&self) -> Duration {
        Duration::minutes(self.slot_duration_minutes)
    }

    /// Idempotent: blocking an already-blocked date is a no-op.
    pub fn block_date(&mut self, date: NaiveDate) {
        self.blocked_dates.insert(date);
    }

    pub fn unblock_date(&mut self, date: NaiveDate) {
        self.blocked_dates.remove(&date);
    }

    /// Idempotent on (date, start, end).
    pub fn block_time_slot(&mut self, slot: BlockedTimeSlot) {
        if !self.blocked_time_slots.contains(&slot) {
            self.blocked_time_slots.push(slot);
        }
    }

    pub fn unblock_time_slot(&mut self, slot: &BlockedTimeSlot) {
        self.blocked_time_slots.retain(|s| s != slot);
    }

    pub fn apply_patch(&mut self, patch: SettingsPatch) {
        if let Some(hours) = patch.business_hours {
            self.business_hours = hours;
        }
        if let Some(days) = patch.advance_booking_days {
            self.advance_booking_days = days;
        }
        if let Some(minutes) = patch.slot_duration_minutes {
            self.slot_duration_minutes = minutes;
        }
        if let Some(buffer) = patch.buffer_minutes {
            self.buffer_minutes = buffer;
        }
        if let Some(cap) = patch.max_slots_per_day {
            self.max_slots_per_day = cap;
        }
        if let Some(tz) = patch.timezone {
            self.timezone = tz;
        }
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.slot_duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "slot_duration_minutes must be positive".to_string(),
            ));
        }
        if self.advance_booking_days < 0 {
            return Err(SchedulingError::Validation(
                "advance_booking_days must not be negative".to_string(),
            ));
        }
        if self.buffer_minutes < 0 {
            return Err(SchedulingError::Validation(
                "buffer_minutes must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update for the settings row. `max_slots_per_day` uses a nested
/// Option so the cap can be cleared explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub business_hours: Option<WeeklyHours>,
    pub advance_booking_days: Option<i64>,
    pub slot_duration_minutes: Option<i64>,
    pub buffer_minutes: Option<i64>,
    #[serde(default, with = "double_option")]
    pub max_slots_per_day: Option<Option<u32>>,
    pub timezone: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }
}

// ==============================================================================
// SLOTS AND APPOINTMENTS
// ==============================================================================

/// A bookable candidate interval. `end_time - start_time` always equals the
/// configured slot duration and never crosses a day boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub provider_id: Option<Uuid>,
    pub practice_id: Option<Uuid>,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    /// Only active appointments participate in conflict checks.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending
                | AppointmentStatus::Confirmed
                | AppointmentStatus::InProgress
        )
    }
}

/// Read-only view of an appointment owned by the practice-management system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingAppointment {
    pub id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    /// Some upstream records carry no end time; conflict checks then assume
    /// the configured slot duration.
    pub end_time: Option<DateTime<Utc>>,
    pub provider_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: AppointmentStatus,
}

impl ExistingAppointment {
    pub fn end_or(&self, fallback_duration: Duration) -> DateTime<Utc> {
        self.end_time
            .unwrap_or(self.start_time + fallback_duration)
    }
}

/// Identity dimension deciding whether two appointments conflict.
/// Precedence: provider, then resource, then patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictScope {
    pub provider_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

impl ConflictScope {
    /// Whether an existing appointment belongs to this scope. Provider wins
    /// when both sides specify one; resource is next; patient only applies
    /// when the scope names neither provider nor resource.
    pub fn matches(&self, appointment: &ExistingAppointment) -> bool {
        if let (Some(scope_provider), Some(appt_provider)) =
            (self.provider_id, appointment.provider_id)
        {
            return scope_provider == appt_provider;
        }
        if let (Some(scope_resource), Some(appt_resource)) =
            (self.resource_id, appointment.resource_id)
        {
            return scope_resource == appt_resource;
        }
        if self.provider_id.is_none() && self.resource_id.is_none() {
            if let (Some(scope_patient), Some(appt_patient)) =
                (self.patient_id, appointment.patient_id)
            {
                return scope_patient == appt_patient;
            }
        }
        false
    }

    /// Stable key used for overlay entries and cache invalidation.
    pub fn scope_key(&self) -> String {
        if let Some(provider_id) = self.provider_id {
            format!("provider:{}", provider_id)
        } else if let Some(resource_id) = self.resource_id {
            format!("resource:{}", resource_id)
        } else if let Some(patient_id) = self.patient_id {
            format!("patient:{}", patient_id)
        } else {
            "global".to_string()
        }
    }
}

/// Short-TTL record of a just-confirmed booking, bridging the window where
/// the practice-management system has not yet made the write visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedSlotOverlayEntry {
    pub scope_key: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BookedSlotOverlayEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub provider_id: Option<Uuid>,
    pub practice_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AvailabilityQuery {
    pub fn scope(&self) -> ConflictScope {
        ConflictScope {
            provider_id: self.provider_id,
            resource_id: self.resource_id,
            patient_id: self.patient_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityPage {
    pub slots: Vec<CandidateSlot>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub practice_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub patient_notes: Option<String>,
}

impl BookAppointmentRequest {
    pub fn scope(&self) -> ConflictScope {
        ConflictScope {
            provider_id: self.provider_id,
            resource_id: self.resource_id,
            patient_id: Some(self.patient_id),
        }
    }
}

/// Output of the forward-shift resolver. `was_adjusted` lets callers report
/// both the requested and the resolved interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub was_adjusted: bool,
    pub attempts: u32,
}

/// Booking result. When the requested interval was taken, the scheduled
/// interval is the nearest free forward shift and `was_adjusted` is set so
/// callers always see both the original and the adjusted time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub appointment_id: Uuid,
    pub requested_start_time: DateTime<Utc>,
    pub requested_end_time: DateTime<Utc>,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    pub was_adjusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub provider_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub patient_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub practice_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub original_start_time: DateTime<Utc>,
    pub original_end_time: DateTime<Utc>,
    pub new_start_time: DateTime<Utc>,
    pub new_end_time: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Reschedule is cancel-old-then-book-new and is not atomic. The outcome
/// makes a partial failure explicit instead of reporting overall success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleOutcome {
    /// Old slot cancelled, new slot booked.
    Rescheduled,
    /// New booking failed; the original interval was re-booked.
    RolledBack,
    /// New booking failed and the compensating re-book also failed; the
    /// patient currently holds no appointment.
    OriginalLost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub outcome: RescheduleOutcome,
    pub appointment: Option<BookingConfirmation>,
    pub original_start_time: DateTime<Utc>,
    pub original_end_time: DateTime<Utc>,
}

// ==============================================================================
// EXTERNAL DIRECTORY CALL MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentCall {
    pub patient_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub patient_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedAppointment {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External appointment query failed: {0}")]
    ExternalQuery(String),

    #[error("External appointment write failed: {0}")]
    ExternalWrite(String),

    #[error("No free slot found after {attempts} attempts")]
    NoSlotFound { attempts: u32 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment not found")]
    NotFound,
}
