// libs/scheduling-cell/src/services/directory.rs
//
// Collaborator interface to the practice-management system of record.
// Reads get a bounded retry for transient failures; writes are never retried
// because a retried create can double-book.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_practice::PracticeClient;

use crate::models::{
    ConflictScope, CreateAppointmentCall, CreatedAppointment, ExistingAppointment,
    SchedulingError,
};

#[async_trait]
pub trait AppointmentDirectory: Send + Sync {
    /// Existing appointments for a scope within `[from, to)`. Writes made
    /// upstream are not guaranteed to be visible here immediately.
    async fn appointments_in_range(
        &self,
        scope: &ConflictScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExistingAppointment>, SchedulingError>;

    async fn create_appointment(
        &self,
        call: &CreateAppointmentCall,
    ) -> Result<CreatedAppointment, SchedulingError>;

    async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<(), SchedulingError>;
}

pub struct PracticeDirectory {
    client: Arc<PracticeClient>,
    max_read_retries: u32,
}

impl PracticeDirectory {
    pub fn new(client: Arc<PracticeClient>) -> Self {
        Self {
            client,
            max_read_retries: 2,
        }
    }

    fn range_path(scope: &ConflictScope, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        let mut query_parts = vec![
            format!("from={}", from.to_rfc3339()),
            format!("to={}", to.to_rfc3339()),
        ];

        if let Some(provider_id) = scope.provider_id {
            query_parts.push(format!("provider_id={}", provider_id));
        }
        if let Some(resource_id) = scope.resource_id {
            query_parts.push(format!("resource_id={}", resource_id));
        }
        if let Some(patient_id) = scope.patient_id {
            query_parts.push(format!("patient_id={}", patient_id));
        }

        format!("/api/v1/appointments?{}", query_parts.join("&"))
    }
}

#[async_trait]
impl AppointmentDirectory for PracticeDirectory {
    async fn appointments_in_range(
        &self,
        scope: &ConflictScope,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExistingAppointment>, SchedulingError> {
        let path = Self::range_path(scope, from, to);
        let mut last_error = String::new();

        for attempt in 0..=self.max_read_retries {
            match self
                .client
                .request::<Vec<ExistingAppointment>>(Method::GET, &path, None)
                .await
            {
                Ok(appointments) => {
                    debug!(
                        "Fetched {} appointments for scope {}",
                        appointments.len(),
                        scope.scope_key()
                    );
                    return Ok(appointments);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_read_retries {
                        warn!(
                            "Appointment query failed (attempt {}/{}), retrying: {}",
                            attempt + 1,
                            self.max_read_retries + 1,
                            last_error
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(
                            200 * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(SchedulingError::ExternalQuery(last_error))
    }

    async fn create_appointment(
        &self,
        call: &CreateAppointmentCall,
    ) -> Result<CreatedAppointment, SchedulingError> {
        let body = json!({
            "patient_id": call.patient_id,
            "provider_id": call.provider_id,
            "resource_id": call.resource_id,
            "start_time": call.start_time.to_rfc3339(),
            "end_time": call.end_time.to_rfc3339(),
            "patient_notes": call.patient_notes,
            "status": "confirmed",
        });

        self.client
            .request::<CreatedAppointment>(Method::POST, "/api/v1/appointments", Some(body))
            .await
            .map_err(|e| SchedulingError::ExternalWrite(e.to_string()))
    }

    async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<(), SchedulingError> {
        let path = format!("/api/v1/appointments/{}", appointment_id);
        let body = json!({ "status": "cancelled" });

        let _: Value = self
            .client
            .request(Method::PATCH, &path, Some(body))
            .await
            .map_err(|e| SchedulingError::ExternalWrite(e.to_string()))?;

        Ok(())
    }
}
