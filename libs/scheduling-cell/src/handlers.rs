// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AvailabilityQuery, BlockedTimeSlot, BookAppointmentRequest, CancelAppointmentRequest,
    RescheduleAppointmentRequest, RescheduleOutcome, SchedulingError, SettingsPatch,
};
use crate::services::booking::SchedulingState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQueryParams {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub provider_id: Option<Uuid>,
    pub practice_id: Option<Uuid>,
    pub resource_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BlockedDateBody {
    pub date: NaiveDate,
}

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::Validation(msg) => AppError::BadRequest(msg),
        SchedulingError::NoSlotFound { attempts } => AppError::Conflict(format!(
            "No free slot found near the requested time ({} alternatives tried)",
            attempts
        )),
        SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        SchedulingError::ExternalQuery(msg) | SchedulingError::ExternalWrite(msg) => {
            AppError::ExternalService(msg)
        }
        SchedulingError::Configuration(msg) => AppError::Internal(msg),
        SchedulingError::Cache(msg) => AppError::Internal(msg),
    }
}

// ==============================================================================
// AVAILABILITY AND BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<SchedulingState>>,
    Query(params): Query<AvailabilityQueryParams>,
) -> Result<Json<Value>, AppError> {
    let query = AvailabilityQuery {
        from_date: params.from_date,
        to_date: params.to_date,
        provider_id: params.provider_id,
        practice_id: params.practice_id,
        resource_id: params.resource_id,
        patient_id: params.patient_id,
        limit: params.limit,
        offset: params.offset,
    };

    let page = state
        .service
        .get_availability(query)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "availability": page
    })))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<SchedulingState>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let confirmation = state
        .service
        .book_appointment(request)
        .await
        .map_err(|e| match e {
            SchedulingError::NoSlotFound { .. } => AppError::Conflict(
                "Requested time and nearby alternatives are all taken".to_string(),
            ),
            SchedulingError::ExternalQuery(msg) => AppError::ExternalService(format!(
                "Could not verify existing bookings, not booking blind: {}",
                msg
            )),
            other => map_scheduling_error(other),
        })?;

    let message = if confirmation.was_adjusted {
        "Requested time was taken; appointment booked at the nearest free slot"
    } else {
        "Appointment booked successfully"
    };

    Ok(Json(json!({
        "success": true,
        "appointment": confirmation,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<SchedulingState>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let response = state
        .service
        .reschedule_appointment(appointment_id, request)
        .await
        .map_err(map_scheduling_error)?;

    // A lost original slot is a degraded partial outcome, never a success.
    if response.outcome == RescheduleOutcome::OriginalLost {
        return Err(AppError::ExternalService(format!(
            "Reschedule failed after cancellation and the original slot ({} - {}) could not be restored",
            response.original_start_time, response.original_end_time
        )));
    }

    Ok(Json(json!({
        "success": true,
        "reschedule": response
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<SchedulingState>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .service
        .cancel_appointment(appointment_id, request)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled"
    })))
}

// ==============================================================================
// ADMIN SETTINGS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_settings(
    State(state): State<Arc<SchedulingState>>,
) -> Result<Json<Value>, AppError> {
    let settings = state.service.settings_store().get_settings().await;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

#[axum::debug_handler]
pub async fn update_settings(
    State(state): State<Arc<SchedulingState>>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .service
        .settings_store()
        .update_settings(patch)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

#[axum::debug_handler]
pub async fn block_date(
    State(state): State<Arc<SchedulingState>>,
    Json(body): Json<BlockedDateBody>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .service
        .settings_store()
        .block_date(body.date)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

#[axum::debug_handler]
pub async fn unblock_date(
    State(state): State<Arc<SchedulingState>>,
    Json(body): Json<BlockedDateBody>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .service
        .settings_store()
        .unblock_date(body.date)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

#[axum::debug_handler]
pub async fn block_time_slot(
    State(state): State<Arc<SchedulingState>>,
    Json(slot): Json<BlockedTimeSlot>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .service
        .settings_store()
        .block_time_slot(slot)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

#[axum::debug_handler]
pub async fn unblock_time_slot(
    State(state): State<Arc<SchedulingState>>,
    Json(slot): Json<BlockedTimeSlot>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .service
        .settings_store()
        .unblock_time_slot(&slot)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "settings": settings
    })))
}

// ==============================================================================
// HEALTH
// ==============================================================================

#[axum::debug_handler]
pub async fn health(State(state): State<Arc<SchedulingState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "configured": state.config.is_configured(),
        "cache_configured": state.config.is_cache_configured(),
    }))
}
