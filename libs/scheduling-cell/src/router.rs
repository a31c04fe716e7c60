// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::handlers;
use crate::services::booking::SchedulingState;

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    Router::new()
        // Availability and booking
        .route("/availability", get(handlers::get_availability))
        .route("/appointments", post(handlers::book_appointment))
        .route(
            "/appointments/{appointment_id}/reschedule",
            patch(handlers::reschedule_appointment),
        )
        .route(
            "/appointments/{appointment_id}/cancel",
            post(handlers::cancel_appointment),
        )
        // Admin settings and blackout management
        .route("/admin/settings", get(handlers::get_settings))
        .route("/admin/settings", patch(handlers::update_settings))
        .route("/admin/settings/blocked-dates", post(handlers::block_date))
        .route(
            "/admin/settings/blocked-dates",
            delete(handlers::unblock_date),
        )
        .route(
            "/admin/settings/blocked-slots",
            post(handlers::block_time_slot),
        )
        .route(
            "/admin/settings/blocked-slots",
            delete(handlers::unblock_time_slot),
        )
        // Monitoring
        .route("/health", get(handlers::health))
        .with_state(state)
}
