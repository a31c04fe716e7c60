use std::sync::Arc;

use axum::Router;

use scheduling_cell::services::booking::SchedulingState;

pub fn create_router(state: Arc<SchedulingState>) -> Router {
    Router::new().nest("/api/v1/scheduling", scheduling_cell::scheduling_routes(state))
}
