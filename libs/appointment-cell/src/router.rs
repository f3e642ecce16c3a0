// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/", get(handlers::search_appointments))
        .route("/slots", get(handlers::get_available_slots))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/accept", post(handlers::accept_appointment))
        .route("/{appointment_id}/reject", post(handlers::reject_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/queue/{doctor_id}", get(handlers::get_queue_info))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
