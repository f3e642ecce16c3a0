use std::sync::Arc;

use axum::{routing::post, Router};

use shared_config::AppConfig;

use crate::handlers;

pub fn auth_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/signup", post(handlers::signup))
        .route("/verify-otp", post(handlers::verify_otp))
        .route("/resend-otp", post(handlers::resend_otp))
        .route("/login", post(handlers::login))
        .route("/validate", post(handlers::validate))
        .with_state(state)
}
