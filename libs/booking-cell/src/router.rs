// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::admin_auth_middleware;

use crate::handlers;

pub fn booking_routes(state: Arc<AppConfig>) -> Router {
    // Patient-facing flow: availability lookup plus the pending-side
    // lifecycle (request, re-submit preferences, cancel).
    let public_routes = Router::new()
        .route("/availability", get(handlers::get_slot_availability))
        .route("/", post(handlers::create_appointment))
        .route("/{appointment_id}/modify", post(handlers::modify_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment));

    // Dashboard actions: confirmation is the authoritative transition and
    // stays behind the admin guard.
    let admin_routes = Router::new()
        .route("/search", get(handlers::search_appointments))
        .route("/capacity/check", get(handlers::check_capacity))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
