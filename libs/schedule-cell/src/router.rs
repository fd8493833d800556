// libs/schedule-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::admin_auth_middleware;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    // Slot generation is public - the booking form reads it directly.
    let public_routes = Router::new().route("/slots", get(handlers::get_slots));

    // Calendar maintenance is restricted to administrators.
    let admin_routes = Router::new()
        .route("/", get(handlers::list_schedule_entries))
        .route("/", post(handlers::create_schedule_entry))
        .route("/{schedule_id}", patch(handlers::update_schedule_entry))
        .route("/{schedule_id}", delete(handlers::delete_schedule_entry))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
