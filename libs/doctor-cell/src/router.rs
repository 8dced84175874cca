use axum::{
    Router,
    routing::{get, post, put, patch, delete},
    middleware,
};

use shared_utils::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn doctor_routes(state: AppState) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/search", get(handlers::search_doctors))
        .route("/{doctor_id}", get(handlers::get_doctor))
        .route("/{doctor_id}/slots", get(handlers::list_doctor_slots));

    let protected_routes = Router::new()
        .route("/", post(handlers::create_doctor))
        .route("/register", post(handlers::register_doctor))
        .route("/{doctor_id}", put(handlers::update_doctor))
        .route("/{doctor_id}/verify", patch(handlers::verify_doctor))
        .route("/{doctor_id}/slots", post(handlers::publish_slots))
        .route("/{doctor_id}/slots/{slot_id}", delete(handlers::delete_slot))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
