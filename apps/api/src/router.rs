use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use calendar_cell::router::calendar_routes;
use doctor_cell::router::doctor_routes;
use shared_utils::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "MediBook API is running!" }))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/calendar", calendar_routes(state))
}
