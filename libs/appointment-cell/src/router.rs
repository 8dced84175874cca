use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_utils::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: AppState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/holds/{slot_id}", post(handlers::hold_slot).delete(handlers::release_hold))
        .route("/", post(handlers::book_appointment).get(handlers::list_my_appointments))
        .route("/doctor", get(handlers::list_doctor_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
