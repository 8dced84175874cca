use axum::{
    Router,
    routing::{get, put},
    middleware,
};

use shared_utils::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn calendar_routes(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/", get(handlers::list_events).post(handlers::create_event))
        .route("/{event_id}", put(handlers::update_event).delete(handlers::delete_event))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
