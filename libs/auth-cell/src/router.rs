use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_utils::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn auth_routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/2fa/verify", post(handlers::verify_two_factor))
        .route("/validate", post(handlers::validate_token))
        .route("/verify", post(handlers::verify_token));

    let protected_routes = Router::new()
        .route("/me", get(handlers::get_profile))
        .route("/phone/otp", post(handlers::request_phone_otp))
        .route("/phone/verify", post(handlers::verify_phone_otp))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
