use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
    body::Body,
};
use tracing::debug;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::jwt::validate_token;
use crate::state::AppState;

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

// Validates the bearer token and stores the caller in request extensions
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;

    let user = validate_token(token, &state.config.jwt_secret)?;
    debug!("Authenticated {} as {}", user.id, user.role);

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

pub fn require_role(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} is not permitted to perform this action",
            user.role
        )))
    }
}

pub fn require_admin(user: &User) -> Result<(), AppError> {
    require_role(user, &[Role::Admin])
}
