use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, StatusCode},
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::AppState;
use shared_utils::extractor::extract_bearer_token;
use shared_utils::jwt::validate_token as decode_token;

use crate::models::{
    AuthResponse, LoginOutcome, LoginRequest, PhoneOtpRequest, PhoneVerifyRequest,
    RegisterRequest, TwoFactorVerifyRequest, UserProfile,
};
use crate::services::AccountService;

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let response = AccountService::new(&state).register(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginOutcome>, AppError> {
    let outcome = AccountService::new(&state).login(request, Utc::now()).await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    Json(request): Json<TwoFactorVerifyRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let response = AccountService::new(&state).verify_two_factor(request, Utc::now()).await?;
    Ok(Json(response))
}

pub async fn validate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;
    let user = decode_token(token, &state.config.jwt_secret)?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

/// Never fails: a missing or bad token is reported as `valid: false`.
pub async fn verify_token(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Json<Value> {
    debug!("Verifying token");

    let valid = auth
        .map(|TypedHeader(auth)| decode_token(auth.token(), &state.config.jwt_secret).is_ok())
        .unwrap_or(false);

    Json(json!({ "valid": valid }))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<UserProfile>, AppError> {
    debug!("Getting profile for user: {}", user.id);

    let profile = AccountService::new(&state).profile(&user).await?;
    Ok(Json(profile))
}

#[axum::debug_handler]
pub async fn request_phone_otp(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<PhoneOtpRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let challenge = AccountService::new(&state)
        .request_phone_otp(&user, request.phone, Utc::now())
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({
        "sent": true,
        "destination": challenge.destination,
        "expires_at": challenge.expires_at
    }))))
}

#[axum::debug_handler]
pub async fn verify_phone_otp(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<PhoneVerifyRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let profile = AccountService::new(&state)
        .verify_phone_otp(&user, &request.code, Utc::now())
        .await?;

    Ok(Json(profile))
}
