use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::auth::Role;
use shared_models::error::AppError;
use shared_utils::jwt::TokenError;

// ==============================================================================
// STORED RECORDS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub phone_verified: bool,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub two_factor_enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// What a user may see about their own account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub role: Role,
    pub two_factor_enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&UserRecord> for UserProfile {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            phone: record.phone.clone(),
            phone_verified: record.phone_verified,
            role: record.role,
            two_factor_enabled: record.two_factor_enabled,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    PhoneVerification,
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpPurpose::Login => write!(f, "login"),
            OtpPurpose::PhoneVerification => write!(f, "phone_verification"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    pub destination: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: i32,
    #[serde(default)]
    pub consumed: bool,
}

// ==============================================================================
// REQUEST / RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwoFactorVerifyRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneOtpRequest {
    /// Number to verify; defaults to the phone already on the account.
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhoneVerifyRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpChallenge {
    pub challenge_id: Uuid,
    pub destination: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginOutcome {
    Authenticated(AuthResponse),
    TwoFactorRequired {
        two_factor_required: bool,
        #[serde(flatten)]
        challenge: OtpChallenge,
    },
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Admin accounts cannot be self-registered")]
    AdminRegistration,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("No phone number on this account")]
    NoPhone,

    #[error("Verification code not found")]
    OtpNotFound,

    #[error("Verification code expired")]
    OtpExpired,

    #[error("Invalid verification code")]
    OtpInvalid,

    #[error("Too many attempts for this verification code")]
    TooManyAttempts,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Code delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::OtpExpired
            | AuthError::OtpInvalid => AppError::Auth(err.to_string()),

            AuthError::EmailTaken => AppError::Conflict(err.to_string()),
            AuthError::AdminRegistration | AuthError::TooManyAttempts => AppError::Forbidden(err.to_string()),
            AuthError::UserNotFound | AuthError::OtpNotFound => AppError::NotFound(err.to_string()),
            AuthError::InvalidPhone | AuthError::ValidationError(_) => AppError::ValidationError(err.to_string()),
            AuthError::NoPhone => AppError::BadRequest(err.to_string()),
            AuthError::PasswordHash(_) => AppError::Internal(err.to_string()),
            AuthError::Delivery(_) => AppError::ExternalService(err.to_string()),
            AuthError::Token(e) => e.into(),
            AuthError::Database(DbError::Conflict(msg)) => AppError::Conflict(msg),
            AuthError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profile_hides_password_hash() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "Meera",
            "email": "meera@example.com",
            "phone": null,
            "password_hash": "$argon2id$v=19$secret",
            "role": "user",
            "created_at": null
        })).unwrap();

        let profile = serde_json::to_value(UserProfile::from(&record)).unwrap();
        assert!(profile.get("password_hash").is_none());
        assert_eq!(profile["phone_verified"], false);
    }

    #[test]
    fn two_factor_outcome_carries_flag_and_challenge() {
        let outcome = LoginOutcome::TwoFactorRequired {
            two_factor_required: true,
            challenge: OtpChallenge {
                challenge_id: Uuid::nil(),
                destination: "******3210".to_string(),
                expires_at: Utc::now(),
            },
        };

        let body = serde_json::to_value(outcome).unwrap();
        assert_eq!(body["two_factor_required"], true);
        assert_eq!(body["destination"], "******3210");
        assert!(body.get("access_token").is_none());
    }

    #[test]
    fn expired_token_keeps_its_message() {
        let app: AppError = AuthError::Token(TokenError::Expired).into();
        assert_eq!(app.message(), "Token expired");
    }
}
