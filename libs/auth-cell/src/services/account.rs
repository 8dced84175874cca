use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{DbError, SupabaseClient};
use shared_database::supabase::pg_value;
use shared_models::auth::{Role, User};
use shared_utils::AppState;
use shared_utils::jwt::issue_token_at;
use shared_utils::phone::validate_phone;

use crate::models::{
    AuthError, AuthResponse, LoginOutcome, LoginRequest, OtpChallenge, OtpPurpose, RegisterRequest,
    TwoFactorVerifyRequest, UserProfile, UserRecord,
};
use crate::services::otp::{LogDelivery, OtpDelivery, OtpService};
use crate::services::password::{hash_password, validate_password, verify_password};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"));

pub struct AccountService {
    supabase: SupabaseClient,
    jwt_secret: String,
    token_ttl: Duration,
    default_region: String,
    otp: OtpService,
}

impl AccountService {
    pub fn new(state: &AppState) -> Self {
        Self::with_delivery(state, Arc::new(LogDelivery))
    }

    pub fn with_delivery(state: &AppState, delivery: Arc<dyn OtpDelivery>) -> Self {
        Self {
            supabase: state.db.clone(),
            jwt_secret: state.config.jwt_secret.clone(),
            token_ttl: Duration::hours(state.config.jwt_expiry_hours.max(1)),
            default_region: state.config.default_phone_region.clone(),
            otp: OtpService::new(state, delivery),
        }
    }

    fn normalize_email(email: &str) -> Result<String, AuthError> {
        let email = email.trim().to_lowercase();
        if !EMAIL.is_match(&email) {
            return Err(AuthError::ValidationError("Invalid email address".to_string()));
        }
        Ok(email)
    }

    fn format_phone(&self, phone: &str) -> Result<String, AuthError> {
        validate_phone(phone, &self.default_region)
            .formatted
            .ok_or(AuthError::InvalidPhone)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.supabase
            .select_one("users", &format!("email=eq.{}", pg_value(email)))
            .await?)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<UserRecord, AuthError> {
        self.supabase
            .select_one("users", &format!("id=eq.{}", user_id))
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    fn authenticate(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<AuthResponse, AuthError> {
        let access_token = issue_token_at(
            user.id,
            Some(&user.email),
            user.role,
            &self.jwt_secret,
            self.token_ttl,
            now,
        )?;

        Ok(AuthResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.token_ttl.num_seconds(),
            user: UserProfile::from(user),
        })
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest, now: DateTime<Utc>) -> Result<AuthResponse, AuthError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::ValidationError("Name is required".to_string()));
        }
        let email = Self::normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let role = request.role.unwrap_or(Role::User);
        if role == Role::Admin {
            warn!("Rejected self-registration with admin role");
            return Err(AuthError::AdminRegistration);
        }

        let phone = request.phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| self.format_phone(p))
            .transpose()?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password(&request.password)?;

        let inserted = self.supabase
            .insert::<UserRecord>(
                "users",
                json!({
                    "name": name,
                    "email": email,
                    "phone": phone,
                    "phone_verified": false,
                    "password_hash": password_hash,
                    "role": role,
                    "two_factor_enabled": false,
                    "created_at": now
                }),
            )
            .await;

        // The unique index catches a registration racing ours
        let user = match inserted {
            Ok(user) => user,
            Err(DbError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        };

        info!("Registered user {} with role {}", user.id, user.role);
        self.authenticate(&user, now)
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest, now: DateTime<Utc>) -> Result<LoginOutcome, AuthError> {
        let email = request.email.trim().to_lowercase();

        let Some(user) = self.find_by_email(&email).await? else {
            debug!("Login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(&request.password, &user.password_hash)? {
            warn!("Wrong password for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        if user.two_factor_enabled {
            let destination = match (&user.phone, user.phone_verified) {
                (Some(phone), true) => phone.as_str(),
                _ => user.email.as_str(),
            };
            let challenge = self.otp.issue(user.id, OtpPurpose::Login, destination, now).await?;

            info!("Two-factor challenge {} issued for user {}", challenge.challenge_id, user.id);
            return Ok(LoginOutcome::TwoFactorRequired {
                two_factor_required: true,
                challenge,
            });
        }

        info!("User {} logged in", user.id);
        Ok(LoginOutcome::Authenticated(self.authenticate(&user, now)?))
    }

    #[instrument(skip(self, request), fields(challenge_id = %request.challenge_id))]
    pub async fn verify_two_factor(&self, request: TwoFactorVerifyRequest, now: DateTime<Utc>) -> Result<AuthResponse, AuthError> {
        let record = self.otp.find(request.challenge_id, OtpPurpose::Login).await?;
        self.otp.verify(&record, &request.code, now).await?;

        let user = self.get_user(record.user_id).await?;
        info!("User {} passed two-factor login", user.id);
        self.authenticate(&user, now)
    }

    pub async fn profile(&self, user: &User) -> Result<UserProfile, AuthError> {
        Ok(UserProfile::from(&self.get_user(user.id).await?))
    }

    /// Sends a code to `phone`, or to the number already on the account.
    #[instrument(skip(self, user, phone), fields(user_id = %user.id))]
    pub async fn request_phone_otp(
        &self,
        user: &User,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<OtpChallenge, AuthError> {
        let destination = match phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(number) => self.format_phone(number)?,
            None => {
                let record = self.get_user(user.id).await?;
                let stored = record.phone.ok_or(AuthError::NoPhone)?;
                self.format_phone(&stored)?
            }
        };

        self.otp.issue(user.id, OtpPurpose::PhoneVerification, &destination, now).await
    }

    /// Redeems the newest phone code and marks its number verified on the account.
    #[instrument(skip(self, user, code), fields(user_id = %user.id))]
    pub async fn verify_phone_otp(&self, user: &User, code: &str, now: DateTime<Utc>) -> Result<UserProfile, AuthError> {
        let record = self.otp.latest_open(user.id, OtpPurpose::PhoneVerification).await?;
        self.otp.verify(&record, code, now).await?;

        let mut rows: Vec<UserRecord> = self.supabase
            .update(
                "users",
                &format!("id=eq.{}", user.id),
                json!({
                    "phone": record.destination,
                    "phone_verified": true
                }),
            )
            .await?;

        if rows.is_empty() {
            return Err(AuthError::UserNotFound);
        }

        info!("Phone verified for user {}", user.id);
        Ok(UserProfile::from(&rows.swap_remove(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(AccountService::normalize_email("  Meera@Example.COM ").unwrap(), "meera@example.com");
        assert_matches!(AccountService::normalize_email("meera"), Err(AuthError::ValidationError(_)));
        assert_matches!(AccountService::normalize_email("a@b"), Err(AuthError::ValidationError(_)));
    }
}
