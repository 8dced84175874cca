use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_utils::AppState;
use shared_utils::otp::{generate_otp, hash_otp, is_otp_expired_at, mask_destination, verify_otp_hash, OTP_MAX_ATTEMPTS};

use crate::models::{AuthError, OtpChallenge, OtpPurpose, OtpRecord};

/// Sends a freshly generated code to its destination.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, destination: &str, code: &str, purpose: OtpPurpose) -> Result<(), AuthError>;
}

/// Records the dispatch in the log without the code itself.
pub struct LogDelivery;

#[async_trait]
impl OtpDelivery for LogDelivery {
    async fn deliver(&self, destination: &str, _code: &str, purpose: OtpPurpose) -> Result<(), AuthError> {
        info!("Dispatching {} code to {}", purpose, mask_destination(destination));
        Ok(())
    }
}

pub struct OtpService {
    supabase: SupabaseClient,
    secret: String,
    ttl: Duration,
    delivery: Arc<dyn OtpDelivery>,
}

impl OtpService {
    pub fn new(state: &AppState, delivery: Arc<dyn OtpDelivery>) -> Self {
        Self {
            supabase: state.db.clone(),
            secret: state.config.jwt_secret.clone(),
            ttl: Duration::minutes(state.config.otp_ttl_minutes.max(1)),
            delivery,
        }
    }

    /// Stores a new code for `user_id`, retiring any older open code for the
    /// same purpose, and hands it to the delivery channel.
    #[instrument(skip(self, destination))]
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        destination: &str,
        now: DateTime<Utc>,
    ) -> Result<OtpChallenge, AuthError> {
        let code = generate_otp();
        let code_hash = hash_otp(&code, &self.secret)
            .ok_or_else(|| AuthError::ValidationError("OTP secret is not usable".to_string()))?;

        let _: Vec<OtpRecord> = self.supabase
            .update(
                "otps",
                &format!("user_id=eq.{}&purpose=eq.{}&consumed=eq.false", user_id, purpose),
                json!({ "consumed": true }),
            )
            .await?;

        let expires_at = now + self.ttl;
        let record: OtpRecord = self.supabase
            .insert(
                "otps",
                json!({
                    "user_id": user_id,
                    "purpose": purpose,
                    "destination": destination,
                    "code_hash": code_hash,
                    "expires_at": expires_at,
                    "attempts": 0,
                    "consumed": false
                }),
            )
            .await?;

        self.delivery.deliver(destination, &code, purpose).await?;

        debug!("Issued {} code {} for user {}", purpose, record.id, user_id);
        Ok(OtpChallenge {
            challenge_id: record.id,
            destination: mask_destination(destination),
            expires_at: record.expires_at,
        })
    }

    pub async fn find(&self, otp_id: Uuid, purpose: OtpPurpose) -> Result<OtpRecord, AuthError> {
        self.supabase
            .select_one("otps", &format!("id=eq.{}&purpose=eq.{}", otp_id, purpose))
            .await?
            .ok_or(AuthError::OtpNotFound)
    }

    /// The newest open code of `purpose` for `user_id`.
    pub async fn latest_open(&self, user_id: Uuid, purpose: OtpPurpose) -> Result<OtpRecord, AuthError> {
        self.supabase
            .select_one(
                "otps",
                &format!(
                    "user_id=eq.{}&purpose=eq.{}&consumed=eq.false&order=expires_at.desc",
                    user_id, purpose
                ),
            )
            .await?
            .ok_or(AuthError::OtpNotFound)
    }

    /// Checks `code` against `record` and consumes it on success. Every check
    /// burns one attempt, right or wrong.
    #[instrument(skip(self, record, code), fields(otp_id = %record.id))]
    pub async fn verify(&self, record: &OtpRecord, code: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if record.consumed {
            return Err(AuthError::OtpNotFound);
        }
        if is_otp_expired_at(record.expires_at, now) {
            return Err(AuthError::OtpExpired);
        }
        // The attempt is counted before the code is compared
        self.reserve_attempt(record).await?;

        if !verify_otp_hash(code.trim(), &self.secret, &record.code_hash) {
            warn!("Wrong code for otp {}", record.id);
            return Err(AuthError::OtpInvalid);
        }

        let consumed: Vec<OtpRecord> = self.supabase
            .update(
                "otps",
                &format!("id=eq.{}&consumed=eq.false", record.id),
                json!({ "consumed": true }),
            )
            .await?;

        // Someone else redeemed it between our read and write
        if consumed.is_empty() {
            return Err(AuthError::OtpNotFound);
        }

        Ok(())
    }

    /// Bumps the attempt counter of `record` by one. A lost compare-and-set
    /// means a concurrent guess moved the counter, so re-read and try again.
    async fn reserve_attempt(&self, record: &OtpRecord) -> Result<(), AuthError> {
        let mut seen = record.attempts;

        for _ in 0..=OTP_MAX_ATTEMPTS {
            if seen >= OTP_MAX_ATTEMPTS {
                return Err(AuthError::TooManyAttempts);
            }

            let rows: Vec<OtpRecord> = self.supabase
                .update(
                    "otps",
                    &format!("id=eq.{}&attempts=eq.{}", record.id, seen),
                    json!({ "attempts": seen + 1 }),
                )
                .await?;

            if let Some(reserved) = rows.first() {
                if reserved.consumed {
                    return Err(AuthError::OtpNotFound);
                }
                debug!("Otp {} attempt {} reserved", record.id, seen + 1);
                return Ok(());
            }

            let current: OtpRecord = self.supabase
                .select_one("otps", &format!("id=eq.{}", record.id))
                .await?
                .ok_or(AuthError::OtpNotFound)?;
            if current.consumed {
                return Err(AuthError::OtpNotFound);
            }
            seen = current.attempts;
        }

        Err(AuthError::TooManyAttempts)
    }
}
