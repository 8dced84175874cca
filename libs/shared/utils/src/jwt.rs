use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{JwtClaims, JwtHeader, Role, User};
use shared_models::error::AppError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("JWT secret is not set")]
    MissingSecret,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(&'static str),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::MissingSecret => AppError::Internal(err.to_string()),
            TokenError::Expired => AppError::Auth("Token expired".to_string()),
            TokenError::Invalid(_) => AppError::Auth("Invalid token".to_string()),
        }
    }
}

fn mac_for(secret: &str) -> Result<HmacSha256, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::MissingSecret)
}

pub fn issue_token(
    user_id: Uuid,
    email: Option<&str>,
    role: Role,
    jwt_secret: &str,
    ttl: Duration,
) -> Result<String, TokenError> {
    issue_token_at(user_id, email, role, jwt_secret, ttl, Utc::now())
}

/// Signs an HS256 token whose `iat` is `now` and `exp` is `now + ttl`.
pub fn issue_token_at(
    user_id: Uuid,
    email: Option<&str>,
    role: Role,
    jwt_secret: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, TokenError> {
    let mut mac = mac_for(jwt_secret)?;

    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let claims = JwtClaims {
        sub: user_id.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        email: email.map(str::to_string),
        role,
    };

    let header_json = serde_json::to_vec(&header).map_err(|_| TokenError::Invalid("unencodable header"))?;
    let claims_json = serde_json::to_vec(&claims).map_err(|_| TokenError::Invalid("unencodable claims"))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, TokenError> {
    validate_token_at(token, jwt_secret, Utc::now())
}

pub fn validate_token_at(token: &str, jwt_secret: &str, now: DateTime<Utc>) -> Result<User, TokenError> {
    let mut mac = mac_for(jwt_secret)?;

    // Split token into parts
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Invalid("malformed token"));
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];
    let signature_b64 = parts[2];

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        debug!("Failed to decode signature: {}", e);
        TokenError::Invalid("signature encoding")
    })?;

    mac.update(format!("{}.{}", header_b64, claims_b64).as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err(TokenError::Invalid("signature mismatch"));
    }

    let header: JwtHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(TokenError::Invalid("header encoding"))?;

    if header.alg != "HS256" {
        return Err(TokenError::Invalid("unsupported algorithm"));
    }

    let claims: JwtClaims = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(TokenError::Invalid("claims encoding"))?;

    if claims.exp < now.timestamp() {
        debug!("Token expired at {} (now: {})", claims.exp, now.timestamp());
        return Err(TokenError::Expired);
    }

    let id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid("subject is not a uuid"))?;

    let user = User {
        id,
        email: claims.email,
        role: claims.role,
        created_at: Utc.timestamp_opt(claims.iat, 0).single(),
    };

    debug!("Token validated successfully for user: {}", user.id);
    Ok(user)
}
