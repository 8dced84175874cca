use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const OTP_DIGITS: u32 = 6;
pub const OTP_MAX_ATTEMPTS: i32 = 5;

pub fn generate_otp() -> String {
    let upper = 10u32.pow(OTP_DIGITS);
    let code = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", code, width = OTP_DIGITS as usize)
}

/// True iff the current time is strictly after `expires_at`.
pub fn is_otp_expired(expires_at: DateTime<Utc>) -> bool {
    is_otp_expired_at(expires_at, Utc::now())
}

pub fn is_otp_expired_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expires_at
}

/// Codes are stored keyed under the server secret, never in clear.
pub fn hash_otp(code: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(code.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

pub fn verify_otp_hash(code: &str, secret: &str, expected_hash: &str) -> bool {
    let Ok(expected) = URL_SAFE_NO_PAD.decode(expected_hash) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(code.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Keeps the last four characters of a phone number or the domain of an email.
pub fn mask_destination(destination: &str) -> String {
    if let Some((local, domain)) = destination.split_once('@') {
        let first = local.chars().next().unwrap_or('*');
        return format!("{}***@{}", first, domain);
    }

    let chars: Vec<char> = destination.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
