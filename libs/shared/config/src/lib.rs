use std::env;
use std::str::FromStr;
use tracing::warn;

// Durations are built from these at request time; keep them well inside chrono's range.
const MAX_HOURS: i64 = 24 * 366;
const MAX_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub slot_hold_minutes: i64,
    pub sweep_interval_seconds: u64,
    pub cancellation_cutoff_hours: i64,
    pub otp_ttl_minutes: i64,
    pub default_phone_region: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            jwt_expiry_hours: bounded("JWT_EXPIRY_HOURS", parsed_or("JWT_EXPIRY_HOURS", 24), 1, MAX_HOURS),
            slot_hold_minutes: bounded("SLOT_HOLD_MINUTES", parsed_or("SLOT_HOLD_MINUTES", 10), 1, MAX_MINUTES),
            sweep_interval_seconds: bounded("SLOT_SWEEP_INTERVAL_SECONDS", parsed_or("SLOT_SWEEP_INTERVAL_SECONDS", 60), 1, 86_400),
            cancellation_cutoff_hours: bounded("CANCELLATION_CUTOFF_HOURS", parsed_or("CANCELLATION_CUTOFF_HOURS", 24), 0, MAX_HOURS),
            otp_ttl_minutes: bounded("OTP_TTL_MINUTES", parsed_or("OTP_TTL_MINUTES", 5), 1, MAX_MINUTES),
            default_phone_region: env::var("DEFAULT_PHONE_REGION")
                .unwrap_or_else(|_| "IN".to_string()),
            port: parsed_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_service_key.is_empty()
            && !self.jwt_secret.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            jwt_secret: String::new(),
            jwt_expiry_hours: 24,
            slot_hold_minutes: 10,
            sweep_interval_seconds: 60,
            cancellation_cutoff_hours: 24,
            otp_ttl_minutes: 5,
            default_phone_region: "IN".to_string(),
            port: 3000,
        }
    }
}

fn parsed_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparseable value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn bounded<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < min || value > max {
        let clamped = if value < min { min } else { max };
        warn!("{} value {} is out of range {}..={}, using {}", name, value, min, max, clamped);
        clamped
    } else {
        value
    }
}
