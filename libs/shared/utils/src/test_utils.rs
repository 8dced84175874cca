use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};

use crate::jwt::issue_token_at;
use crate::state::AppState;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_database(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            jwt_secret: self.jwt_secret.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_state(&self) -> AppState {
        AppState::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::new("test@example.com", Role::User)
    }
}

impl TestUser {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, Role::Doctor)
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, Role::User)
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, Role::Admin)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: Some(self.email.clone()),
            role: self.role,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let ttl = Duration::hours(exp_hours.unwrap_or(24));
        issue_token_at(user.id, Some(&user.email), user.role, secret, ttl, Utc::now())
            .expect("test token")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        let issued = Utc::now() - Duration::hours(2);
        issue_token_at(user.id, Some(&user.email), user.role, secret, Duration::hours(1), issued)
            .expect("test token")
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// PostgREST row fixtures.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn user_row(id: Uuid, email: &str, role: Role, password_hash: &str) -> Value {
        json!({
            "id": id,
            "name": "Test User",
            "email": email,
            "phone": null,
            "phone_verified": false,
            "password_hash": password_hash,
            "role": role,
            "two_factor_enabled": false,
            "created_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn doctor_row(id: Uuid, user_id: Option<Uuid>, mode: &str, is_verified: bool) -> Value {
        json!({
            "id": id,
            "name": "Dr. Asha Rao",
            "specialization": "Cardiology",
            "mode": mode,
            "experience_years": 12,
            "consultation_fee": 800.0,
            "languages": ["English", "Hindi"],
            "is_verified": is_verified,
            "user_id": user_id,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn slot_row(
        id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        is_booked: bool,
        locked_until: Option<DateTime<Utc>>,
        locked_by: Option<Uuid>,
    ) -> Value {
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "start_time": start_time,
            "end_time": start_time + Duration::minutes(30),
            "is_booked": is_booked,
            "locked_until": locked_until,
            "locked_by": locked_by
        })
    }

    pub fn appointment_row(id: Uuid, user_id: Uuid, doctor_id: Uuid, slot_id: Uuid, status: &str) -> Value {
        json!({
            "id": id,
            "user_id": user_id,
            "doctor_id": doctor_id,
            "slot_id": slot_id,
            "status": status,
            "type": "online",
            "cancellation_reason": null,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn calendar_event_row(id: Uuid, user_id: Uuid, kind: &str, event_time: DateTime<Utc>) -> Value {
        json!({
            "id": id,
            "user_id": user_id,
            "kind": kind,
            "title": "Blood pressure",
            "event_time": event_time,
            "details": { "systolic": 120, "diastolic": 80 },
            "created_at": "2026-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
