use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, HeaderValue, StatusCode},
};
use axum_extra::TypedHeader;
use chrono::{Duration, Utc};
use headers::Authorization;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_cell::handlers::*;
use auth_cell::models::*;
use auth_cell::services::password::hash_password;
use auth_cell::services::{AccountService, OtpDelivery};
use shared_models::auth::Role;
use shared_models::error::AppError;
use shared_utils::jwt::validate_token as decode_token;
use shared_utils::otp::hash_otp;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};
use shared_utils::AppState;

const PASSWORD: &str = "s3cret-pass";

fn create_auth_header(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

async fn state_for(server: &MockServer) -> AppState {
    TestConfig::with_database(&server.uri()).to_state()
}

fn register_request(email: &str, role: Option<Role>) -> RegisterRequest {
    RegisterRequest {
        name: "Meera Iyer".to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        phone: Some("98765 43210".to_string()),
        role,
    }
}

fn otp_row(id: Uuid, user_id: Uuid, purpose: &str, code: &str, attempts: i32) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": user_id,
        "purpose": purpose,
        "destination": "+919876543210",
        "code_hash": hash_otp(code, &TestConfig::default().jwt_secret).unwrap(),
        "expires_at": Utc::now() + Duration::minutes(5),
        "attempts": attempts,
        "consumed": false
    })
}

/// Keeps every dispatched code so tests can read it back.
#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OtpDelivery for RecordingDelivery {
    async fn deliver(&self, destination: &str, code: &str, _purpose: OtpPurpose) -> Result<(), AuthError> {
        self.sent.lock().unwrap().push((destination.to_string(), code.to_string()));
        Ok(())
    }
}

// ==============================================================================
// TOKEN ENDPOINTS
// ==============================================================================

#[tokio::test]
async fn validate_token_reports_claims() {
    let state = TestConfig::default().to_state();
    let user = TestUser::doctor("doc@example.com");
    let token = JwtTestUtils::create_test_token(&user, &state.config.jwt_secret, Some(24));

    let Json(response) = validate_token(State(state), create_auth_header(&token)).await.unwrap();

    assert!(response.valid);
    assert_eq!(response.user_id, user.id);
    assert_eq!(response.email, Some(user.email));
    assert_eq!(response.role, Role::Doctor);
}

#[tokio::test]
async fn validate_token_missing_header() {
    let state = TestConfig::default().to_state();

    let result = validate_token(State(state), HeaderMap::new()).await;

    match result {
        Err(AppError::Auth(msg)) => assert_eq!(msg, "Missing authorization header"),
        other => panic!("Expected Auth error, got {:?}", other.map(|r| r.0)),
    }
}

#[tokio::test]
async fn validate_token_distinguishes_expiry() {
    let state = TestConfig::default().to_state();
    let user = TestUser::default();

    let expired = JwtTestUtils::create_expired_token(&user, &state.config.jwt_secret);
    let result = validate_token(State(state.clone()), create_auth_header(&expired)).await;
    assert_matches!(result, Err(AppError::Auth(ref msg)) if msg == "Token expired");

    let forged = JwtTestUtils::create_invalid_signature_token(&user);
    let result = validate_token(State(state), create_auth_header(&forged)).await;
    assert_matches!(result, Err(AppError::Auth(ref msg)) if msg == "Invalid token");
}

#[tokio::test]
async fn verify_token_never_errors() {
    let state = TestConfig::default().to_state();
    let user = TestUser::default();
    let token = JwtTestUtils::create_test_token(&user, &state.config.jwt_secret, Some(1));

    let bearer = Authorization::bearer(&token).unwrap();
    let Json(body) = verify_token(State(state.clone()), Some(TypedHeader(bearer))).await;
    assert_eq!(body["valid"], true);

    let bearer = Authorization::bearer(&JwtTestUtils::create_malformed_token()).unwrap();
    let Json(body) = verify_token(State(state.clone()), Some(TypedHeader(bearer))).await;
    assert_eq!(body["valid"], false);

    let Json(body) = verify_token(State(state), None).await;
    assert_eq!(body["valid"], false);
}

// ==============================================================================
// REGISTRATION
// ==============================================================================

#[tokio::test]
async fn register_returns_token_with_requested_role() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("email", "eq.new.doc@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let mut row = MockSupabaseResponses::user_row(user_id, "new.doc@example.com", Role::Doctor, "$argon2id$stored");
    row["phone"] = json!("+919876543210");

    Mock::given(method("POST"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row])))
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server).await;
    let (status, Json(response)) = register(
        State(state.clone()),
        Json(register_request("New.Doc@Example.com", Some(Role::Doctor))),
    ).await.unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(response.user.id, user_id);
    assert_eq!(response.user.phone.as_deref(), Some("+919876543210"));

    let decoded = decode_token(&response.access_token, &state.config.jwt_secret).unwrap();
    assert_eq!(decoded.id, user_id);
    assert_eq!(decoded.role, Role::Doctor);
}

#[tokio::test]
async fn duplicate_email_conflicts_without_insert() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::user_row(Uuid::new_v4(), "taken@example.com", Role::User, "$argon2id$stored")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let result = register(State(state_for(&server).await), Json(register_request("taken@example.com", None))).await;
    assert_matches!(result, Err(AppError::Conflict(_)));
}

#[tokio::test]
async fn unique_violation_on_insert_is_a_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(409).set_body_json(
            MockSupabaseResponses::error_response("duplicate key value violates unique constraint", "23505")
        ))
        .mount(&server)
        .await;

    let result = register(State(state_for(&server).await), Json(register_request("race@example.com", None))).await;
    assert_matches!(result, Err(AppError::Conflict(_)));
}

#[tokio::test]
async fn admin_role_cannot_be_self_assigned() {
    let server = MockServer::start().await;

    let result = register(
        State(state_for(&server).await),
        Json(register_request("root@example.com", Some(Role::Admin))),
    ).await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn short_password_and_bad_phone_are_rejected() {
    let server = MockServer::start().await;
    let state = state_for(&server).await;

    let mut request = register_request("meera@example.com", None);
    request.password = "short".to_string();
    let result = register(State(state.clone()), Json(request)).await;
    assert_matches!(result, Err(AppError::ValidationError(_)));

    let mut request = register_request("meera@example.com", None);
    request.phone = Some("123".to_string());
    let result = register(State(state), Json(request)).await;
    assert_matches!(result, Err(AppError::ValidationError(_)));
}

// ==============================================================================
// LOGIN AND TWO-FACTOR
// ==============================================================================

#[tokio::test]
async fn login_token_role_matches_stored_role() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("email", "eq.doc@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::user_row(user_id, "doc@example.com", Role::Doctor, &hash_password(PASSWORD).unwrap())
        ])))
        .mount(&server)
        .await;

    let state = state_for(&server).await;
    let Json(outcome) = login(
        State(state.clone()),
        Json(LoginRequest { email: "doc@example.com".to_string(), password: PASSWORD.to_string() }),
    ).await.unwrap();

    let LoginOutcome::Authenticated(response) = outcome else {
        panic!("expected a token");
    };
    let decoded = decode_token(&response.access_token, &state.config.jwt_secret).unwrap();
    assert_eq!(decoded.role, Role::Doctor);
    assert_eq!(decoded.id, user_id);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("email", "eq.known@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::user_row(Uuid::new_v4(), "known@example.com", Role::User, &hash_password(PASSWORD).unwrap())
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("email", "eq.ghost@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let state = state_for(&server).await;

    let wrong = login(
        State(state.clone()),
        Json(LoginRequest { email: "known@example.com".to_string(), password: "not-the-password".to_string() }),
    ).await;
    let unknown = login(
        State(state),
        Json(LoginRequest { email: "ghost@example.com".to_string(), password: PASSWORD.to_string() }),
    ).await;

    let (Err(AppError::Auth(a)), Err(AppError::Auth(b))) = (wrong, unknown) else {
        panic!("both logins should fail with 401");
    };
    assert_eq!(a, b);
}

#[tokio::test]
async fn two_factor_login_issues_challenge_instead_of_token() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let challenge_id = Uuid::new_v4();

    let mut row = MockSupabaseResponses::user_row(user_id, "secure@example.com", Role::User, &hash_password(PASSWORD).unwrap());
    row["two_factor_enabled"] = json!(true);
    row["phone"] = json!("+919876543210");
    row["phone_verified"] = json!(true);

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    // Older open codes are retired first
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("purpose", "eq.login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "000000", 0)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = Arc::new(RecordingDelivery::default());
    let service = AccountService::with_delivery(&state_for(&server).await, delivery.clone());

    let outcome = service
        .login(LoginRequest { email: "secure@example.com".to_string(), password: PASSWORD.to_string() }, Utc::now())
        .await
        .unwrap();

    let body = serde_json::to_value(&outcome).unwrap();
    assert_eq!(body["two_factor_required"], true);
    assert_eq!(body["challenge_id"], json!(challenge_id));
    assert!(body.get("access_token").is_none());

    let sent = delivery.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+919876543210");
    assert_eq!(sent[0].1.len(), 6);
}

#[tokio::test]
async fn correct_code_completes_two_factor_login() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let challenge_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .and(query_param("id", format!("eq.{}", challenge_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 1)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 2)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("consumed", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 1)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::user_row(user_id, "secure@example.com", Role::User, "$argon2id$stored")
        ])))
        .mount(&server)
        .await;

    let Json(response) = verify_two_factor(
        State(state_for(&server).await),
        Json(TwoFactorVerifyRequest { challenge_id, code: "482913".to_string() }),
    ).await.unwrap();

    assert_eq!(response.user.id, user_id);
    assert_eq!(response.token_type, "Bearer");
}

#[tokio::test]
async fn wrong_code_burns_an_attempt() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let challenge_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 2)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 3)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let result = verify_two_factor(
        State(state_for(&server).await),
        Json(TwoFactorVerifyRequest { challenge_id, code: "111111".to_string() }),
    ).await;

    assert_matches!(result, Err(AppError::Auth(_)));
}

#[tokio::test]
async fn concurrent_guess_does_not_skip_the_attempt_count() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let challenge_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 0)
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Another guess moved the counter between the read and the write
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 1)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 2)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let result = verify_two_factor(
        State(state_for(&server).await),
        Json(TwoFactorVerifyRequest { challenge_id, code: "111111".to_string() }),
    ).await;

    assert_matches!(result, Err(AppError::Auth(_)));
}

#[tokio::test]
async fn code_is_not_compared_once_concurrent_guesses_exhaust_it() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    let challenge_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 4)
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(challenge_id, user_id, "login", "482913", 5)
        ])))
        .mount(&server)
        .await;

    // Even the right code is refused and nothing is consumed
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("consumed", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let result = verify_two_factor(
        State(state_for(&server).await),
        Json(TwoFactorVerifyRequest { challenge_id, code: "482913".to_string() }),
    ).await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

// ==============================================================================
// PHONE VERIFICATION
// ==============================================================================

#[tokio::test]
async fn phone_otp_rejects_invalid_numbers() {
    let server = MockServer::start().await;
    let user = TestUser::patient("p@example.com");

    let result = request_phone_otp(
        State(state_for(&server).await),
        Extension(user.to_user()),
        Json(PhoneOtpRequest { phone: Some("123".to_string()) }),
    ).await;

    assert_matches!(result, Err(AppError::ValidationError(_)));
}

#[tokio::test]
async fn phone_otp_is_sent_to_formatted_number() {
    let server = MockServer::start().await;
    let user = TestUser::patient("p@example.com");

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/otps"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            otp_row(Uuid::new_v4(), user.id, "phone_verification", "000000", 0)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (status, Json(body)) = request_phone_otp(
        State(state_for(&server).await),
        Extension(user.to_user()),
        Json(PhoneOtpRequest { phone: Some("+91 98765-43210".to_string()) }),
    ).await.unwrap();

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["sent"], true);
    assert_eq!(body["destination"], "*********3210");
}

#[tokio::test]
async fn verified_code_marks_phone_verified() {
    let server = MockServer::start().await;
    let user = TestUser::patient("p@example.com");
    let otp_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/otps"))
        .and(query_param("purpose", "eq.phone_verification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(otp_id, user.id, "phone_verification", "246810", 0)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("attempts", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(otp_id, user.id, "phone_verification", "246810", 1)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/otps"))
        .and(query_param("consumed", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            otp_row(otp_id, user.id, "phone_verification", "246810", 0)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut verified = MockSupabaseResponses::user_row(user.id, "p@example.com", Role::User, "$argon2id$stored");
    verified["phone"] = json!("+919876543210");
    verified["phone_verified"] = json!(true);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/users"))
        .and(query_param("id", format!("eq.{}", user.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([verified])))
        .expect(1)
        .mount(&server)
        .await;

    let Json(profile) = verify_phone_otp(
        State(state_for(&server).await),
        Extension(user.to_user()),
        Json(PhoneVerifyRequest { code: "246810".to_string() }),
    ).await.unwrap();

    assert!(profile.phone_verified);
    assert_eq!(profile.phone.as_deref(), Some("+919876543210"));
}
