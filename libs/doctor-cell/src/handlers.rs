use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::AppState;
use shared_utils::extractor::{require_admin, require_role};

use crate::models::{
    ConsultationMode, CreateDoctorRequest, DoctorSearchFilters, PublishSlotsRequest,
    UpdateDoctorRequest, VerifyDoctorRequest,
};
use crate::services::{DoctorService, SlotService};

#[derive(Debug, Deserialize)]
pub struct DoctorSearchQuery {
    pub specialization: Option<String>,
    pub mode: Option<ConsultationMode>,
    pub min_experience: Option<i32>,
    pub language: Option<String>,
    pub verified_only: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub available_only: Option<bool>,
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn search_doctors(
    State(state): State<AppState>,
    Query(query): Query<DoctorSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);

    let filters = DoctorSearchFilters {
        specialization: query.specialization,
        mode: query.mode,
        min_experience: query.min_experience,
        language: query.language,
        // Public listings only show verified doctors unless asked otherwise
        verified_only: Some(query.verified_only.unwrap_or(true)),
    };

    let doctors = doctor_service.search_doctors(filters, query.limit, query.offset).await?;

    Ok(Json(json!({
        "doctors": doctors,
        "total": doctors.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state).get_doctor(doctor_id).await?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn list_doctor_slots(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let now = Utc::now();
    let from = query.from.unwrap_or(now);
    let to = query.to.unwrap_or(from + Duration::days(7));

    let slots = SlotService::new(&state)
        .list_slots(doctor_id, from, to, query.available_only.unwrap_or(false), now)
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "slots": slots,
        "total_slots": slots.len()
    })))
}

// ==============================================================================
// PROTECTED DOCTOR PROFILE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_doctor(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&user)?;

    let doctor = DoctorService::new(&state).create_doctor(request).await?;
    Ok((StatusCode::CREATED, Json(json!(doctor))))
}

/// A `doctor` user creates their own profile; it is linked to their account.
#[axum::debug_handler]
pub async fn register_doctor(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(mut request): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_role(&user, &[Role::Doctor])?;

    request.user_id = Some(user.id);
    let doctor = DoctorService::new(&state).create_doctor(request).await?;
    Ok((StatusCode::CREATED, Json(json!(doctor))))
}

#[axum::debug_handler]
pub async fn update_doctor(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);
    doctor_service.get_managed_doctor(doctor_id, &user).await?;

    let updated = doctor_service.update_doctor(doctor_id, request).await?;
    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn verify_doctor(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<VerifyDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let doctor = DoctorService::new(&state).set_verified(doctor_id, request.is_verified).await?;
    Ok(Json(json!(doctor)))
}

// ==============================================================================
// SLOT MANAGEMENT
// ==============================================================================

#[axum::debug_handler]
pub async fn publish_slots(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<PublishSlotsRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    DoctorService::new(&state).get_managed_doctor(doctor_id, &user).await?;

    let slots = SlotService::new(&state)
        .publish_slots(doctor_id, &request.windows, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(json!({
        "doctor_id": doctor_id,
        "slots": slots,
        "total_slots": slots.len()
    }))))
}

#[axum::debug_handler]
pub async fn delete_slot(
    State(state): State<AppState>,
    Path((doctor_id, slot_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    DoctorService::new(&state).get_managed_doctor(doctor_id, &user).await?;

    SlotService::new(&state).delete_slot(doctor_id, slot_id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
