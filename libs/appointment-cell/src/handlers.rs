use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::AppState;
use shared_utils::extractor::require_role;

use crate::models::{AppointmentListQuery, BookAppointmentRequest, CancelAppointmentRequest};
use crate::services::{AppointmentBookingService, SlotReservationService};

// ==============================================================================
// SLOT HOLDS
// ==============================================================================

#[axum::debug_handler]
pub async fn hold_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let hold = SlotReservationService::new(&state)
        .hold(slot_id, user.id, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(json!(hold))))
}

#[axum::debug_handler]
pub async fn release_hold(
    State(state): State<AppState>,
    Path(slot_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    SlotReservationService::new(&state).release(slot_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .book_appointment(&user, request, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn list_my_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = AppointmentBookingService::new(&state)
        .list_for_user(&user, query)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn list_doctor_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Doctor])?;

    let appointments = AppointmentBookingService::new(&state)
        .list_for_doctor(&user, query)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .get_appointment(appointment_id, &user)
        .await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let reason = request.and_then(|Json(body)| body.reason);

    let appointment = AppointmentBookingService::new(&state)
        .cancel_appointment(appointment_id, &user, reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .complete_appointment(appointment_id, &user, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment completed"
    })))
}
