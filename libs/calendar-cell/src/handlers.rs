use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::AppState;

use crate::models::{CreateEventRequest, EventQuery, UpdateEventRequest};
use crate::service::CalendarService;

#[axum::debug_handler]
pub async fn list_events(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Value>, AppError> {
    let events = CalendarService::new(&state).list_events(user.id, &query).await?;

    Ok(Json(json!({
        "events": events,
        "total": events.len()
    })))
}

#[axum::debug_handler]
pub async fn create_event(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let event = CalendarService::new(&state)
        .create_event(user.id, request, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(json!(event))))
}

#[axum::debug_handler]
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateEventRequest>,
) -> Result<Json<Value>, AppError> {
    let event = CalendarService::new(&state)
        .update_event(user.id, event_id, request)
        .await?;

    Ok(Json(json!(event)))
}

#[axum::debug_handler]
pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    CalendarService::new(&state).delete_event(user.id, event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
