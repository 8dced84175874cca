use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use shared_database::DbError;
use shared_models::error::AppError;

pub use doctor_cell::models::VisitType;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub slot_id: Uuid,
    pub status: AppointmentStatus,
    #[serde(rename = "type")]
    pub appointment_type: VisitType,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Booked)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Booked => write!(f, "booked"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// REQUEST / RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub slot_id: Uuid,
    #[serde(rename = "type", alias = "appointment_type")]
    pub appointment_type: VisitType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotHold {
    pub slot_id: Uuid,
    pub locked_by: Uuid,
    pub locked_until: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot is already booked")]
    SlotNotAvailable,

    #[error("Slot is currently held by another user")]
    SlotHeld,

    #[error("No active hold on this slot for the caller")]
    HoldNotFound,

    #[error("Slot has already started")]
    SlotInPast,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor profile is not verified yet")]
    DoctorNotVerified,

    #[error("Doctor does not offer {0:?} consultations")]
    VisitTypeNotOffered(VisitType),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointments can only be cancelled at least {cutoff_hours} hours before they start")]
    CancellationWindowClosed { cutoff_hours: i64 },

    #[error("Appointment cannot be completed before it starts")]
    TooEarlyToComplete,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound
            | AppointmentError::SlotNotFound
            | AppointmentError::HoldNotFound
            | AppointmentError::DoctorNotFound => AppError::NotFound(err.to_string()),

            AppointmentError::SlotNotAvailable
            | AppointmentError::SlotHeld
            | AppointmentError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),

            AppointmentError::SlotInPast
            | AppointmentError::DoctorNotVerified
            | AppointmentError::VisitTypeNotOffered(_)
            | AppointmentError::CancellationWindowClosed { .. }
            | AppointmentError::TooEarlyToComplete => AppError::BadRequest(err.to_string()),

            AppointmentError::ValidationError(_) => AppError::ValidationError(err.to_string()),
            AppointmentError::Unauthorized => AppError::Forbidden(err.to_string()),
            AppointmentError::DatabaseError(DbError::Conflict(msg)) => AppError::Conflict(msg),
            AppointmentError::DatabaseError(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<doctor_cell::DoctorError> for AppointmentError {
    fn from(err: doctor_cell::DoctorError) -> Self {
        use doctor_cell::DoctorError;

        match err {
            DoctorError::NotFound => AppointmentError::DoctorNotFound,
            DoctorError::SlotNotFound => AppointmentError::SlotNotFound,
            DoctorError::Unauthorized => AppointmentError::Unauthorized,
            DoctorError::Database(e) => AppointmentError::DatabaseError(e),
            other => AppointmentError::ValidationError(other.to_string()),
        }
    }
}
