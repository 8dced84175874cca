use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use thiserror::Error;

use shared_database::DbError;
use shared_models::error::AppError;

// ==============================================================================
// DOCTOR PROFILE
// ==============================================================================

/// How a doctor consults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationMode {
    Online,
    #[serde(alias = "in-person")]
    InPerson,
    Both,
}

/// How a single appointment takes place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    Online,
    #[serde(alias = "in-person")]
    InPerson,
}

impl ConsultationMode {
    pub fn offers(&self, visit: VisitType) -> bool {
        matches!(
            (self, visit),
            (ConsultationMode::Both, _)
                | (ConsultationMode::Online, VisitType::Online)
                | (ConsultationMode::InPerson, VisitType::InPerson)
        )
    }

    /// Modes that can serve a search for `self`.
    pub(crate) fn search_values(&self) -> &'static str {
        match self {
            ConsultationMode::Online => "(online,both)",
            ConsultationMode::InPerson => "(in_person,both)",
            ConsultationMode::Both => "(both)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    pub mode: ConsultationMode,
    pub experience_years: i32,
    pub consultation_fee: f64,
    #[serde(default)]
    pub languages: Vec<String>,
    pub is_verified: bool,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDoctorRequest {
    pub name: String,
    pub specialization: String,
    pub mode: ConsultationMode,
    pub experience_years: i32,
    pub consultation_fee: f64,
    #[serde(default)]
    pub languages: Vec<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDoctorRequest {
    pub name: Option<String>,
    pub specialization: Option<String>,
    pub mode: Option<ConsultationMode>,
    pub experience_years: Option<i32>,
    pub consultation_fee: Option<f64>,
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDoctorRequest {
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSearchFilters {
    pub specialization: Option<String>,
    pub mode: Option<ConsultationMode>,
    pub min_experience: Option<i32>,
    pub language: Option<String>,
    pub verified_only: Option<bool>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_booked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Held,
    Booked,
}

impl Slot {
    /// A hold whose `locked_until` has passed counts as released.
    pub fn state_at(&self, now: DateTime<Utc>) -> SlotState {
        if self.is_booked {
            SlotState::Booked
        } else if self.locked_until.is_some_and(|until| until > now) {
            SlotState::Held
        } else {
            SlotState::Available
        }
    }

    pub fn is_held_by(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SlotState::Held && self.locked_by == Some(user_id)
    }

    /// Whether `user_id` may take this slot right now: free, expired, or already theirs.
    pub fn is_claimable_by(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.state_at(now) {
            SlotState::Available => true,
            SlotState::Held => self.locked_by == Some(user_id),
            SlotState::Booked => false,
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Slot plus its derived state, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    #[serde(flatten)]
    pub slot: Slot,
    pub state: SlotState,
}

impl SlotView {
    pub fn at(slot: Slot, now: DateTime<Utc>) -> Self {
        let state = slot.state_at(now);
        Self { slot, state }
    }
}

/// A stretch of availability cut into consecutive slots of `slot_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub slot_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSlotsRequest {
    pub windows: Vec<SlotWindow>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("A doctor profile already exists for this user")]
    AlreadyRegistered,

    #[error("Slot overlaps an existing slot starting at {0}")]
    SlotOverlap(DateTime<Utc>),

    #[error("Slot is booked or held and cannot be removed")]
    SlotInUse,

    #[error("Invalid slot window: {0}")]
    InvalidWindow(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not authorized to manage this doctor")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound | DoctorError::SlotNotFound => AppError::NotFound(err.to_string()),
            DoctorError::AlreadyRegistered | DoctorError::SlotOverlap(_) | DoctorError::SlotInUse => {
                AppError::Conflict(err.to_string())
            }
            DoctorError::InvalidWindow(_) | DoctorError::ValidationError(_) => {
                AppError::ValidationError(err.to_string())
            }
            DoctorError::Unauthorized => AppError::Forbidden(err.to_string()),
            DoctorError::Database(DbError::Conflict(msg)) => AppError::Conflict(msg),
            DoctorError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
