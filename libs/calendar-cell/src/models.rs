use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Wellness,
    Medication,
    Vitals,
    Other,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Wellness => write!(f, "wellness"),
            EventKind::Medication => write!(f, "medication"),
            EventKind::Vitals => write!(f, "vitals"),
            EventKind::Other => write!(f, "other"),
        }
    }
}

/// A personal wellness entry owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: EventKind,
    pub title: String,
    pub event_time: DateTime<Utc>,
    pub details: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventRequest {
    pub kind: EventKind,
    pub title: String,
    pub event_time: DateTime<Utc>,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub kind: Option<EventKind>,
    pub title: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    /// Absent leaves details alone; `null` clears them.
    #[serde(default, deserialize_with = "present")]
    pub details: Option<Option<Value>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Value>::deserialize(deserializer).map(Some)
}

impl UpdateEventRequest {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.title.is_none() && self.event_time.is_none() && self.details.is_none()
    }
}

/// `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Calendar event not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<CalendarError> for AppError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::NotFound => AppError::NotFound(err.to_string()),
            CalendarError::ValidationError(msg) => AppError::ValidationError(msg),
            CalendarError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}
