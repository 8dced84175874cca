use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_database::supabase::pg_timestamp;
use shared_utils::AppState;

use crate::models::{CalendarError, CalendarEvent, CreateEventRequest, EventQuery, UpdateEventRequest};

const MAX_TITLE_LENGTH: usize = 200;
const DEFAULT_PAGE_SIZE: i32 = 100;
const MAX_PAGE_SIZE: i32 = 500;

/// Every query is pinned to the owning user; another user's event is
/// indistinguishable from a missing one.
pub struct CalendarService {
    supabase: SupabaseClient,
}

fn owned_by(user_id: Uuid) -> String {
    format!("user_id=eq.{}", user_id)
}

fn validate_title(title: &str) -> Result<String, CalendarError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CalendarError::ValidationError("Title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(CalendarError::ValidationError(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title.to_string())
}

pub(crate) fn build_list_query(user_id: Uuid, query: &EventQuery) -> Result<String, CalendarError> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from >= to {
            return Err(CalendarError::ValidationError("`from` must be before `to`".to_string()));
        }
    }

    let mut parts = vec![owned_by(user_id)];
    if let Some(kind) = query.kind {
        parts.push(format!("kind=eq.{}", kind));
    }
    if let Some(from) = query.from {
        parts.push(format!("event_time=gte.{}", pg_timestamp(from)));
    }
    if let Some(to) = query.to {
        parts.push(format!("event_time=lt.{}", pg_timestamp(to)));
    }
    parts.push("order=event_time.asc".to_string());
    parts.push(format!("limit={}", query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)));
    parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

    Ok(parts.join("&"))
}

impl CalendarService {
    pub fn new(state: &AppState) -> Self {
        Self {
            supabase: state.db.clone(),
        }
    }

    pub async fn list_events(&self, user_id: Uuid, query: &EventQuery) -> Result<Vec<CalendarEvent>, CalendarError> {
        let filter = build_list_query(user_id, query)?;
        debug!("Listing calendar events: {}", filter);

        Ok(self.supabase.select("calendar_events", &filter).await?)
    }

    #[instrument(skip(self, request))]
    pub async fn create_event(
        &self,
        user_id: Uuid,
        request: CreateEventRequest,
        now: DateTime<Utc>,
    ) -> Result<CalendarEvent, CalendarError> {
        let title = validate_title(&request.title)?;

        let event: CalendarEvent = self.supabase
            .insert(
                "calendar_events",
                json!({
                    "user_id": user_id,
                    "kind": request.kind,
                    "title": title,
                    "event_time": request.event_time,
                    "details": request.details,
                    "created_at": now
                }),
            )
            .await?;

        info!("Calendar event {} created", event.id);
        Ok(event)
    }

    #[instrument(skip(self, request))]
    pub async fn update_event(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        request: UpdateEventRequest,
    ) -> Result<CalendarEvent, CalendarError> {
        if request.is_empty() {
            return Err(CalendarError::ValidationError("No fields to update".to_string()));
        }

        let mut changes = Map::new();
        if let Some(kind) = request.kind {
            changes.insert("kind".to_string(), json!(kind));
        }
        if let Some(title) = request.title {
            changes.insert("title".to_string(), json!(validate_title(&title)?));
        }
        if let Some(event_time) = request.event_time {
            changes.insert("event_time".to_string(), json!(event_time));
        }
        if let Some(details) = request.details {
            changes.insert("details".to_string(), details.unwrap_or(Value::Null));
        }

        let mut rows: Vec<CalendarEvent> = self.supabase
            .update(
                "calendar_events",
                &format!("id=eq.{}&{}", event_id, owned_by(user_id)),
                Value::Object(changes),
            )
            .await?;

        if rows.is_empty() {
            return Err(CalendarError::NotFound);
        }

        debug!("Calendar event {} updated", event_id);
        Ok(rows.swap_remove(0))
    }

    #[instrument(skip(self))]
    pub async fn delete_event(&self, user_id: Uuid, event_id: Uuid) -> Result<(), CalendarError> {
        let removed = self.supabase
            .delete("calendar_events", &format!("id=eq.{}&{}", event_id, owned_by(user_id)))
            .await?;

        if removed == 0 {
            return Err(CalendarError::NotFound);
        }

        info!("Calendar event {} deleted", event_id);
        Ok(())
    }
}
