use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{DbError, SupabaseClient};
use shared_database::supabase::pg_timestamp;
use shared_utils::AppState;

use crate::models::{DoctorError, Slot, SlotState, SlotView, SlotWindow};

pub const MIN_SLOT_MINUTES: i64 = 5;
pub const MAX_SLOT_MINUTES: i64 = 240;
pub const MAX_SLOTS_PER_PUBLISH: usize = 500;

/// Rows with no live hold and no booking as of `now`.
pub fn free_filter(now: DateTime<Utc>) -> String {
    format!(
        "is_booked=eq.false&or=(locked_until.is.null,locked_until.lt.{})",
        pg_timestamp(now)
    )
}

/// Rows `user_id` may claim as of `now`: free, expired, or held by them.
pub fn claimable_filter(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!(
        "is_booked=eq.false&or=(locked_until.is.null,locked_until.lt.{},locked_by.eq.{})",
        pg_timestamp(now),
        user_id
    )
}

/// Cuts windows into consecutive slots, dropping any trailing remainder.
pub fn plan_slots(windows: &[SlotWindow]) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, DoctorError> {
    if windows.is_empty() {
        return Err(DoctorError::InvalidWindow("At least one window is required".to_string()));
    }

    let mut planned = Vec::new();

    for window in windows {
        if window.end_time <= window.start_time {
            return Err(DoctorError::InvalidWindow(format!(
                "Window starting {} must end after it starts",
                window.start_time
            )));
        }
        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&window.slot_minutes) {
            return Err(DoctorError::InvalidWindow(format!(
                "Slot length must be between {} and {} minutes",
                MIN_SLOT_MINUTES, MAX_SLOT_MINUTES
            )));
        }

        let step = Duration::minutes(window.slot_minutes);
        let mut cursor = window.start_time;
        while cursor + step <= window.end_time {
            planned.push((cursor, cursor + step));
            cursor += step;
        }
    }

    if planned.is_empty() {
        return Err(DoctorError::InvalidWindow("Windows are shorter than their slot length".to_string()));
    }
    if planned.len() > MAX_SLOTS_PER_PUBLISH {
        return Err(DoctorError::InvalidWindow(format!(
            "At most {} slots can be published at once",
            MAX_SLOTS_PER_PUBLISH
        )));
    }

    planned.sort_by_key(|(start, _)| *start);
    for pair in planned.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(DoctorError::SlotOverlap(pair[1].0));
        }
    }

    Ok(planned)
}

pub struct SlotService {
    supabase: SupabaseClient,
}

impl SlotService {
    pub fn new(state: &AppState) -> Self {
        Self {
            supabase: state.db.clone(),
        }
    }

    /// Publish availability for a doctor in bulk.
    #[instrument(skip(self, windows))]
    pub async fn publish_slots(
        &self,
        doctor_id: Uuid,
        windows: &[SlotWindow],
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, DoctorError> {
        let planned = plan_slots(windows)?;

        if let Some((start, _)) = planned.iter().find(|(start, _)| *start <= now) {
            return Err(DoctorError::InvalidWindow(format!("Slot at {} is in the past", start)));
        }

        let first_start = planned[0].0;
        let last_end = planned.iter().map(|(_, end)| *end).max().unwrap_or(first_start);

        let existing: Vec<Slot> = self.supabase
            .select(
                "slots",
                &format!(
                    "doctor_id=eq.{}&start_time=lt.{}&end_time=gt.{}",
                    doctor_id,
                    pg_timestamp(last_end),
                    pg_timestamp(first_start)
                ),
            )
            .await?;

        for (start, end) in &planned {
            if let Some(clash) = existing.iter().find(|slot| slot.overlaps(*start, *end)) {
                warn!("Publishing for {} overlaps slot {}", doctor_id, clash.id);
                return Err(DoctorError::SlotOverlap(clash.start_time));
            }
        }

        let rows = planned
            .iter()
            .map(|(start, end)| json!({
                "doctor_id": doctor_id,
                "start_time": start,
                "end_time": end,
                "is_booked": false,
                "locked_until": null,
                "locked_by": null
            }))
            .collect();

        // A publish racing this one can pass the read above; the exclusion
        // constraint on (doctor_id, time range) rejects the loser with 409
        let slots: Vec<Slot> = match self.supabase.insert_many("slots", rows).await {
            Ok(slots) => slots,
            Err(DbError::Conflict(msg)) => {
                warn!("Publishing for {} rejected by the slot overlap constraint: {}", doctor_id, msg);
                return Err(DoctorError::SlotOverlap(first_start));
            }
            Err(e) => return Err(e.into()),
        };
        info!("Published {} slots for doctor {}", slots.len(), doctor_id);

        Ok(slots)
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, DoctorError> {
        self.supabase
            .select_one("slots", &format!("id=eq.{}", slot_id))
            .await?
            .ok_or(DoctorError::SlotNotFound)
    }

    /// Slots starting in `[from, to)`, each tagged with its state at `now`.
    pub async fn list_slots(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        available_only: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<SlotView>, DoctorError> {
        if to <= from {
            return Err(DoctorError::ValidationError("'to' must be after 'from'".to_string()));
        }
        debug!("Listing slots for doctor {} between {} and {}", doctor_id, from, to);

        let slots: Vec<Slot> = self.supabase
            .select(
                "slots",
                &format!(
                    "doctor_id=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
                    doctor_id,
                    pg_timestamp(from),
                    pg_timestamp(to)
                ),
            )
            .await?;

        Ok(slots
            .into_iter()
            .map(|slot| SlotView::at(slot, now))
            .filter(|view| !available_only || view.state == SlotState::Available)
            .collect())
    }

    /// Removes a slot nobody has booked or currently holds.
    #[instrument(skip(self))]
    pub async fn delete_slot(
        &self,
        doctor_id: Uuid,
        slot_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DoctorError> {
        let slot = self.get_slot(slot_id).await?;
        if slot.doctor_id != doctor_id {
            return Err(DoctorError::SlotNotFound);
        }
        if slot.state_at(now) != SlotState::Available {
            return Err(DoctorError::SlotInUse);
        }

        // Guarded delete: a hold or booking taken since the read wins
        let removed = self.supabase
            .delete("slots", &format!("id=eq.{}&{}", slot_id, free_filter(now)))
            .await?;

        if removed == 0 {
            return Err(DoctorError::SlotInUse);
        }

        info!("Removed slot {} of doctor {}", slot_id, doctor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 6, hour, minute, 0).unwrap()
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>, minutes: i64) -> SlotWindow {
        SlotWindow { start_time: start, end_time: end, slot_minutes: minutes }
    }

    #[test]
    fn window_is_cut_and_remainder_dropped() {
        let planned = plan_slots(&[window(at(9, 0), at(10, 45), 30)]).unwrap();
        assert_eq!(planned, vec![
            (at(9, 0), at(9, 30)),
            (at(9, 30), at(10, 0)),
            (at(10, 0), at(10, 30)),
        ]);
    }

    #[test]
    fn overlapping_windows_are_rejected() {
        let result = plan_slots(&[
            window(at(9, 0), at(10, 0), 30),
            window(at(9, 45), at(11, 0), 15),
        ]);
        assert_matches!(result, Err(DoctorError::SlotOverlap(start)) if start == at(9, 45));
    }

    #[test]
    fn adjacent_windows_are_fine() {
        let planned = plan_slots(&[
            window(at(11, 0), at(12, 0), 60),
            window(at(9, 0), at(11, 0), 60),
        ]).unwrap();
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[0].0, at(9, 0));
    }

    #[test]
    fn invalid_windows() {
        assert_matches!(plan_slots(&[]), Err(DoctorError::InvalidWindow(_)));
        assert_matches!(plan_slots(&[window(at(10, 0), at(9, 0), 30)]), Err(DoctorError::InvalidWindow(_)));
        assert_matches!(plan_slots(&[window(at(9, 0), at(10, 0), 2)]), Err(DoctorError::InvalidWindow(_)));
        assert_matches!(plan_slots(&[window(at(9, 0), at(9, 20), 30)]), Err(DoctorError::InvalidWindow(_)));
    }

    #[test]
    fn filters_name_the_hold_columns() {
        let now = at(8, 0);
        let user = Uuid::nil();
        assert_eq!(
            free_filter(now),
            "is_booked=eq.false&or=(locked_until.is.null,locked_until.lt.2030-05-06T08:00:00.000Z)"
        );
        assert!(claimable_filter(user, now).ends_with(
            "locked_by.eq.00000000-0000-0000-0000-000000000000)"
        ));
    }
}
