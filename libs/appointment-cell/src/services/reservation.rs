use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_database::supabase::pg_timestamp;
use shared_utils::AppState;

use doctor_cell::models::{Slot, SlotState};
use doctor_cell::services::slots::claimable_filter;

use crate::models::{AppointmentError, SlotHold};

/// Temporary holds and the booking claim on slots.
///
/// Every write here is a single conditional PATCH: the database evaluates the
/// filter and the update together, so two callers can never both see a row
/// match. An empty result means the caller lost.
#[derive(Clone)]
pub struct SlotReservationService {
    supabase: SupabaseClient,
    hold_ttl: Duration,
}

impl SlotReservationService {
    pub fn new(state: &AppState) -> Self {
        Self {
            supabase: state.db.clone(),
            hold_ttl: Duration::minutes(state.config.slot_hold_minutes.max(1)),
        }
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, AppointmentError> {
        self.supabase
            .select_one("slots", &format!("id=eq.{}", slot_id))
            .await?
            .ok_or(AppointmentError::SlotNotFound)
    }

    /// Explains why `user_id` cannot take `slot` at `now`, if it cannot.
    pub fn check_claimable(slot: &Slot, user_id: Uuid, now: DateTime<Utc>) -> Result<(), AppointmentError> {
        if slot.has_started(now) {
            return Err(AppointmentError::SlotInPast);
        }
        if slot.is_claimable_by(user_id, now) {
            return Ok(());
        }
        match slot.state_at(now) {
            SlotState::Booked => Err(AppointmentError::SlotNotAvailable),
            _ => Err(AppointmentError::SlotHeld),
        }
    }

    /// Place or refresh a hold on `slot_id` for `user_id`.
    #[instrument(skip(self))]
    pub async fn hold(&self, slot_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<SlotHold, AppointmentError> {
        let slot = self.get_slot(slot_id).await?;
        Self::check_claimable(&slot, user_id, now)?;
        if slot.is_held_by(user_id, now) {
            debug!("Refreshing hold on slot {} for {}", slot_id, user_id);
        }

        let locked_until = now + self.hold_ttl;
        let rows: Vec<Slot> = self.supabase
            .update(
                "slots",
                &format!("id=eq.{}&{}", slot_id, claimable_filter(user_id, now)),
                json!({
                    "locked_by": user_id,
                    "locked_until": locked_until
                }),
            )
            .await?;

        if rows.is_empty() {
            warn!("Hold on slot {} lost to a concurrent request", slot_id);
            return Err(AppointmentError::SlotHeld);
        }

        info!("Slot {} held by {} until {}", slot_id, user_id, locked_until);
        Ok(SlotHold {
            slot_id,
            locked_by: user_id,
            locked_until,
        })
    }

    /// Drop the caller's own hold. Holds of other users are left alone.
    #[instrument(skip(self))]
    pub async fn release(&self, slot_id: Uuid, user_id: Uuid) -> Result<(), AppointmentError> {
        let rows: Vec<Slot> = self.supabase
            .update(
                "slots",
                &format!("id=eq.{}&is_booked=eq.false&locked_by=eq.{}", slot_id, user_id),
                json!({
                    "locked_by": null,
                    "locked_until": null
                }),
            )
            .await?;

        if rows.is_empty() {
            return Err(AppointmentError::HoldNotFound);
        }

        info!("Slot {} released by {}", slot_id, user_id);
        Ok(())
    }

    /// Turn the slot into a booking for `user_id`, clearing any hold.
    pub async fn claim_for_booking(&self, slot_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<Slot, AppointmentError> {
        let mut rows: Vec<Slot> = self.supabase
            .update(
                "slots",
                &format!("id=eq.{}&{}", slot_id, claimable_filter(user_id, now)),
                json!({
                    "is_booked": true,
                    "locked_by": null,
                    "locked_until": null
                }),
            )
            .await?;

        if rows.is_empty() {
            warn!("Booking claim on slot {} lost to a concurrent request", slot_id);
            return Err(AppointmentError::SlotNotAvailable);
        }

        debug!("Slot {} claimed for booking by {}", slot_id, user_id);
        Ok(rows.swap_remove(0))
    }

    /// Make a booked slot bookable again.
    pub async fn release_booking(&self, slot_id: Uuid) -> Result<(), AppointmentError> {
        let _: Vec<Slot> = self.supabase
            .update(
                "slots",
                &format!("id=eq.{}&is_booked=eq.true", slot_id),
                json!({ "is_booked": false }),
            )
            .await?;

        debug!("Slot {} returned to the pool", slot_id);
        Ok(())
    }

    /// Clears the lock columns of every hold that expired before `now`.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, AppointmentError> {
        let rows: Vec<Slot> = self.supabase
            .update(
                "slots",
                &format!("is_booked=eq.false&locked_until=lt.{}", pg_timestamp(now)),
                json!({
                    "locked_by": null,
                    "locked_until": null
                }),
            )
            .await?;

        Ok(rows.len())
    }
}
