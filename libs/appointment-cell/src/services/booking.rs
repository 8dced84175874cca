use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_utils::AppState;

use doctor_cell::models::Doctor;
use doctor_cell::services::DoctorService;

use crate::models::{
    Appointment, AppointmentError, AppointmentListQuery, AppointmentStatus,
    BookAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::reservation::SlotReservationService;

const DEFAULT_PAGE_SIZE: i32 = 50;
const MAX_PAGE_SIZE: i32 = 200;

/// How the caller relates to an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Participant {
    Patient,
    Doctor,
    Admin,
}

pub struct AppointmentBookingService {
    supabase: SupabaseClient,
    doctors: DoctorService,
    reservations: SlotReservationService,
    lifecycle: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            supabase: state.db.clone(),
            doctors: DoctorService::new(state),
            reservations: SlotReservationService::new(state),
            lifecycle: AppointmentLifecycleService::new(&state.config),
        }
    }

    /// Book a slot for `user`. The slot must be free, expired, or held by `user`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn book_appointment(
        &self,
        user: &User,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let slot = self.reservations.get_slot(request.slot_id).await?;
        SlotReservationService::check_claimable(&slot, user.id, now)?;

        let doctor = self.doctors.get_doctor(slot.doctor_id).await?;
        if !doctor.is_verified {
            return Err(AppointmentError::DoctorNotVerified);
        }
        if !doctor.mode.offers(request.appointment_type) {
            return Err(AppointmentError::VisitTypeNotOffered(request.appointment_type));
        }

        self.reservations.claim_for_booking(slot.id, user.id, now).await?;

        let appointment_data = json!({
            "user_id": user.id,
            "doctor_id": doctor.id,
            "slot_id": slot.id,
            "status": AppointmentStatus::Booked,
            "type": request.appointment_type,
            "cancellation_reason": null,
            "created_at": now,
            "updated_at": now
        });

        let appointment: Appointment = match self.supabase.insert("appointments", appointment_data).await {
            Ok(appointment) => appointment,
            Err(e) => {
                error!("Failed to record appointment for slot {}: {}", slot.id, e);
                // Compensate so the slot does not stay booked with no appointment
                if let Err(revert) = self.reservations.release_booking(slot.id).await {
                    error!("Failed to return slot {} to the pool: {}", slot.id, revert);
                }
                return Err(e.into());
            }
        };

        info!("Appointment {} booked on slot {}", appointment.id, slot.id);
        Ok(appointment)
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.supabase
            .select_one("appointments", &format!("id=eq.{}", appointment_id))
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    fn participant(user: &User, appointment: &Appointment, doctor: &Doctor) -> Option<Participant> {
        if doctor.is_owned_by(user.id) {
            Some(Participant::Doctor)
        } else if appointment.user_id == user.id {
            Some(Participant::Patient)
        } else if user.is_admin() {
            Some(Participant::Admin)
        } else {
            None
        }
    }

    pub async fn get_appointment(&self, appointment_id: Uuid, user: &User) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let doctor = self.doctors.get_doctor(appointment.doctor_id).await?;

        // Strangers get the same answer as a missing row
        Self::participant(user, &appointment, &doctor).ok_or(AppointmentError::NotFound)?;
        Ok(appointment)
    }

    pub async fn list_for_user(&self, user: &User, query: AppointmentListQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let filter = format!("user_id=eq.{}", user.id);
        self.list(&filter, &query).await
    }

    /// Appointments of the doctor profile linked to `user`.
    pub async fn list_for_doctor(&self, user: &User, query: AppointmentListQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let doctor = self.doctors
            .find_by_user(user.id)
            .await?
            .ok_or(AppointmentError::DoctorNotFound)?;

        let filter = format!("doctor_id=eq.{}", doctor.id);
        self.list(&filter, &query).await
    }

    async fn list(&self, filter: &str, query: &AppointmentListQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut parts = vec![filter.to_string()];
        if let Some(status) = query.status {
            parts.push(format!("status=eq.{}", status));
        }
        parts.push("order=created_at.desc".to_string());
        parts.push(format!("limit={}", query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)));
        parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));

        Ok(self.supabase.select("appointments", &parts.join("&")).await?)
    }

    /// Cancel and return the slot to the pool. Patients are held to the cutoff;
    /// the doctor and admins are not.
    #[instrument(skip(self, user, reason), fields(user_id = %user.id))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let doctor = self.doctors.get_doctor(appointment.doctor_id).await?;

        let participant = Self::participant(user, &appointment, &doctor).ok_or(AppointmentError::NotFound)?;

        self.lifecycle.validate_status_transition(appointment.status, AppointmentStatus::Cancelled)?;

        if participant == Participant::Patient {
            let slot = self.reservations.get_slot(appointment.slot_id).await?;
            self.lifecycle.check_patient_cancellation(slot.start_time, now)?;
        }

        let cancelled = self
            .transition(
                &appointment,
                AppointmentStatus::Cancelled,
                json!({
                    "status": AppointmentStatus::Cancelled,
                    "cancellation_reason": reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
                    "updated_at": now
                }),
            )
            .await?;

        if let Err(e) = self.reservations.release_booking(appointment.slot_id).await {
            error!("Failed to free slot {} after cancelling {}: {}", appointment.slot_id, appointment_id, e);
            // Restore the appointment so a retry can cancel it again
            self.revert_cancellation(&appointment).await;
            return Err(e);
        }

        info!("Appointment {} cancelled by {:?}", appointment_id, participant);
        Ok(cancelled)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let doctor = self.doctors.get_doctor(appointment.doctor_id).await?;

        match Self::participant(user, &appointment, &doctor) {
            Some(Participant::Doctor) | Some(Participant::Admin) => {}
            Some(Participant::Patient) => return Err(AppointmentError::Unauthorized),
            None => return Err(AppointmentError::NotFound),
        }

        self.lifecycle.validate_status_transition(appointment.status, AppointmentStatus::Completed)?;

        let slot = self.reservations.get_slot(appointment.slot_id).await?;
        self.lifecycle.check_completion(slot.start_time, now)?;

        let completed = self
            .transition(
                &appointment,
                AppointmentStatus::Completed,
                json!({
                    "status": AppointmentStatus::Completed,
                    "updated_at": now
                }),
            )
            .await?;

        info!("Appointment {} completed", appointment_id);
        Ok(completed)
    }

    /// Put a cancelled appointment back the way it was before `cancel_appointment`.
    async fn revert_cancellation(&self, original: &Appointment) {
        let reverted: Result<Vec<Appointment>, _> = self.supabase
            .update(
                "appointments",
                &format!("id=eq.{}&status=eq.{}", original.id, AppointmentStatus::Cancelled),
                json!({
                    "status": original.status,
                    "cancellation_reason": original.cancellation_reason,
                    "updated_at": original.updated_at
                }),
            )
            .await;

        match reverted {
            Ok(rows) if !rows.is_empty() => {
                warn!("Cancellation of appointment {} rolled back", original.id);
            }
            Ok(_) => {
                error!("Appointment {} left cancelled with its slot still booked", original.id);
            }
            Err(e) => {
                error!("Failed to roll back cancellation of appointment {}: {}", original.id, e);
            }
        }
    }

    /// Status update guarded on the status we validated against.
    async fn transition(
        &self,
        appointment: &Appointment,
        to: AppointmentStatus,
        body: serde_json::Value,
    ) -> Result<Appointment, AppointmentError> {
        let mut rows: Vec<Appointment> = self.supabase
            .update(
                "appointments",
                &format!("id=eq.{}&status=eq.{}", appointment.id, appointment.status),
                body,
            )
            .await?;

        if rows.is_empty() {
            warn!("Appointment {} changed status concurrently", appointment.id);
            return Err(AppointmentError::InvalidStatusTransition {
                from: appointment.status,
                to,
            });
        }

        Ok(rows.swap_remove(0))
    }
}
