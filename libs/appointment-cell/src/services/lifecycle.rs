use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService {
    cancellation_cutoff: Duration,
}

impl AppointmentLifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_cutoff(Duration::hours(config.cancellation_cutoff_hours))
    }

    pub fn with_cutoff(cancellation_cutoff: Duration) -> Self {
        Self { cancellation_cutoff }
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Booked => &[AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => &[],
        }
    }

    /// Patients may cancel only while at least the cutoff remains before the slot starts.
    pub fn check_patient_cancellation(
        &self,
        slot_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if slot_start - now < self.cancellation_cutoff {
            return Err(AppointmentError::CancellationWindowClosed {
                cutoff_hours: self.cancellation_cutoff.num_hours(),
            });
        }
        Ok(())
    }

    pub fn check_completion(
        &self,
        slot_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if now < slot_start {
            return Err(AppointmentError::TooEarlyToComplete);
        }
        Ok(())
    }
}
