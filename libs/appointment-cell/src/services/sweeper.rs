use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use shared_utils::AppState;

use crate::models::AppointmentError;
use crate::services::reservation::SlotReservationService;

/// Periodically clears lock columns of expired holds.
///
/// Availability never depends on this running: an expired hold already reads
/// as available. The sweep only keeps the table tidy.
pub struct HoldSweeper {
    reservations: SlotReservationService,
    period: Duration,
}

impl HoldSweeper {
    pub fn new(state: &AppState) -> Self {
        Self {
            reservations: SlotReservationService::new(state),
            period: Duration::from_secs(state.config.sweep_interval_seconds.max(1)),
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, AppointmentError> {
        let released = self.reservations.release_expired(now).await?;
        if released > 0 {
            info!("Released {} expired slot holds", released);
        } else {
            debug!("No expired slot holds");
        }
        Ok(released)
    }

    /// Sweep until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Hold sweeper started, period {:?}", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("Failed to sweep expired holds: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Hold sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
