pub mod booking;
pub mod lifecycle;
pub mod reservation;
pub mod sweeper;

pub use booking::AppointmentBookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use reservation::SlotReservationService;
pub use sweeper::HoldSweeper;
