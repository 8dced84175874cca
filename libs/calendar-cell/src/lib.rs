pub mod handlers;
pub mod router;
pub mod models;
pub mod service;

pub use models::*;
pub use service::CalendarService;
