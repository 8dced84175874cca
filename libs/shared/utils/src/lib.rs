pub mod extractor;
pub mod jwt;
pub mod otp;
pub mod phone;
pub mod state;
pub mod test_utils;

pub use state::AppState;
