pub mod account;
pub mod otp;
pub mod password;

pub use account::AccountService;
pub use otp::{LogDelivery, OtpDelivery, OtpService};
