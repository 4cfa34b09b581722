// ============================================================================
// OTP Gate - delivery confirmation codes
// ============================================================================
//
// A 4-digit code is issued when a shop order goes out for delivery and can
// be reissued while it is still out. The courier submits the code at the
// door; only a verified code lets the order be marked delivered.
//
// ============================================================================

pub mod gate;
pub mod record;

pub use gate::{OtpConfig, OtpGate};
pub use record::{DeliveryOtp, OtpDraft, OtpError, OTP_DIGITS};
