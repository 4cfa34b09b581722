use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Delivery OTP Record
// ============================================================================
//
// A shop order holds at most one live code. Issuing replaces the record and
// bumps `version`, so a verify decided against an older record can never
// match the newer one, and the conditional write on the shop order rejects
// any verify that raced a reissue.
//
// ============================================================================

pub const OTP_DIGITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOtp {
    pub code: String,
    /// 1 for the first code of a shop order, +1 per reissue
    pub version: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl DeliveryOtp {
    pub fn from_draft(draft: &OtpDraft, version: u32) -> Self {
        Self {
            code: draft.code.clone(),
            version,
            issued_at: draft.issued_at,
            expires_at: draft.expires_at,
            consumed_at: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checked in order: consumed, expired, mismatched
    pub fn check(&self, submitted: &str, now: DateTime<Utc>) -> Result<(), OtpError> {
        if self.is_consumed() {
            return Err(OtpError::AlreadyConsumed);
        }
        if self.is_expired_at(now) {
            return Err(OtpError::Expired);
        }
        if submitted.trim() != self.code {
            return Err(OtpError::InvalidCode);
        }
        Ok(())
    }
}

/// Code material chosen outside the aggregate so command handling stays pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDraft {
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpDraft {
    pub fn generate(now: DateTime<Utc>, ttl: Duration) -> Self {
        let code = rand::thread_rng().gen_range(1000..10_000).to_string();
        Self::with_code(code, now, ttl)
    }

    pub fn with_code(code: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            code: code.into(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    #[error("No delivery OTP has been issued for this order")]
    NotIssued,

    #[error("Delivery OTP has expired")]
    Expired,

    #[error("Delivery OTP does not match")]
    InvalidCode,

    #[error("Delivery OTP was already used")]
    AlreadyConsumed,
}

impl OtpError {
    pub fn kind(&self) -> &'static str {
        match self {
            OtpError::NotIssued => "otp_not_issued",
            OtpError::Expired => "otp_expired",
            OtpError::InvalidCode => "otp_invalid_code",
            OtpError::AlreadyConsumed => "otp_already_consumed",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            OtpError::NotIssued => "No OTP has been sent for this order yet, please resend",
            OtpError::Expired => "OTP expired, please resend",
            OtpError::InvalidCode => "Incorrect OTP, please check the code and try again",
            OtpError::AlreadyConsumed => "This OTP has already been used",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_is_four_digits() {
        let now = Utc::now();
        for _ in 0..200 {
            let draft = OtpDraft::generate(now, Duration::minutes(5));
            assert_eq!(draft.code.len(), OTP_DIGITS);
            assert!(draft.code.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(draft.expires_at - draft.issued_at, Duration::minutes(5));
        }
    }

    #[test]
    fn test_check_order_of_failures() {
        let now = Utc::now();
        let mut otp = DeliveryOtp::from_draft(&OtpDraft::with_code("4821", now, Duration::minutes(5)), 1);

        assert_eq!(otp.check("0000", now), Err(OtpError::InvalidCode));
        assert_eq!(otp.check(" 4821 ", now), Ok(()));

        let later = now + Duration::minutes(5);
        assert_eq!(otp.check("4821", later), Err(OtpError::Expired));

        otp.consumed_at = Some(now);
        assert_eq!(otp.check("4821", later), Err(OtpError::AlreadyConsumed));
    }
}
