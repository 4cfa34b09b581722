use uuid::Uuid;

use super::value_objects::ShopOrderStatus;
use crate::domain::otp::OtpError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Business Rule Errors
// ============================================================================
//
// Everything except `Internal` is an expected outcome the caller can act on.
// `Internal` wraps infrastructure failures; its Display never leaks them.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Cannot move order from '{from}' to '{to}'")]
    InvalidTransition {
        from: ShopOrderStatus,
        to: ShopOrderStatus,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("Service temporarily unavailable")]
    Internal(#[source] anyhow::Error),
}

impl OrderError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        OrderError::NotFound { entity, id }
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation",
            OrderError::NotFound { .. } => "not_found",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::Precondition(_) => "precondition",
            OrderError::Conflict(_) => "conflict",
            OrderError::Forbidden(_) => "forbidden",
            OrderError::Otp(otp) => otp.kind(),
            OrderError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the person who issued the command
    pub fn user_message(&self) -> String {
        match self {
            OrderError::Validation(msg) => format!("Please check your input: {msg}"),
            OrderError::NotFound { entity, .. } => format!("The {entity} could not be found"),
            OrderError::InvalidTransition { from, to } => {
                format!("An order that is '{from}' cannot be marked '{to}'")
            }
            OrderError::Precondition(msg) | OrderError::Conflict(msg) | OrderError::Forbidden(msg) => msg.clone(),
            OrderError::Otp(otp) => otp.user_message().to_string(),
            OrderError::Internal(_) => "Something went wrong on our side, please try again shortly".to_string(),
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { entity, id, .. } => {
                OrderError::Conflict(format!("The {entity} {id} was changed by someone else, please retry"))
            }
            StoreError::NotFound { entity, id } => OrderError::NotFound { entity, id },
            StoreError::Backend(source) => OrderError::Internal(source),
        }
    }
}

impl IsTransient for OrderError {
    /// Only lost version races are worth re-deciding automatically
    fn is_transient(&self) -> bool {
        matches!(self, OrderError::Conflict(_))
    }
}
