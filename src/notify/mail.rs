use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload handed to the notification/mail collaborator. How it reaches the
/// recipient (mail, SMS, push) is not this crate's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Handoff {
    #[serde(rename_all = "camelCase")]
    DeliveryOtp {
        recipient: Uuid,
        shop_order_id: Uuid,
        code: String,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    AssignmentAlert {
        recipient: Uuid,
        shop_order_id: Uuid,
        message: String,
    },
}

impl Handoff {
    pub fn kind(&self) -> &'static str {
        match self {
            Handoff::DeliveryOtp { .. } => "delivery_otp",
            Handoff::AssignmentAlert { .. } => "assignment_alert",
        }
    }

    pub fn recipient(&self) -> Uuid {
        match self {
            Handoff::DeliveryOtp { recipient, .. } | Handoff::AssignmentAlert { recipient, .. } => *recipient,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, handoff: &Handoff) -> anyhow::Result<()>;
}

/// Logs hand-offs instead of sending them. OTP codes are never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn deliver(&self, handoff: &Handoff) -> anyhow::Result<()> {
        match handoff {
            Handoff::DeliveryOtp {
                recipient,
                shop_order_id,
                expires_at,
                ..
            } => tracing::info!(
                recipient = %recipient,
                shop_order_id = %shop_order_id,
                expires_at = %expires_at,
                "📨 Delivery OTP handed off"
            ),
            Handoff::AssignmentAlert {
                recipient,
                shop_order_id,
                message,
            } => tracing::info!(
                recipient = %recipient,
                shop_order_id = %shop_order_id,
                message = %message,
                "📨 Assignment alert handed off"
            ),
        }
        Ok(())
    }
}
