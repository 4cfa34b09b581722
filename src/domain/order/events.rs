use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{DeliveryAddress, GeoPoint, ShopOrderItem, ShopOrderStatus};
use crate::domain::otp::DeliveryOtp;
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Shop Order Events - Domain Events for the ShopOrder Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShopOrderEvent {
    Created(ShopOrderCreated),
    StatusChanged(StatusChanged),
    PartnerAssigned(PartnerAssigned),
    PartnerReleased(PartnerReleased),
    OtpIssued(OtpIssued),
    OtpVerified(OtpVerified),
    PaymentSettled(PaymentSettled),
}

impl DomainEvent for ShopOrderEvent {
    fn event_name(&self) -> &'static str {
        match self {
            ShopOrderEvent::Created(_) => "ShopOrderCreated",
            ShopOrderEvent::StatusChanged(_) => "ShopOrderStatusChanged",
            ShopOrderEvent::PartnerAssigned(_) => "DeliveryPartnerAssigned",
            ShopOrderEvent::PartnerReleased(_) => "DeliveryPartnerReleased",
            ShopOrderEvent::OtpIssued(_) => "DeliveryOtpIssued",
            ShopOrderEvent::OtpVerified(_) => "DeliveryOtpVerified",
            ShopOrderEvent::PaymentSettled(_) => "ShopOrderPaymentSettled",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// First event of every shop order; carries the immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopOrderCreated {
    pub shop_order_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub shop_name: String,
    pub shop_location: GeoPoint,
    pub owner_id: Uuid,
    pub delivery_address: DeliveryAddress,
    pub items: Vec<ShopOrderItem>,
    pub subtotal: Decimal,
    /// Online order whose payment is not confirmed yet
    #[serde(default)]
    pub awaiting_payment: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub from: ShopOrderStatus,
    pub to: ShopOrderStatus,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerAssigned {
    pub partner_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerReleased {
    pub partner_id: Uuid,
    pub released_at: DateTime<Utc>,
}

/// Replaces any earlier code for the same shop order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpIssued {
    pub otp: DeliveryOtp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpVerified {
    pub otp_version: u32,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSettled {
    pub settled_at: DateTime<Utc>,
}
