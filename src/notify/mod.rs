// ============================================================================
// Realtime Notifier - fan-out of order events to connected clients
// ============================================================================
//
// The core only depends on `Notifier::publish`. Delivery is best-effort: an
// audience member that is not connected misses the push and catches up by
// re-fetching. Callers never wait on or fail because of a publish; see
// `Dispatcher`.
//
// ============================================================================

pub mod dispatcher;
pub mod mail;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::assignment::AssignmentOffer;
use crate::domain::order::{
    DeliveryAddress, GeoPoint, PaymentMethod, ShopOrder, ShopOrderItem, ShopOrderStatus,
};
use crate::event_sourcing::core::{DomainEvent, EventEnvelope};

pub use dispatcher::Dispatcher;
pub use mail::{Handoff, Mailer, TracingMailer};
pub use memory::InMemoryNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "camelCase")]
pub enum Audience {
    Customer(Uuid),
    Owner(Uuid),
    DeliveryPartner(Uuid),
}

impl Audience {
    /// Channel name, also used as the broker partition key
    pub fn channel(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Customer(id) => write!(f, "customer:{id}"),
            Audience::Owner(id) => write!(f, "owner:{id}"),
            Audience::DeliveryPartner(id) => write!(f, "deliveryPartner:{id}"),
        }
    }
}

pub type RealtimeEnvelope = EventEnvelope<RealtimeEvent>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RealtimeEvent {
    NewOrder(NewOrderNotice),
    StatusChanged(StatusChangeNotice),
    AssignmentOffered(AssignmentOffer),
    AssignmentAccepted(AssignmentAcceptedNotice),
    LocationUpdated(LocationNotice),
}

impl DomainEvent for RealtimeEvent {
    fn event_name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewOrder(_) => "newOrder",
            RealtimeEvent::StatusChanged(_) => "statusChanged",
            RealtimeEvent::AssignmentOffered(_) => "assignmentOffered",
            RealtimeEvent::AssignmentAccepted(_) => "assignmentAccepted",
            RealtimeEvent::LocationUpdated(_) => "locationUpdated",
        }
    }
}

/// Sent to a shop owner when a shop order becomes actionable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderNotice {
    pub order_id: Uuid,
    pub shop_order_id: Uuid,
    pub shop_id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<ShopOrderItem>,
    pub subtotal: Decimal,
    pub payment_method: PaymentMethod,
    pub delivery_address: DeliveryAddress,
    pub created_at: DateTime<Utc>,
}

impl NewOrderNotice {
    pub fn for_shop_order(shop_order: &ShopOrder, payment_method: PaymentMethod) -> Self {
        Self {
            order_id: shop_order.order_id,
            shop_order_id: shop_order.id,
            shop_id: shop_order.shop_id,
            customer_id: shop_order.customer_id,
            items: shop_order.items.clone(),
            subtotal: shop_order.subtotal,
            payment_method,
            delivery_address: shop_order.delivery_address.clone(),
            created_at: shop_order.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeNotice {
    pub order_id: Uuid,
    pub shop_order_id: Uuid,
    pub shop_id: Uuid,
    pub from: ShopOrderStatus,
    pub to: ShopOrderStatus,
    pub reason: Option<String>,
    pub assigned_delivery_partner: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentAcceptedNotice {
    pub order_id: Uuid,
    pub shop_order_id: Uuid,
    pub partner_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationNotice {
    pub partner_id: Uuid,
    pub shop_order_id: Uuid,
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// Publish side of the realtime transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, envelope: &RealtimeEnvelope, audiences: &[Audience]) -> anyhow::Result<()>;
}
