use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::{PlaceOrder, ShopOrderCommand};
use super::errors::OrderError;
use super::events::*;
use super::shops::ShopProfile;
use super::value_objects::{
    DeliveryAddress, GeoPoint, OrderRating, PaymentMethod, PaymentStatus, ShopOrderItem, ShopOrderStatus,
};
use crate::domain::otp::{DeliveryOtp, OtpDraft, OtpError};
use crate::event_sourcing::core::Aggregate;

/// Sum of amounts, rejecting totals too large to represent
fn checked_total(amounts: impl IntoIterator<Item = Option<Decimal>>) -> Result<Decimal, OrderError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| amount.and_then(|a| total.checked_add(a)))
        .ok_or_else(|| OrderError::Validation("order total is too large".into()))
}

// ============================================================================
// Order - root of a customer purchase
// ============================================================================
//
// The header (payment, totals, rating) and the shop orders are written
// separately. Shop orders are the unit of concurrency: each carries its own
// version and every change to one goes through `ShopOrder::handle_command`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Header version; shop orders are versioned independently
    pub version: i64,
    pub customer_id: Uuid,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub rating: Option<OrderRating>,
    #[serde(default)]
    pub shop_orders: Vec<ShopOrder>,
}

/// Result of placing an order: the full order plus the creation event of
/// each shop order, in the same order as `order.shop_orders`.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub events: Vec<ShopOrderEvent>,
}

impl Order {
    /// Split a cart into one shop order per shop, in first-appearance order.
    pub fn place(
        request: &PlaceOrder,
        shops: &HashMap<Uuid, ShopProfile>,
        now: DateTime<Utc>,
    ) -> Result<PlacedOrder, OrderError> {
        let payment_method = request.validate()?;
        let order_id = Uuid::now_v7();

        let mut shop_sequence: Vec<Uuid> = Vec::new();
        let mut grouped: HashMap<Uuid, Vec<ShopOrderItem>> = HashMap::new();
        for item in &request.items {
            if !grouped.contains_key(&item.shop_id) {
                shop_sequence.push(item.shop_id);
            }
            grouped.entry(item.shop_id).or_default().push(ShopOrderItem::from(item));
        }

        let mut events = Vec::with_capacity(shop_sequence.len());
        let mut shop_orders = Vec::with_capacity(shop_sequence.len());
        for shop_id in shop_sequence {
            let shop = shops.get(&shop_id).ok_or_else(|| OrderError::not_found("shop", shop_id))?;
            let items = grouped.remove(&shop_id).unwrap_or_default();
            let subtotal = checked_total(items.iter().map(ShopOrderItem::line_total))?;

            let created = ShopOrderEvent::Created(ShopOrderCreated {
                shop_order_id: Uuid::now_v7(),
                order_id,
                customer_id: request.customer_id,
                shop_id,
                shop_name: shop.name.clone(),
                shop_location: shop.location,
                owner_id: shop.owner_id,
                delivery_address: request.delivery_address.clone(),
                items,
                subtotal,
                awaiting_payment: payment_method == PaymentMethod::Online,
                created_at: now,
            });

            shop_orders.push(ShopOrder::apply_first_event(&created)?);
            events.push(created);
        }

        let total_amount = checked_total(shop_orders.iter().map(|so| Some(so.subtotal)))?;
        let order = Order {
            id: order_id,
            version: 1,
            customer_id: request.customer_id,
            delivery_address: request.delivery_address.clone(),
            payment_method,
            payment_status: PaymentStatus::Pending,
            total_amount,
            created_at: now,
            rating: None,
            shop_orders,
        };

        Ok(PlacedOrder { order, events })
    }

    /// Copy without the shop orders, as stored in the header row
    pub fn header(&self) -> Order {
        Order {
            shop_orders: Vec::new(),
            ..self.clone()
        }
    }

    pub fn shop_order(&self, shop_order_id: Uuid) -> Option<&ShopOrder> {
        self.shop_orders.iter().find(|so| so.id == shop_order_id)
    }

    pub fn all_pending(&self) -> bool {
        self.shop_orders.iter().all(|so| so.status == ShopOrderStatus::Pending)
    }

    /// Every shop order finished and at least one actually delivered
    pub fn is_settled(&self) -> bool {
        !self.shop_orders.is_empty()
            && self.shop_orders.iter().all(|so| so.status.is_terminal())
            && self.shop_orders.iter().any(|so| so.status == ShopOrderStatus::Delivered)
    }

    pub fn confirm_payment(&self) -> Result<Order, OrderError> {
        if self.payment_method != PaymentMethod::Online {
            return Err(OrderError::Precondition(
                "Cash on delivery orders are paid at the door".into(),
            ));
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(OrderError::Precondition("This order has already been paid".into()));
        }

        let mut next = self.clone();
        next.payment_status = PaymentStatus::Paid;
        next.version += 1;
        Ok(next)
    }

    pub fn rate(
        &self,
        actor_id: Uuid,
        stars: u8,
        review: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        if actor_id != self.customer_id {
            return Err(OrderError::Forbidden("Only the customer who placed the order can rate it".into()));
        }
        if !(1..=5).contains(&stars) {
            return Err(OrderError::Validation(format!("rating must be between 1 and 5, got {stars}")));
        }
        if !self.is_settled() {
            return Err(OrderError::Precondition("Orders can be rated once they have been delivered".into()));
        }

        let mut next = self.clone();
        next.rating = Some(OrderRating {
            stars,
            review: review.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            rated_at: at,
        });
        next.version += 1;
        Ok(next)
    }
}

// ============================================================================
// ShopOrder Aggregate - the status transition engine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopOrder {
    // Identity
    pub id: Uuid,
    pub order_id: Uuid,
    pub version: i64,

    // Snapshot taken at placement
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub shop_name: String,
    pub shop_location: GeoPoint,
    pub owner_id: Uuid,
    pub delivery_address: DeliveryAddress,
    pub items: Vec<ShopOrderItem>,
    pub subtotal: Decimal,

    // Lifecycle
    pub status: ShopOrderStatus,
    #[serde(default)]
    pub awaiting_payment: bool,
    pub assigned_delivery_partner: Option<Uuid>,
    pub delivery_otp: Option<DeliveryOtp>,
    pub cancellation_reason: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ShopOrder {
    pub fn otp_verified(&self) -> bool {
        self.delivery_otp.as_ref().is_some_and(DeliveryOtp::is_consumed)
    }

    fn next_otp_version(&self) -> u32 {
        self.delivery_otp.as_ref().map_or(0, |otp| otp.version) + 1
    }

    fn authorize_status_change(&self, to: ShopOrderStatus, actor_id: Uuid) -> Result<(), OrderError> {
        let allowed = match to {
            ShopOrderStatus::Preparing | ShopOrderStatus::Ready | ShopOrderStatus::OutOfDelivery => {
                actor_id == self.owner_id
            }
            ShopOrderStatus::Delivered => self.assigned_delivery_partner == Some(actor_id),
            ShopOrderStatus::Cancelled => actor_id == self.customer_id || actor_id == self.owner_id,
            ShopOrderStatus::Pending => false,
        };

        if allowed {
            return Ok(());
        }
        let who = match to {
            ShopOrderStatus::Delivered => "the assigned delivery partner",
            ShopOrderStatus::Cancelled => "the customer or the shop owner",
            _ => "the shop owner",
        };
        Err(OrderError::Forbidden(format!("Only {who} can mark this order '{to}'")))
    }

    fn decide_status_change(
        &self,
        to: ShopOrderStatus,
        actor_id: Uuid,
        reason: Option<&str>,
        otp: Option<&OtpDraft>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ShopOrderEvent>, OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { from: self.status, to });
        }
        self.authorize_status_change(to, actor_id)?;
        if to == ShopOrderStatus::Preparing && self.awaiting_payment {
            return Err(OrderError::Precondition(
                "The customer's online payment has not been confirmed yet".into(),
            ));
        }

        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let mut events = Vec::with_capacity(2);
        let changed = |reason: Option<&str>| {
            ShopOrderEvent::StatusChanged(StatusChanged {
                from: self.status,
                to,
                actor_id,
                reason: reason.map(str::to_string),
                changed_at: at,
            })
        };

        match to {
            ShopOrderStatus::OutOfDelivery => {
                if self.assigned_delivery_partner.is_none() {
                    return Err(OrderError::Precondition(
                        "A delivery partner must accept the order before it can go out for delivery".into(),
                    ));
                }
                let draft = otp.ok_or_else(|| {
                    OrderError::Validation("dispatching an order requires a delivery OTP".into())
                })?;
                events.push(changed(reason));
                events.push(ShopOrderEvent::OtpIssued(OtpIssued {
                    otp: DeliveryOtp::from_draft(draft, self.next_otp_version()),
                }));
            }
            ShopOrderStatus::Delivered => {
                if !self.otp_verified() {
                    return Err(OrderError::Precondition(
                        "The delivery OTP must be verified before the order is marked delivered".into(),
                    ));
                }
                events.push(changed(reason));
            }
            ShopOrderStatus::Cancelled => {
                let reason = reason.ok_or_else(|| OrderError::Validation("a cancellation reason is required".into()))?;
                events.push(changed(Some(reason)));
                if let Some(partner_id) = self.assigned_delivery_partner {
                    events.push(ShopOrderEvent::PartnerReleased(PartnerReleased {
                        partner_id,
                        released_at: at,
                    }));
                }
            }
            _ => events.push(changed(reason)),
        }

        Ok(events)
    }

    fn decide_accept(&self, partner_id: Uuid, at: DateTime<Utc>) -> Result<Vec<ShopOrderEvent>, OrderError> {
        match self.assigned_delivery_partner {
            Some(current) if current == partner_id => {
                return Err(OrderError::Conflict("You have already accepted this order".into()));
            }
            Some(_) => {
                return Err(OrderError::Conflict(
                    "This order was already picked up by another partner".into(),
                ));
            }
            None => {}
        }
        if self.status != ShopOrderStatus::Ready {
            return Err(OrderError::Precondition(format!(
                "Order is '{}' and is not waiting for a delivery partner",
                self.status
            )));
        }

        Ok(vec![ShopOrderEvent::PartnerAssigned(PartnerAssigned {
            partner_id,
            assigned_at: at,
        })])
    }

    fn decide_issue_otp(&self, actor_id: Uuid, draft: &OtpDraft) -> Result<Vec<ShopOrderEvent>, OrderError> {
        if self.status != ShopOrderStatus::OutOfDelivery {
            return Err(OrderError::Precondition(
                "A delivery OTP can only be sent while the order is out for delivery".into(),
            ));
        }
        if actor_id != self.customer_id && self.assigned_delivery_partner != Some(actor_id) {
            return Err(OrderError::Forbidden(
                "Only the customer or the assigned delivery partner can request an OTP".into(),
            ));
        }
        if self.otp_verified() {
            return Err(OrderError::Precondition("Delivery has already been confirmed".into()));
        }

        Ok(vec![ShopOrderEvent::OtpIssued(OtpIssued {
            otp: DeliveryOtp::from_draft(draft, self.next_otp_version()),
        })])
    }

    fn decide_settle_payment(&self, at: DateTime<Utc>) -> Result<Vec<ShopOrderEvent>, OrderError> {
        if !self.awaiting_payment {
            return Err(OrderError::Precondition("This order has already been paid".into()));
        }
        Ok(vec![ShopOrderEvent::PaymentSettled(PaymentSettled { settled_at: at })])
    }

    fn decide_verify_otp(
        &self,
        actor_id: Uuid,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ShopOrderEvent>, OrderError> {
        if self.assigned_delivery_partner != Some(actor_id) {
            return Err(OrderError::Forbidden(
                "Only the assigned delivery partner can confirm delivery".into(),
            ));
        }
        if self.status == ShopOrderStatus::Cancelled {
            return Err(OrderError::Precondition("This order has been cancelled".into()));
        }
        let otp = self.delivery_otp.as_ref().ok_or(OtpError::NotIssued)?;
        otp.check(code, at)?;

        Ok(vec![ShopOrderEvent::OtpVerified(OtpVerified {
            otp_version: otp.version,
            verified_at: at,
        })])
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for ShopOrder {
    type Event = ShopOrderEvent;
    type Command = ShopOrderCommand;
    type Error = OrderError;

    fn apply_first_event(event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            ShopOrderEvent::Created(e) => Ok(Self {
                id: e.shop_order_id,
                order_id: e.order_id,
                version: 1,
                customer_id: e.customer_id,
                shop_id: e.shop_id,
                shop_name: e.shop_name.clone(),
                shop_location: e.shop_location,
                owner_id: e.owner_id,
                delivery_address: e.delivery_address.clone(),
                items: e.items.clone(),
                subtotal: e.subtotal,
                status: ShopOrderStatus::Pending,
                awaiting_payment: e.awaiting_payment,
                assigned_delivery_partner: None,
                delivery_otp: None,
                cancellation_reason: None,
                created_at: e.created_at,
                updated_at: e.created_at,
                delivered_at: None,
            }),
            _ => Err(OrderError::Internal(anyhow::anyhow!(
                "shop order history must start with a creation event"
            ))),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ShopOrderEvent::Created(_) => {
                return Err(OrderError::Internal(anyhow::anyhow!(
                    "shop order {} was created twice",
                    self.id
                )));
            }
            ShopOrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = e.changed_at;
                match e.to {
                    ShopOrderStatus::Cancelled => self.cancellation_reason = e.reason.clone(),
                    ShopOrderStatus::Delivered => self.delivered_at = Some(e.changed_at),
                    _ => {}
                }
            }
            ShopOrderEvent::PartnerAssigned(e) => {
                self.assigned_delivery_partner = Some(e.partner_id);
                self.updated_at = e.assigned_at;
            }
            ShopOrderEvent::PartnerReleased(e) => {
                self.assigned_delivery_partner = None;
                self.updated_at = e.released_at;
            }
            ShopOrderEvent::OtpIssued(e) => {
                self.delivery_otp = Some(e.otp.clone());
                self.updated_at = e.otp.issued_at;
            }
            ShopOrderEvent::OtpVerified(e) => {
                let otp = self
                    .delivery_otp
                    .as_mut()
                    .filter(|otp| otp.version == e.otp_version)
                    .ok_or_else(|| {
                        OrderError::Internal(anyhow::anyhow!(
                            "verified OTP version {} is not the current code",
                            e.otp_version
                        ))
                    })?;
                otp.consumed_at = Some(e.verified_at);
                self.updated_at = e.verified_at;
            }
            ShopOrderEvent::PaymentSettled(e) => {
                self.awaiting_payment = false;
                self.updated_at = e.settled_at;
            }
        }

        self.version += 1;
        Ok(())
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShopOrderCommand::ChangeStatus {
                to,
                actor_id,
                reason,
                otp,
                at,
            } => self.decide_status_change(*to, *actor_id, reason.as_deref(), otp.as_ref(), *at),
            ShopOrderCommand::AcceptAssignment { partner_id, at } => self.decide_accept(*partner_id, *at),
            ShopOrderCommand::IssueOtp { actor_id, otp } => self.decide_issue_otp(*actor_id, otp),
            ShopOrderCommand::VerifyOtp { actor_id, code, at } => self.decide_verify_otp(*actor_id, code, *at),
            ShopOrderCommand::SettlePayment { at } => self.decide_settle_payment(*at),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
