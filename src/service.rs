use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::domain::assignment::{AssignmentMatcher, AssignmentOffer, Candidate, PartnerDirectory};
use crate::domain::order::{
    Committed, GeoPoint, Order, OrderError, PaymentMethod, PlaceOrder, Role, ShopDirectory, ShopOrder,
    ShopOrderCommand, ShopOrderCommandHandler, ShopOrderStatus, ShopProfile,
};
use crate::domain::otp::{DeliveryOtp, OtpGate};
use crate::event_sourcing::core::EventEnvelope;
use crate::metrics::Metrics;
use crate::notify::{
    Audience, Dispatcher, LocationNotice, Mailer, NewOrderNotice, Notifier, RealtimeEvent, StatusChangeNotice,
};
use crate::store::{bounded, OrderStore, ShopOrderEnvelope, StoreError};
use crate::utils::{retry_on_transient, Clock, RetryConfig};

// ============================================================================
// Order Service - inbound command facade
// ============================================================================
//
// One method per inbound command. Each method commits its write first and
// only then fans out notifications and hand-offs through the dispatcher, so
// a broken notifier can delay nothing and undo nothing.
//
// ============================================================================

/// Everything the service talks to outside its own domain
pub struct Collaborators {
    pub store: Arc<dyn OrderStore>,
    pub shops: Arc<dyn ShopDirectory>,
    pub partners: Arc<dyn PartnerDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
}

/// Role-scoped listing, newest first
#[derive(Debug, Clone)]
pub enum ActorOrders {
    Customer(Vec<Order>),
    Owner(Vec<ShopOrder>),
    DeliveryPartner {
        assigned: Vec<ShopOrder>,
        offered: Vec<AssignmentOffer>,
    },
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    shops: Arc<dyn ShopDirectory>,
    partners: Arc<dyn PartnerDirectory>,
    handler: Arc<ShopOrderCommandHandler>,
    matcher: AssignmentMatcher,
    otp: OtpGate,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    store_timeout: Duration,
}

impl OrderService {
    pub fn new(collaborators: Collaborators, config: &ServiceConfig) -> Self {
        let Collaborators {
            store,
            shops,
            partners,
            notifier,
            mailer,
            clock,
            metrics,
        } = collaborators;

        let handler = Arc::new(ShopOrderCommandHandler::new(
            store.clone(),
            config.timeouts.store,
            metrics.clone(),
        ));
        let dispatcher = Dispatcher::new(notifier, mailer, config.timeouts.notify, metrics.clone());
        let matcher = AssignmentMatcher::new(
            handler.clone(),
            partners.clone(),
            dispatcher.clone(),
            clock.clone(),
            config.matcher.clone(),
            metrics.clone(),
        );
        let otp = OtpGate::new(
            handler.clone(),
            dispatcher.clone(),
            clock.clone(),
            config.otp.clone(),
            metrics.clone(),
        );

        Self {
            store,
            shops,
            partners,
            handler,
            matcher,
            otp,
            dispatcher,
            clock,
            metrics,
            store_timeout: config.timeouts.store,
        }
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Split the cart into one shop order per shop and persist everything in
    /// one write. Owners hear about cash orders right away and about online
    /// orders once the payment is confirmed.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<Order, OrderError> {
        let result = self.place_order_inner(request).await;
        self.observe("place_order", result)
    }

    async fn place_order_inner(&self, request: PlaceOrder) -> Result<Order, OrderError> {
        request.validate()?;
        let correlation_id = Uuid::new_v4();

        let mut profiles: HashMap<Uuid, ShopProfile> = HashMap::new();
        for item in &request.items {
            if profiles.contains_key(&item.shop_id) {
                continue;
            }
            let profile = self
                .shops
                .shop(item.shop_id)
                .await
                .map_err(OrderError::Internal)?
                .ok_or_else(|| OrderError::not_found("shop", item.shop_id))?;
            profiles.insert(item.shop_id, profile);
        }

        let placed = Order::place(&request, &profiles, self.clock.now())?;
        let order = placed.order;
        let envelopes: Vec<ShopOrderEnvelope> = order
            .shop_orders
            .iter()
            .zip(placed.events)
            .map(|(so, event)| EventEnvelope::new(so.id, 1, event, correlation_id).with_user(order.customer_id))
            .collect();

        bounded(self.store_timeout, "insert_order", self.store.insert_order(&order, &envelopes)).await?;
        self.metrics.record_order_placed(order.payment_method.as_str());

        tracing::info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            shop_orders = order.shop_orders.len(),
            total = %order.total_amount,
            payment_method = order.payment_method.as_str(),
            "🧾 Order placed"
        );

        if order.payment_method == PaymentMethod::Cod {
            self.announce_new_order(&order, correlation_id).await;
        } else {
            tracing::debug!(order_id = %order.id, "Holding owner notifications until payment is confirmed");
        }

        Ok(order)
    }

    /// Mark an online order paid and release it to the shop owners
    pub async fn confirm_payment(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let result = async {
            let current = self.load_order(order_id).await?;
            let mut paid = current.confirm_payment()?;
            let correlation_id = Uuid::new_v4();

            // shop orders first; a retry after a lost header race skips them
            for shop_order in paid.shop_orders.iter_mut().filter(|so| so.awaiting_payment) {
                *shop_order = self.settle_payment(shop_order.id, current.customer_id, correlation_id).await?;
            }
            self.save_header(&paid, current.version).await?;

            tracing::info!(order_id = %order_id, "💳 Payment confirmed");
            self.announce_new_order(&paid, correlation_id).await;
            Ok::<_, OrderError>(paid)
        }
        .await;
        self.observe("confirm_payment", result)
    }

    /// Lift the payment hold on one shop order so its owner can start on it
    async fn settle_payment(
        &self,
        shop_order_id: Uuid,
        customer_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<ShopOrder, OrderError> {
        let committed = retry_on_transient(RetryConfig::for_conflicts(), |_| {
            let command = ShopOrderCommand::SettlePayment { at: self.clock.now() };
            self.handler.handle(shop_order_id, command, customer_id, correlation_id)
        })
        .await
        .into_result()?;
        Ok(committed.after)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let result = self.load_order(order_id).await;
        self.observe("get_order", result)
    }

    pub async fn get_shop_order(&self, shop_order_id: Uuid) -> Result<ShopOrder, OrderError> {
        let result = self.handler.load(shop_order_id).await;
        self.observe("get_shop_order", result)
    }

    /// Customers get whole orders, owners their shop orders, delivery
    /// partners what they are assigned to plus the offers naming them.
    pub async fn list_orders_for_actor(&self, actor_id: Uuid, role: Role) -> Result<ActorOrders, OrderError> {
        let result = async {
            let listing = match role {
                Role::Customer => ActorOrders::Customer(
                    bounded(self.store_timeout, "orders_for_customer", self.store.orders_for_customer(actor_id))
                        .await?,
                ),
                Role::Owner => ActorOrders::Owner(
                    bounded(self.store_timeout, "shop_orders_for_owner", self.store.shop_orders_for_owner(actor_id))
                        .await?,
                ),
                Role::DeliveryPartner => ActorOrders::DeliveryPartner {
                    assigned: bounded(
                        self.store_timeout,
                        "shop_orders_for_partner",
                        self.store.shop_orders_for_partner(actor_id),
                    )
                    .await?,
                    offered: self.matcher.open_offers_for(actor_id).await,
                },
            };
            Ok::<_, OrderError>(listing)
        }
        .await;
        self.observe("list_orders_for_actor", result)
    }

    /// Delete an order nobody has started working on yet
    pub async fn delete_order(&self, order_id: Uuid, actor_id: Uuid) -> Result<(), OrderError> {
        let result = async {
            let order = self.load_order(order_id).await?;
            if order.customer_id != actor_id {
                return Err(OrderError::Forbidden(
                    "Only the customer who placed the order can delete it".into(),
                ));
            }

            let started = || OrderError::Conflict("Only orders that are still pending can be deleted".into());
            if !order.all_pending() {
                return Err(started());
            }
            let deleted = bounded(
                self.store_timeout,
                "delete_order_if_pending",
                self.store.delete_order_if_pending(order_id),
            )
            .await?;
            if !deleted {
                self.metrics.record_store_conflict("order");
                return Err(started());
            }

            tracing::info!(order_id = %order_id, "🗑️ Pending order deleted");
            Ok::<_, OrderError>(())
        }
        .await;
        self.observe("delete_order", result)
    }

    /// Cancel every shop order of the order that has not finished yet
    pub async fn cancel_order(&self, order_id: Uuid, actor_id: Uuid, reason: &str) -> Result<Order, OrderError> {
        let result = async {
            let order = self.load_order(order_id).await?;
            if order.customer_id != actor_id {
                return Err(OrderError::Forbidden(
                    "Only the customer who placed the order can cancel all of it".into(),
                ));
            }
            if reason.trim().is_empty() {
                return Err(OrderError::Validation("a cancellation reason is required".into()));
            }

            let correlation_id = Uuid::new_v4();
            for shop_order in order.shop_orders.iter().filter(|so| !so.status.is_terminal()) {
                let outcome = self
                    .change_status(
                        shop_order.id,
                        ShopOrderStatus::Cancelled,
                        actor_id,
                        Some(reason.to_string()),
                        correlation_id,
                    )
                    .await;

                match outcome {
                    Ok(_) => {}
                    // Finished while we were cancelling the others
                    Err(OrderError::InvalidTransition { from, .. }) if from.is_terminal() => {
                        tracing::debug!(shop_order_id = %shop_order.id, status = %from, "Skipping finished shop order");
                    }
                    Err(e) => return Err(e),
                }
            }

            self.load_order(order_id).await
        }
        .await;
        self.observe("cancel_order", result)
    }

    pub async fn rate_order(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        stars: u8,
        review: Option<String>,
    ) -> Result<Order, OrderError> {
        let result = async {
            let current = self.load_order(order_id).await?;
            let rated = current.rate(actor_id, stars, review, self.clock.now())?;
            self.save_header(&rated, current.version).await?;

            tracing::info!(order_id = %order_id, stars, "⭐ Order rated");
            Ok::<_, OrderError>(rated)
        }
        .await;
        self.observe("rate_order", result)
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    pub async fn transition(
        &self,
        shop_order_id: Uuid,
        to: ShopOrderStatus,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<ShopOrder, OrderError> {
        let result = self.change_status(shop_order_id, to, actor_id, reason, Uuid::new_v4()).await;
        self.observe("transition", result)
    }

    /// Cancel a single shop order
    pub async fn cancel(&self, shop_order_id: Uuid, actor_id: Uuid, reason: &str) -> Result<ShopOrder, OrderError> {
        self.transition(shop_order_id, ShopOrderStatus::Cancelled, actor_id, Some(reason.to_string()))
            .await
    }

    async fn change_status(
        &self,
        shop_order_id: Uuid,
        to: ShopOrderStatus,
        actor_id: Uuid,
        reason: Option<String>,
        correlation_id: Uuid,
    ) -> Result<ShopOrder, OrderError> {
        let command = ShopOrderCommand::ChangeStatus {
            to,
            actor_id,
            reason,
            otp: (to == ShopOrderStatus::OutOfDelivery).then(|| self.otp.draft()),
            at: self.clock.now(),
        };
        let committed = self.handler.handle(shop_order_id, command, actor_id, correlation_id).await?;
        self.after_transition(&committed, correlation_id).await;
        Ok(committed.after)
    }

    async fn after_transition(&self, committed: &Committed, correlation_id: Uuid) {
        let Committed { before, after, .. } = committed;
        let (from, to) = (before.status, after.status);
        self.metrics.record_transition(from.as_str(), to.as_str());

        tracing::info!(
            shop_order_id = %after.id,
            order_id = %after.order_id,
            from = %from,
            to = %to,
            version = after.version,
            "🔄 Shop order status changed"
        );

        let mut audiences = vec![Audience::Customer(after.customer_id), Audience::Owner(after.owner_id)];
        // A cancelled order has already released its partner
        if let Some(partner_id) = before.assigned_delivery_partner.or(after.assigned_delivery_partner) {
            audiences.push(Audience::DeliveryPartner(partner_id));
        }

        let notice = StatusChangeNotice {
            order_id: after.order_id,
            shop_order_id: after.id,
            shop_id: after.shop_id,
            from,
            to,
            reason: after.cancellation_reason.clone(),
            assigned_delivery_partner: after.assigned_delivery_partner,
            changed_at: after.updated_at,
        };
        self.dispatcher
            .emit(
                after.id,
                after.version,
                RealtimeEvent::StatusChanged(notice),
                &audiences,
                correlation_id,
            )
            .await;

        match to {
            ShopOrderStatus::Ready if after.assigned_delivery_partner.is_none() => {
                if let Err(e) = self.matcher.find_and_notify_candidates(after.id, correlation_id).await {
                    tracing::warn!(shop_order_id = %after.id, error = %e, "Partner search after ready failed");
                }
            }
            ShopOrderStatus::OutOfDelivery => {
                self.otp.hand_off(after).await;
            }
            ShopOrderStatus::Cancelled => {
                if self.matcher.withdraw_offer(after.id).await {
                    tracing::debug!(shop_order_id = %after.id, "Open assignment offer withdrawn");
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Search again for partners, e.g. after an empty search or an expired offer
    pub async fn find_delivery_partners(
        &self,
        shop_order_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Vec<Candidate>, OrderError> {
        let result = async {
            let shop_order = self.handler.load(shop_order_id).await?;
            if shop_order.owner_id != actor_id {
                return Err(OrderError::Forbidden(
                    "Only the shop owner can search for delivery partners".into(),
                ));
            }
            self.matcher.find_and_notify_candidates(shop_order_id, Uuid::new_v4()).await
        }
        .await;
        self.observe("find_delivery_partners", result)
    }

    pub async fn accept_assignment(&self, shop_order_id: Uuid, partner_id: Uuid) -> Result<ShopOrder, OrderError> {
        let result = self
            .matcher
            .accept_assignment(shop_order_id, partner_id, Uuid::new_v4())
            .await;
        self.observe("accept_assignment", result)
    }

    /// Location ping from a delivery partner. Customers of the orders the
    /// partner is carrying get a `locationUpdated`. Returns how many.
    pub async fn record_partner_location(&self, partner_id: Uuid, location: GeoPoint) -> Result<usize, OrderError> {
        let result = async {
            if !location.is_valid() {
                return Err(OrderError::Validation(format!(
                    "invalid coordinates ({}, {})",
                    location.lat, location.lng
                )));
            }

            let now = self.clock.now();
            self.partners
                .record_location(partner_id, location, now)
                .await
                .map_err(OrderError::Internal)?;

            let carrying: Vec<ShopOrder> = bounded(
                self.store_timeout,
                "shop_orders_for_partner",
                self.store.shop_orders_for_partner(partner_id),
            )
            .await?
            .into_iter()
            .filter(|so| so.status == ShopOrderStatus::OutOfDelivery)
            .collect();

            let correlation_id = Uuid::new_v4();
            for shop_order in &carrying {
                let notice = LocationNotice {
                    partner_id,
                    shop_order_id: shop_order.id,
                    location,
                    recorded_at: now,
                };
                self.dispatcher
                    .emit(
                        shop_order.id,
                        shop_order.version,
                        RealtimeEvent::LocationUpdated(notice),
                        &[Audience::Customer(shop_order.customer_id)],
                        correlation_id,
                    )
                    .await;
            }
            Ok::<_, OrderError>(carrying.len())
        }
        .await;
        self.observe("record_partner_location", result)
    }

    // ========================================================================
    // Delivery OTP
    // ========================================================================

    /// Issue a fresh code (resend). The previous code stops working.
    pub async fn issue_otp(&self, shop_order_id: Uuid, actor_id: Uuid) -> Result<DeliveryOtp, OrderError> {
        let result = self.otp.issue(shop_order_id, actor_id, Uuid::new_v4()).await;
        self.observe("issue_otp", result)
    }

    pub async fn verify_otp(&self, shop_order_id: Uuid, actor_id: Uuid, code: &str) -> Result<ShopOrder, OrderError> {
        let result = self.otp.verify(shop_order_id, actor_id, code, Uuid::new_v4()).await;
        self.observe("verify_otp", result)
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn shop_order_history(&self, shop_order_id: Uuid) -> Result<Vec<ShopOrderEnvelope>, OrderError> {
        let result = bounded(
            self.store_timeout,
            "shop_order_history",
            self.store.shop_order_history(shop_order_id),
        )
        .await
        .map_err(OrderError::from);
        self.observe("shop_order_history", result)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        Ok(bounded(self.store_timeout, "load_order", self.store.load_order(order_id)).await?)
    }

    async fn save_header(&self, order: &Order, expected_version: i64) -> Result<(), OrderError> {
        let saved = bounded(
            self.store_timeout,
            "save_order_header",
            self.store.save_order_header(order, expected_version),
        )
        .await;
        if let Err(StoreError::VersionConflict { .. }) = &saved {
            self.metrics.record_store_conflict("order");
        }
        Ok(saved?)
    }

    async fn announce_new_order(&self, order: &Order, correlation_id: Uuid) {
        for shop_order in order.shop_orders.iter().filter(|so| !so.status.is_terminal()) {
            self.dispatcher
                .emit(
                    shop_order.id,
                    shop_order.version,
                    RealtimeEvent::NewOrder(NewOrderNotice::for_shop_order(shop_order, order.payment_method)),
                    &[Audience::Owner(shop_order.owner_id)],
                    correlation_id,
                )
                .await;
        }
    }

    /// Count and log a failed command before it goes back to the caller
    fn observe<T>(&self, operation: &'static str, result: Result<T, OrderError>) -> Result<T, OrderError> {
        if let Err(e) = &result {
            self.metrics.record_rejection(operation, e.kind());
            match e {
                OrderError::Internal(source) => {
                    tracing::error!(operation, error = ?source, "❌ Command failed");
                }
                OrderError::Conflict(_) => {
                    tracing::warn!(operation, error = %e, "Command lost a race");
                }
                _ => {
                    tracing::debug!(operation, error = %e, "Command rejected");
                }
            }
        }
        result
    }
}
