use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use futures_util::future::join_all;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::offer::{rank_candidates, AssignmentOffer, Candidate};
use super::partners::PartnerDirectory;
use crate::domain::order::{OrderError, ShopOrder, ShopOrderCommand, ShopOrderCommandHandler, ShopOrderStatus};
use crate::metrics::Metrics;
use crate::notify::{AssignmentAcceptedNotice, Audience, Dispatcher, Handoff, RealtimeEvent};
use crate::utils::Clock;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Search radius around the shop
    pub radius_km: f64,
    /// How long an offer can be accepted
    pub offer_ttl: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            radius_km: 5.0,
            offer_ttl: Duration::minutes(10),
        }
    }
}

// ============================================================================
// Assignment Matcher
// ============================================================================
//
// Finds nearby available partners for a ready shop order and broadcasts one
// offer to all of them. Acceptance is a conditional write on the shop order:
// the first partner to commit wins and everyone else gets a conflict, even
// if they read the order before the winner's write became visible.
//
// The offer book holds at most one open offer per shop order. It lives in
// memory; the shop order's assignment field is the durable outcome.
//
// ============================================================================

pub struct AssignmentMatcher {
    handler: Arc<ShopOrderCommandHandler>,
    partners: Arc<dyn PartnerDirectory>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: MatcherConfig,
    metrics: Arc<Metrics>,
    offers: RwLock<HashMap<Uuid, AssignmentOffer>>,
}

impl AssignmentMatcher {
    pub fn new(
        handler: Arc<ShopOrderCommandHandler>,
        partners: Arc<dyn PartnerDirectory>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: MatcherConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler,
            partners,
            dispatcher,
            clock,
            config,
            metrics,
            offers: RwLock::new(HashMap::new()),
        }
    }

    /// Offer the shop order to every eligible partner. An empty result is
    /// not an error; the owner can search again later.
    pub async fn find_and_notify_candidates(
        &self,
        shop_order_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<Vec<Candidate>, OrderError> {
        let shop_order = self.handler.load(shop_order_id).await?;
        if shop_order.assigned_delivery_partner.is_some() {
            tracing::debug!(shop_order_id = %shop_order_id, "Already assigned, skipping partner search");
            return Ok(Vec::new());
        }
        if shop_order.status != ShopOrderStatus::Ready {
            return Err(OrderError::Precondition(format!(
                "Delivery partners are searched once the order is ready, it is '{}'",
                shop_order.status
            )));
        }

        let positions = self
            .partners
            .find_candidates(shop_order.shop_location, self.config.radius_km)
            .await
            .map_err(OrderError::Internal)?;
        let candidates = rank_candidates(shop_order.shop_location, positions, self.config.radius_km);
        self.metrics.record_assignment_search(candidates.len());

        if candidates.is_empty() {
            tracing::info!(
                shop_order_id = %shop_order_id,
                radius_km = self.config.radius_km,
                "No delivery partners available nearby"
            );
            return Ok(candidates);
        }

        let now = self.clock.now();
        let offer = AssignmentOffer::for_shop_order(&shop_order, candidates.clone(), now, self.config.offer_ttl);
        {
            let mut offers = self.offers.write().await;
            offers.retain(|_, open| open.is_open_at(now));
            if offers.insert(shop_order_id, offer.clone()).is_some() {
                tracing::debug!(shop_order_id = %shop_order_id, "Previous offer superseded");
            }
        }

        tracing::info!(
            shop_order_id = %shop_order_id,
            candidates = candidates.len(),
            nearest_km = candidates[0].distance_km,
            "📣 Assignment offered"
        );

        let audiences: Vec<Audience> = candidates.iter().map(|c| Audience::DeliveryPartner(c.partner_id)).collect();
        self.dispatcher
            .emit(
                shop_order_id,
                shop_order.version,
                RealtimeEvent::AssignmentOffered(offer),
                &audiences,
                correlation_id,
            )
            .await;

        let alerts = candidates.iter().map(|candidate| {
            self.dispatcher.hand_off(Handoff::AssignmentAlert {
                recipient: candidate.partner_id,
                shop_order_id,
                message: format!(
                    "New pickup at {} ({:.1} km away)",
                    shop_order.shop_name, candidate.distance_km
                ),
            })
        });
        join_all(alerts).await;

        Ok(candidates)
    }

    /// First accept wins; every other accept for the same shop order fails
    /// with `Conflict`.
    pub async fn accept_assignment(
        &self,
        shop_order_id: Uuid,
        partner_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<ShopOrder, OrderError> {
        let now = self.clock.now();
        let offer = self.offers.read().await.get(&shop_order_id).cloned();

        let offer = match offer {
            Some(offer) => offer,
            None => {
                let current = self.handler.load(shop_order_id).await?;
                if current.assigned_delivery_partner.is_some() {
                    self.metrics.record_assignment_accept(false);
                    return Err(lost_race(&current, partner_id));
                }
                return Err(OrderError::Precondition(
                    "There is no open delivery offer for this order".into(),
                ));
            }
        };
        if !offer.is_open_at(now) {
            return Err(OrderError::Precondition("This delivery offer has expired".into()));
        }
        if !offer.names(partner_id) {
            return Err(OrderError::Forbidden("This delivery offer was not sent to you".into()));
        }

        let command = ShopOrderCommand::AcceptAssignment { partner_id, at: now };
        let committed = match self.handler.handle(shop_order_id, command, partner_id, correlation_id).await {
            Ok(committed) => committed,
            Err(OrderError::Conflict(_)) => {
                self.metrics.record_assignment_accept(false);
                return Err(self.explain_lost_race(shop_order_id, partner_id).await);
            }
            Err(e) => return Err(e),
        };
        self.metrics.record_assignment_accept(true);

        {
            let mut offers = self.offers.write().await;
            if offers.get(&shop_order_id).is_some_and(|open| open.offer_id == offer.offer_id) {
                offers.remove(&shop_order_id);
            }
        }

        let accepted = committed.after;
        tracing::info!(
            shop_order_id = %shop_order_id,
            partner_id = %partner_id,
            "🛵 Delivery partner assigned"
        );

        self.dispatcher
            .emit(
                shop_order_id,
                accepted.version,
                RealtimeEvent::AssignmentAccepted(AssignmentAcceptedNotice {
                    order_id: accepted.order_id,
                    shop_order_id,
                    partner_id,
                    accepted_at: now,
                }),
                &[Audience::Customer(accepted.customer_id), Audience::Owner(accepted.owner_id)],
                correlation_id,
            )
            .await;

        Ok(accepted)
    }

    async fn explain_lost_race(&self, shop_order_id: Uuid, partner_id: Uuid) -> OrderError {
        match self.handler.load(shop_order_id).await {
            Ok(current) => lost_race(&current, partner_id),
            Err(e) => e,
        }
    }

    /// Drop the open offer, e.g. when the shop order is cancelled
    pub async fn withdraw_offer(&self, shop_order_id: Uuid) -> bool {
        self.offers.write().await.remove(&shop_order_id).is_some()
    }

    /// Open offers naming `partner_id`, newest first
    pub async fn open_offers_for(&self, partner_id: Uuid) -> Vec<AssignmentOffer> {
        let now = self.clock.now();
        let mut found: Vec<AssignmentOffer> = self
            .offers
            .read()
            .await
            .values()
            .filter(|offer| offer.is_open_at(now) && offer.names(partner_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}

fn lost_race(current: &ShopOrder, partner_id: Uuid) -> OrderError {
    match current.assigned_delivery_partner {
        Some(winner) if winner == partner_id => OrderError::Conflict("You have already accepted this order".into()),
        Some(_) => OrderError::Conflict("This order was already picked up by another partner".into()),
        None => OrderError::Conflict("This order changed while you were accepting it, please try again".into()),
    }
}
