use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::partners::PartnerPosition;
use crate::domain::order::{DeliveryAddress, GeoPoint, ShopOrder};

/// A delivery partner eligible for an offer, with distance to the shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub partner_id: Uuid,
    pub distance_km: f64,
    pub location_updated_at: DateTime<Utc>,
}

/// Pickup broadcast to every candidate of one shop order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentOffer {
    pub offer_id: Uuid,
    pub shop_order_id: Uuid,
    pub order_id: Uuid,
    pub shop_id: Uuid,
    pub shop_name: String,
    pub shop_location: GeoPoint,
    pub delivery_address: DeliveryAddress,
    pub subtotal: Decimal,
    /// Not sent over the wire; partners do not see each other
    #[serde(skip)]
    pub candidates: Vec<Candidate>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AssignmentOffer {
    pub fn for_shop_order(
        shop_order: &ShopOrder,
        candidates: Vec<Candidate>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            offer_id: Uuid::now_v7(),
            shop_order_id: shop_order.id,
            order_id: shop_order.order_id,
            shop_id: shop_order.shop_id,
            shop_name: shop_order.shop_name.clone(),
            shop_location: shop_order.shop_location,
            delivery_address: shop_order.delivery_address.clone(),
            subtotal: shop_order.subtotal,
            candidates,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn names(&self, partner_id: Uuid) -> bool {
        self.candidates.iter().any(|c| c.partner_id == partner_id)
    }
}

/// Partners within `radius_km` of `origin`, nearest first. Equal distances
/// go to whoever reported their location earliest.
pub fn rank_candidates(origin: GeoPoint, positions: Vec<PartnerPosition>, radius_km: f64) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = positions
        .into_iter()
        .filter(|p| p.location.is_valid())
        .map(|p| Candidate {
            partner_id: p.partner_id,
            distance_km: origin.distance_km(&p.location),
            location_updated_at: p.updated_at,
        })
        .filter(|c| c.distance_km <= radius_km)
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.location_updated_at.cmp(&b.location_updated_at))
            .then_with(|| a.partner_id.cmp(&b.partner_id))
    });
    candidates
}
