use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::order::GeoPoint;

/// Last known position of a delivery partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerPosition {
    pub partner_id: Uuid,
    pub location: GeoPoint,
    pub updated_at: DateTime<Utc>,
}

/// Availability and location of delivery partners. Owned by another
/// subsystem; the matcher only asks it for candidates.
#[async_trait]
pub trait PartnerDirectory: Send + Sync {
    /// Available partners whose last known position is within `radius_km`
    async fn find_candidates(&self, around: GeoPoint, radius_km: f64) -> anyhow::Result<Vec<PartnerPosition>>;

    async fn record_location(&self, partner_id: Uuid, location: GeoPoint, at: DateTime<Utc>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct PartnerRecord {
    available: bool,
    position: Option<(GeoPoint, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct InMemoryPartnerDirectory {
    partners: RwLock<HashMap<Uuid, PartnerRecord>>,
}

impl InMemoryPartnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an available partner at `location`
    pub async fn register(&self, partner_id: Uuid, location: GeoPoint, at: DateTime<Utc>) {
        self.partners.write().await.insert(
            partner_id,
            PartnerRecord {
                available: true,
                position: Some((location, at)),
            },
        );
    }

    pub async fn set_available(&self, partner_id: Uuid, available: bool) {
        self.partners
            .write()
            .await
            .entry(partner_id)
            .or_insert(PartnerRecord {
                available,
                position: None,
            })
            .available = available;
    }
}

#[async_trait]
impl PartnerDirectory for InMemoryPartnerDirectory {
    async fn find_candidates(&self, around: GeoPoint, radius_km: f64) -> anyhow::Result<Vec<PartnerPosition>> {
        let partners = self.partners.read().await;
        Ok(partners
            .iter()
            .filter(|(_, record)| record.available)
            .filter_map(|(id, record)| {
                record.position.map(|(location, updated_at)| PartnerPosition {
                    partner_id: *id,
                    location,
                    updated_at,
                })
            })
            .filter(|p| around.distance_km(&p.location) <= radius_km)
            .collect())
    }

    async fn record_location(&self, partner_id: Uuid, location: GeoPoint, at: DateTime<Utc>) -> anyhow::Result<()> {
        if !location.is_valid() {
            anyhow::bail!("invalid coordinates ({}, {})", location.lat, location.lng);
        }
        // unknown partners are tracked but stay unavailable until switched on
        self.partners
            .write()
            .await
            .entry(partner_id)
            .or_insert(PartnerRecord {
                available: false,
                position: None,
            })
            .position = Some((location, at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_available_partners_in_radius() {
        let directory = InMemoryPartnerDirectory::new();
        let shop = GeoPoint::new(28.6139, 77.2090);
        let now = Utc::now();

        let close = Uuid::new_v4();
        let off_shift = Uuid::new_v4();
        let far = Uuid::new_v4();
        directory.register(close, GeoPoint::new(28.6200, 77.2100), now).await;
        directory.register(off_shift, GeoPoint::new(28.6150, 77.2095), now).await;
        directory.set_available(off_shift, false).await;
        directory.register(far, GeoPoint::new(28.4595, 77.0266), now).await;

        let found = directory.find_candidates(shop, 5.0).await.unwrap();
        assert_eq!(found.iter().map(|p| p.partner_id).collect::<Vec<_>>(), vec![close]);
    }

    #[tokio::test]
    async fn test_location_updates_move_partner() {
        let directory = InMemoryPartnerDirectory::new();
        let partner = Uuid::new_v4();
        let shop = GeoPoint::new(19.0760, 72.8777);
        directory.register(partner, GeoPoint::new(18.5204, 73.8567), Utc::now()).await;
        assert!(directory.find_candidates(shop, 5.0).await.unwrap().is_empty());

        directory.record_location(partner, GeoPoint::new(19.0800, 72.8800), Utc::now()).await.unwrap();
        assert_eq!(directory.find_candidates(shop, 5.0).await.unwrap().len(), 1);

        assert!(directory.record_location(partner, GeoPoint::new(91.0, 0.0), Utc::now()).await.is_err());
    }
}
