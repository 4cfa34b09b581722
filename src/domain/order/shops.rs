use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::value_objects::GeoPoint;

/// What order placement needs to know about a shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopProfile {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub location: GeoPoint,
}

/// Read access to the shop catalogue, owned by another subsystem.
#[async_trait]
pub trait ShopDirectory: Send + Sync {
    async fn shop(&self, shop_id: Uuid) -> anyhow::Result<Option<ShopProfile>>;
}

#[derive(Default)]
pub struct InMemoryShopDirectory {
    shops: RwLock<HashMap<Uuid, ShopProfile>>,
}

impl InMemoryShopDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, shop: ShopProfile) {
        self.shops.write().await.insert(shop.id, shop);
    }
}

#[async_trait]
impl ShopDirectory for InMemoryShopDirectory {
    async fn shop(&self, shop_id: Uuid) -> anyhow::Result<Option<ShopProfile>> {
        Ok(self.shops.read().await.get(&shop_id).cloned())
    }
}
