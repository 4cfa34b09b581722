use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderStore, ShopOrderEnvelope, StoreError};
use crate::domain::order::{Order, ShopOrder, ShopOrderStatus};

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// One lock over all tables, so every compare-and-swap and its history append
// happen as a single step.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Headers, stored without shop orders
    orders: HashMap<Uuid, Order>,
    /// order id -> shop order ids in placement order
    shop_order_ids: HashMap<Uuid, Vec<Uuid>>,
    shop_orders: HashMap<Uuid, ShopOrder>,
    history: HashMap<Uuid, Vec<ShopOrderEnvelope>>,
}

impl Inner {
    fn assemble(&self, header: &Order) -> Order {
        let mut order = header.clone();
        order.shop_orders = self
            .shop_order_ids
            .get(&header.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.shop_orders.get(id).cloned())
            .collect();
        order
    }

    fn shop_orders_where<F>(&self, keep: F) -> Vec<ShopOrder>
    where
        F: Fn(&ShopOrder) -> bool,
    {
        let mut found: Vec<ShopOrder> = self.shop_orders.values().filter(|so| keep(*so)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        found
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: &Order, events: &[ShopOrderEnvelope]) -> Result<(), StoreError> {
        if order.shop_orders.is_empty() {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "order {} has no shop orders",
                order.id
            )));
        }

        let mut inner = self.inner.write().await;
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::VersionConflict {
                entity: "order",
                id: order.id,
                expected: 0,
                actual: inner.orders.get(&order.id).map(|o| o.version),
            });
        }

        inner.orders.insert(order.id, order.header());
        inner
            .shop_order_ids
            .insert(order.id, order.shop_orders.iter().map(|so| so.id).collect());
        for shop_order in &order.shop_orders {
            inner.shop_orders.insert(shop_order.id, shop_order.clone());
        }
        for envelope in events {
            inner
                .history
                .entry(envelope.aggregate_id)
                .or_default()
                .push(envelope.clone());
        }
        Ok(())
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order, StoreError> {
        let inner = self.inner.read().await;
        let header = inner
            .orders
            .get(&order_id)
            .ok_or(StoreError::NotFound { entity: "order", id: order_id })?;
        Ok(inner.assemble(header))
    }

    async fn load_shop_order(&self, shop_order_id: Uuid) -> Result<ShopOrder, StoreError> {
        self.inner
            .read()
            .await
            .shop_orders
            .get(&shop_order_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "shop order",
                id: shop_order_id,
            })
    }

    async fn save_shop_order(
        &self,
        shop_order: &ShopOrder,
        expected_version: i64,
        events: &[ShopOrderEnvelope],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.shop_orders.get(&shop_order.id).ok_or(StoreError::NotFound {
            entity: "shop order",
            id: shop_order.id,
        })?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "shop order",
                id: shop_order.id,
                expected: expected_version,
                actual: Some(current.version),
            });
        }

        inner.shop_orders.insert(shop_order.id, shop_order.clone());
        inner
            .history
            .entry(shop_order.id)
            .or_default()
            .extend(events.iter().cloned());
        Ok(())
    }

    async fn save_order_header(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .orders
            .get(&order.id)
            .ok_or(StoreError::NotFound { entity: "order", id: order.id })?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "order",
                id: order.id,
                expected: expected_version,
                actual: Some(current.version),
            });
        }

        inner.orders.insert(order.id, order.header());
        Ok(())
    }

    async fn delete_order_if_pending(&self, order_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let ids = inner
            .shop_order_ids
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "order", id: order_id })?;

        let all_pending = ids.iter().all(|id| {
            inner
                .shop_orders
                .get(id)
                .is_some_and(|so| so.status == ShopOrderStatus::Pending)
        });
        if !all_pending {
            return Ok(false);
        }

        inner.orders.remove(&order_id);
        inner.shop_order_ids.remove(&order_id);
        for id in &ids {
            inner.shop_orders.remove(id);
            inner.history.remove(id);
        }
        Ok(true)
    }

    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .map(|header| inner.assemble(header))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn shop_orders_for_owner(&self, owner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        Ok(self.inner.read().await.shop_orders_where(|so| so.owner_id == owner_id))
    }

    async fn shop_orders_for_partner(&self, partner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .shop_orders_where(|so| so.assigned_delivery_partner == Some(partner_id)))
    }

    async fn shop_order_history(&self, shop_order_id: Uuid) -> Result<Vec<ShopOrderEnvelope>, StoreError> {
        let inner = self.inner.read().await;
        if !inner.shop_orders.contains_key(&shop_order_id) {
            return Err(StoreError::NotFound {
                entity: "shop order",
                id: shop_order_id,
            });
        }
        Ok(inner.history.get(&shop_order_id).cloned().unwrap_or_default())
    }
}
