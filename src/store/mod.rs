// ============================================================================
// Order Store - persistence for orders and shop orders
// ============================================================================
//
// Writes to a shop order are compare-and-swap on its version, so two
// requests that decided against the same state cannot both commit. The
// in-memory store serves tests and the demo binary; ScyllaDB uses
// lightweight transactions for the same guarantee.
//
// ============================================================================

pub mod memory;
pub mod scylla_store;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Order, ShopOrder, ShopOrderEvent};
use crate::event_sourcing::core::EventEnvelope;
use crate::utils::IsTransient;

pub use memory::InMemoryOrderStore;
pub use scylla_store::ScyllaOrderStore;

pub type ShopOrderEnvelope = EventEnvelope<ShopOrderEvent>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} is at version {actual:?}, expected {expected}")]
    VersionConflict {
        entity: &'static str,
        id: Uuid,
        expected: i64,
        actual: Option<i64>,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// Run a store call with an upper bound on how long it may take.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(StoreError::Backend(anyhow::anyhow!("{operation} timed out after {limit:?}")))
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a freshly placed order and all its shop orders.
    /// `events` holds the creation event of every shop order.
    async fn insert_order(&self, order: &Order, events: &[ShopOrderEnvelope]) -> Result<(), StoreError>;

    /// Header plus every shop order
    async fn load_order(&self, order_id: Uuid) -> Result<Order, StoreError>;

    async fn load_shop_order(&self, shop_order_id: Uuid) -> Result<ShopOrder, StoreError>;

    /// Replace the shop order if it is still at `expected_version` and append
    /// `events` to its history.
    async fn save_shop_order(
        &self,
        shop_order: &ShopOrder,
        expected_version: i64,
        events: &[ShopOrderEnvelope],
    ) -> Result<(), StoreError>;

    /// Replace the header fields if the header is still at `expected_version`
    async fn save_order_header(&self, order: &Order, expected_version: i64) -> Result<(), StoreError>;

    /// Remove the order only if every shop order is still pending.
    /// Returns false when some shop order has moved on.
    async fn delete_order_if_pending(&self, order_id: Uuid) -> Result<bool, StoreError>;

    /// Newest first
    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StoreError>;

    /// Newest first
    async fn shop_orders_for_owner(&self, owner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError>;

    /// Newest first
    async fn shop_orders_for_partner(&self, partner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError>;

    async fn shop_order_history(&self, shop_order_id: Uuid) -> Result<Vec<ShopOrderEnvelope>, StoreError>;
}
