use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::serialize::row::SerializeRow;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use uuid::Uuid;

use super::{OrderStore, ShopOrderEnvelope, StoreError};
use crate::domain::order::{Order, ShopOrder};
use crate::event_sourcing::core::{deserialize_event, serialize_event};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// ScyllaDB Order Store
// ============================================================================
//
// Tables:
// - orders              header document, keyed by order id
// - orders_by_customer  listing index, newest first
// - shop_orders         partitioned by order id so the pending-only delete
//                       can be one conditional batch
// - shop_order_index    shop order id -> order id
// - shop_order_events   append-only history per shop order
//
// Every write to `orders` and `shop_orders` is a lightweight transaction
// (`IF NOT EXISTS` / `IF version = ?`), which is what serializes concurrent
// transitions. History rows are appended after the conditional write
// succeeds; the shop order row is authoritative.
//
// An order is placed once its header row exists. Shop order rows written
// ahead of a header that never landed are ignored by every read and cleaned
// up on the failing path.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id uuid PRIMARY KEY,
        customer_id uuid,
        version bigint,
        created_at timestamp,
        shop_order_ids list<uuid>,
        document text
    )",
    "CREATE TABLE IF NOT EXISTS orders_by_customer (
        customer_id uuid,
        created_at timestamp,
        order_id uuid,
        PRIMARY KEY (customer_id, created_at, order_id)
    ) WITH CLUSTERING ORDER BY (created_at DESC, order_id DESC)",
    "CREATE TABLE IF NOT EXISTS shop_orders (
        order_id uuid,
        id uuid,
        version bigint,
        status text,
        owner_id uuid,
        assigned_partner uuid,
        created_at timestamp,
        document text,
        PRIMARY KEY (order_id, id)
    )",
    "CREATE INDEX IF NOT EXISTS shop_orders_by_owner ON shop_orders (owner_id)",
    "CREATE INDEX IF NOT EXISTS shop_orders_by_partner ON shop_orders (assigned_partner)",
    "CREATE TABLE IF NOT EXISTS shop_order_index (
        id uuid PRIMARY KEY,
        order_id uuid
    )",
    "CREATE TABLE IF NOT EXISTS shop_order_events (
        shop_order_id uuid,
        sequence_number bigint,
        event_type text,
        envelope text,
        PRIMARY KEY (shop_order_id, sequence_number)
    )",
];

pub struct ScyllaOrderStore {
    session: Arc<Session>,
    read_retry: RetryConfig,
}

fn backend<E: Into<anyhow::Error>>(err: E) -> StoreError {
    StoreError::Backend(err.into())
}

/// Keep only shop orders whose order header exists
fn retain_placed(shop_orders: &mut Vec<ShopOrder>, placed: &HashSet<Uuid>) {
    shop_orders.retain(|so| placed.contains(&so.order_id));
}

/// Outcome of a lightweight transaction: applied flag and, when rejected,
/// the version currently stored.
struct Conditional {
    applied: bool,
    current_version: Option<i64>,
}

impl Conditional {
    fn read(result: QueryResult) -> anyhow::Result<Self> {
        let rows = result.into_rows_result()?;
        let position = |name: &str| rows.column_specs().iter().position(|spec| spec.name() == name);
        let applied_at = position("[applied]").unwrap_or(0);
        let version_at = position("version");

        let row = rows
            .maybe_first_row::<Row>()?
            .ok_or_else(|| anyhow!("conditional write returned no rows"))?;
        let column = |index: usize| row.columns.get(index).cloned().flatten();

        let applied = column(applied_at)
            .as_ref()
            .and_then(CqlValue::as_boolean)
            .ok_or_else(|| anyhow!("conditional write returned no [applied] column"))?;
        let current_version = version_at.and_then(column).as_ref().and_then(CqlValue::as_bigint);

        Ok(Self { applied, current_version })
    }
}

impl ScyllaOrderStore {
    pub async fn connect(uri: &str, keyspace: &str) -> anyhow::Result<Self> {
        tracing::info!(uri, keyspace, "Connecting to ScyllaDB...");
        let session: Session = SessionBuilder::new().known_node(uri).build().await?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
                ),
                (),
            )
            .await?;
        session.use_keyspace(keyspace, false).await?;

        for statement in SCHEMA {
            session
                .query_unpaged(*statement, ())
                .await
                .with_context(|| format!("failed to apply schema statement: {statement}"))?;
        }
        tracing::info!(keyspace, "ScyllaDB schema ready");

        Ok(Self::new(Arc::new(session)))
    }

    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            read_retry: RetryConfig::for_store_reads(),
        }
    }

    async fn order_id_for(&self, shop_order_id: Uuid) -> Result<Uuid, StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT order_id FROM shop_order_index WHERE id = ?", (shop_order_id,))
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        match rows.maybe_first_row::<(Uuid,)>().map_err(backend)? {
            Some((order_id,)) => Ok(order_id),
            None => Err(StoreError::NotFound {
                entity: "shop order",
                id: shop_order_id,
            }),
        }
    }

    async fn header_exists(&self, order_id: Uuid) -> Result<bool, StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT id FROM orders WHERE id = ?", (order_id,))
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;
        Ok(rows.maybe_first_row::<(Uuid,)>().map_err(backend)?.is_some())
    }

    async fn placed_orders(&self, shop_orders: &[ShopOrder]) -> Result<HashSet<Uuid>, StoreError> {
        let candidates: HashSet<Uuid> = shop_orders.iter().map(|so| so.order_id).collect();
        let mut placed = HashSet::with_capacity(candidates.len());
        for order_id in candidates {
            if self.header_exists(order_id).await? {
                placed.insert(order_id);
            }
        }
        Ok(placed)
    }

    /// Run a cleanup statement whose failure must not fail the caller
    async fn best_effort(&self, statement: &'static str, values: impl SerializeRow, id: Uuid) {
        if let Err(err) = self.session.query_unpaged(statement, values).await {
            tracing::warn!(id = %id, statement, error = %err, "Cleanup statement failed");
        }
    }

    /// Remove what a failed placement managed to write
    async fn discard_partial_order(&self, order: &Order, inserted: &[Uuid]) {
        for id in inserted {
            self.best_effort(
                "DELETE FROM shop_orders WHERE order_id = ? AND id = ?",
                (order.id, *id),
                *id,
            )
            .await;
            self.best_effort("DELETE FROM shop_order_index WHERE id = ?", (*id,), *id).await;
            self.best_effort("DELETE FROM shop_order_events WHERE shop_order_id = ?", (*id,), *id)
                .await;
        }
        self.best_effort(
            "DELETE FROM orders_by_customer WHERE customer_id = ? AND created_at = ? AND order_id = ?",
            (order.customer_id, order.created_at, order.id),
            order.id,
        )
        .await;
        tracing::warn!(order_id = %order.id, shop_orders = inserted.len(), "Discarded partially written order");
    }

    async fn fetch_header(&self, order_id: Uuid) -> Result<(Order, Vec<Uuid>), StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT document, shop_order_ids FROM orders WHERE id = ?", (order_id,))
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let (document, ids) = rows
            .maybe_first_row::<(String, Option<Vec<Uuid>>)>()
            .map_err(backend)?
            .ok_or(StoreError::NotFound { entity: "order", id: order_id })?;

        let header: Order = deserialize_event(&document).map_err(backend)?;
        Ok((header, ids.unwrap_or_default()))
    }

    async fn fetch_shop_orders_of(&self, order_id: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT document FROM shop_orders WHERE order_id = ?", (order_id,))
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let mut shop_orders = Vec::new();
        for row in rows.rows::<(String,)>().map_err(backend)? {
            let (document,) = row.map_err(backend)?;
            shop_orders.push(deserialize_event::<ShopOrder>(&document).map_err(backend)?);
        }
        Ok(shop_orders)
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order, StoreError> {
        let (mut order, ids) = self.fetch_header(order_id).await?;
        let mut shop_orders = self.fetch_shop_orders_of(order_id).await?;
        if shop_orders.is_empty() {
            return Err(StoreError::NotFound { entity: "order", id: order_id });
        }

        // keep placement order
        shop_orders.sort_by_key(|so| ids.iter().position(|id| *id == so.id).unwrap_or(usize::MAX));
        order.shop_orders = shop_orders;
        Ok(order)
    }

    async fn fetch_shop_order(&self, shop_order_id: Uuid) -> Result<ShopOrder, StoreError> {
        let order_id = self.order_id_for(shop_order_id).await?;
        if !self.header_exists(order_id).await? {
            return Err(StoreError::NotFound {
                entity: "shop order",
                id: shop_order_id,
            });
        }
        let rows = self
            .session
            .query_unpaged(
                "SELECT document FROM shop_orders WHERE order_id = ? AND id = ?",
                (order_id, shop_order_id),
            )
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let (document,) = rows
            .maybe_first_row::<(String,)>()
            .map_err(backend)?
            .ok_or(StoreError::NotFound {
                entity: "shop order",
                id: shop_order_id,
            })?;
        deserialize_event(&document).map_err(backend)
    }

    async fn fetch_shop_orders_by(&self, column: &'static str, value: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        let rows = self
            .session
            .query_unpaged(format!("SELECT document FROM shop_orders WHERE {column} = ?"), (value,))
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let mut found = Vec::new();
        for row in rows.rows::<(String,)>().map_err(backend)? {
            let (document,) = row.map_err(backend)?;
            found.push(deserialize_event::<ShopOrder>(&document).map_err(backend)?);
        }
        let placed = self.placed_orders(&found).await?;
        retain_placed(&mut found, &placed);
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn fetch_customer_orders(&self, customer_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = self
            .session
            .query_unpaged(
                "SELECT order_id FROM orders_by_customer WHERE customer_id = ?",
                (customer_id,),
            )
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let mut orders = Vec::new();
        for row in rows.rows::<(Uuid,)>().map_err(backend)? {
            let (order_id,) = row.map_err(backend)?;
            match self.fetch_order(order_id).await {
                Ok(order) => orders.push(order),
                // index rows can outlive a deleted order
                Err(StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(orders)
    }

    async fn fetch_history(&self, shop_order_id: Uuid) -> Result<Vec<ShopOrderEnvelope>, StoreError> {
        let rows = self
            .session
            .query_unpaged(
                "SELECT envelope FROM shop_order_events WHERE shop_order_id = ? ORDER BY sequence_number ASC",
                (shop_order_id,),
            )
            .await
            .map_err(backend)?
            .into_rows_result()
            .map_err(backend)?;

        let mut history = Vec::new();
        for row in rows.rows::<(String,)>().map_err(backend)? {
            let (envelope,) = row.map_err(backend)?;
            history.push(deserialize_event::<ShopOrderEnvelope>(&envelope).map_err(backend)?);
        }
        tracing::debug!(shop_order_id = %shop_order_id, events = history.len(), "Loaded shop order history");
        Ok(history)
    }

    async fn append_history(&self, events: &[ShopOrderEnvelope]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::default();
        let mut values: Vec<(Uuid, i64, String, String)> = Vec::with_capacity(events.len());
        for envelope in events {
            batch.append_statement(
                "INSERT INTO shop_order_events (shop_order_id, sequence_number, event_type, envelope) \
                 VALUES (?, ?, ?, ?)",
            );
            values.push((
                envelope.aggregate_id,
                envelope.sequence_number,
                envelope.event_type.clone(),
                serialize_event(envelope).map_err(backend)?,
            ));
        }
        self.session.batch(&batch, values).await.map_err(backend)?;
        Ok(())
    }

    /// Shop orders, history and listing row first, header last.
    async fn write_order(
        &self,
        order: &Order,
        events: &[ShopOrderEnvelope],
        inserted: &mut Vec<Uuid>,
    ) -> Result<(), StoreError> {
        for shop_order in &order.shop_orders {
            self.insert_shop_order(shop_order).await?;
            inserted.push(shop_order.id);
        }
        self.append_history(events).await?;

        let created_at: DateTime<Utc> = order.created_at;
        self.session
            .query_unpaged(
                "INSERT INTO orders_by_customer (customer_id, created_at, order_id) VALUES (?, ?, ?)",
                (order.customer_id, created_at, order.id),
            )
            .await
            .map_err(backend)?;

        // header last: reads ignore shop orders until it exists
        let ids: Vec<Uuid> = order.shop_orders.iter().map(|so| so.id).collect();
        let result = self
            .session
            .query_unpaged(
                "INSERT INTO orders (id, customer_id, version, created_at, shop_order_ids, document) \
                 VALUES (?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                (
                    order.id,
                    order.customer_id,
                    order.version,
                    created_at,
                    ids,
                    serialize_event(&order.header()).map_err(backend)?,
                ),
            )
            .await
            .map_err(backend)?;

        let outcome = Conditional::read(result).map_err(backend)?;
        if !outcome.applied {
            return Err(StoreError::VersionConflict {
                entity: "order",
                id: order.id,
                expected: 0,
                actual: outcome.current_version,
            });
        }
        Ok(())
    }

    async fn insert_shop_order(&self, shop_order: &ShopOrder) -> Result<(), StoreError> {
        self.session
            .query_unpaged(
                "INSERT INTO shop_order_index (id, order_id) VALUES (?, ?)",
                (shop_order.id, shop_order.order_id),
            )
            .await
            .map_err(backend)?;

        let result = self
            .session
            .query_unpaged(
                "INSERT INTO shop_orders (order_id, id, version, status, owner_id, assigned_partner, created_at, document) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                (
                    shop_order.order_id,
                    shop_order.id,
                    shop_order.version,
                    shop_order.status.as_str(),
                    shop_order.owner_id,
                    shop_order.assigned_delivery_partner,
                    shop_order.created_at,
                    serialize_event(shop_order).map_err(backend)?,
                ),
            )
            .await
            .map_err(backend)?;

        let outcome = Conditional::read(result).map_err(backend)?;
        if !outcome.applied {
            return Err(StoreError::VersionConflict {
                entity: "shop order",
                id: shop_order.id,
                expected: 0,
                actual: outcome.current_version,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    async fn insert_order(&self, order: &Order, events: &[ShopOrderEnvelope]) -> Result<(), StoreError> {
        if order.shop_orders.is_empty() {
            return Err(backend(anyhow!("order {} has no shop orders", order.id)));
        }

        let mut inserted = Vec::with_capacity(order.shop_orders.len());
        let written = self.write_order(order, events, &mut inserted).await;
        if let Err(err) = written {
            self.discard_partial_order(order, &inserted).await;
            return Err(err);
        }

        tracing::info!(
            order_id = %order.id,
            shop_orders = order.shop_orders.len(),
            "✅ Order persisted"
        );
        Ok(())
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| self.fetch_order(order_id))
            .await
            .into_result()
    }

    async fn load_shop_order(&self, shop_order_id: Uuid) -> Result<ShopOrder, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| self.fetch_shop_order(shop_order_id))
            .await
            .into_result()
    }

    async fn save_shop_order(
        &self,
        shop_order: &ShopOrder,
        expected_version: i64,
        events: &[ShopOrderEnvelope],
    ) -> Result<(), StoreError> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE shop_orders SET version = ?, status = ?, assigned_partner = ?, document = ? \
                 WHERE order_id = ? AND id = ? IF version = ?",
                (
                    shop_order.version,
                    shop_order.status.as_str(),
                    shop_order.assigned_delivery_partner,
                    serialize_event(shop_order).map_err(backend)?,
                    shop_order.order_id,
                    shop_order.id,
                    expected_version,
                ),
            )
            .await
            .map_err(backend)?;

        let outcome = Conditional::read(result).map_err(backend)?;
        if !outcome.applied {
            return match outcome.current_version {
                None => Err(StoreError::NotFound {
                    entity: "shop order",
                    id: shop_order.id,
                }),
                actual => Err(StoreError::VersionConflict {
                    entity: "shop order",
                    id: shop_order.id,
                    expected: expected_version,
                    actual,
                }),
            };
        }

        if let Err(err) = self.append_history(events).await {
            tracing::error!(
                shop_order_id = %shop_order.id,
                version = shop_order.version,
                error = %err,
                "Shop order saved but history append failed"
            );
        }
        Ok(())
    }

    async fn save_order_header(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE orders SET version = ?, document = ? WHERE id = ? IF version = ?",
                (
                    order.version,
                    serialize_event(&order.header()).map_err(backend)?,
                    order.id,
                    expected_version,
                ),
            )
            .await
            .map_err(backend)?;

        let outcome = Conditional::read(result).map_err(backend)?;
        match (outcome.applied, outcome.current_version) {
            (true, _) => Ok(()),
            (false, None) => Err(StoreError::NotFound { entity: "order", id: order.id }),
            (false, actual) => Err(StoreError::VersionConflict {
                entity: "order",
                id: order.id,
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn delete_order_if_pending(&self, order_id: Uuid) -> Result<bool, StoreError> {
        let (header, ids) = self.fetch_header(order_id).await?;

        // one partition, so the whole batch applies or none of it does
        let mut batch = Batch::default();
        let mut values: Vec<(Uuid, Uuid)> = Vec::with_capacity(ids.len());
        for id in &ids {
            batch.append_statement("DELETE FROM shop_orders WHERE order_id = ? AND id = ? IF status = 'pending'");
            values.push((order_id, *id));
        }

        let result = self.session.batch(&batch, values).await.map_err(backend)?;
        if !Conditional::read(result).map_err(backend)?.applied {
            return Ok(false);
        }

        // the shop orders are gone; the rest is cleanup
        self.best_effort("DELETE FROM orders WHERE id = ?", (order_id,), order_id).await;
        for id in &ids {
            self.best_effort("DELETE FROM shop_order_index WHERE id = ?", (*id,), *id).await;
            self.best_effort("DELETE FROM shop_order_events WHERE shop_order_id = ?", (*id,), *id)
                .await;
        }
        self.best_effort(
            "DELETE FROM orders_by_customer WHERE customer_id = ? AND created_at = ? AND order_id = ?",
            (header.customer_id, header.created_at, order_id),
            order_id,
        )
        .await;

        tracing::info!(order_id = %order_id, "🗑️ Pending order deleted");
        Ok(true)
    }

    async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| self.fetch_customer_orders(customer_id))
            .await
            .into_result()
    }

    async fn shop_orders_for_owner(&self, owner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| self.fetch_shop_orders_by("owner_id", owner_id))
            .await
            .into_result()
    }

    async fn shop_orders_for_partner(&self, partner_id: Uuid) -> Result<Vec<ShopOrder>, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| {
            self.fetch_shop_orders_by("assigned_partner", partner_id)
        })
        .await
        .into_result()
    }

    async fn shop_order_history(&self, shop_order_id: Uuid) -> Result<Vec<ShopOrderEnvelope>, StoreError> {
        retry_on_transient(self.read_retry.clone(), |_| self.fetch_history(shop_order_id))
            .await
            .into_result()
    }
}
