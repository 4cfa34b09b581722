use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, EventEnvelope};
use crate::metrics::Metrics;
use crate::store::{bounded, OrderStore, StoreError};

use super::aggregate::ShopOrder;
use super::commands::ShopOrderCommand;
use super::errors::OrderError;
use super::events::ShopOrderEvent;

// ============================================================================
// Shop Order Command Handler
// ============================================================================
//
// Orchestrates: load -> decide -> evolve -> conditional save
//
// The save is keyed on the version the decision was made against. If another
// request committed in between, the save fails and nothing is written.
//
// ============================================================================

/// A command that made it to the store.
#[derive(Debug, Clone)]
pub struct Committed {
    pub before: ShopOrder,
    pub after: ShopOrder,
    pub events: Vec<EventEnvelope<ShopOrderEvent>>,
}

pub struct ShopOrderCommandHandler {
    store: Arc<dyn OrderStore>,
    store_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl ShopOrderCommandHandler {
    pub fn new(store: Arc<dyn OrderStore>, store_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            store_timeout,
            metrics,
        }
    }

    pub async fn load(&self, shop_order_id: Uuid) -> Result<ShopOrder, OrderError> {
        let loaded = bounded(
            self.store_timeout,
            "load_shop_order",
            self.store.load_shop_order(shop_order_id),
        )
        .await?;
        Ok(loaded)
    }

    /// Handle a command and persist resulting events
    pub async fn handle(
        &self,
        shop_order_id: Uuid,
        command: ShopOrderCommand,
        actor_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<Committed, OrderError> {
        let started = Instant::now();
        let operation = command.name();

        let before = self.load(shop_order_id).await?;
        let expected_version = before.version();

        let domain_events = before.handle_command(&command).inspect_err(|e| {
            tracing::debug!(
                shop_order_id = %shop_order_id,
                operation,
                error = %e,
                "Command rejected"
            );
        })?;
        let after = before.evolve(&domain_events)?;

        let envelopes: Vec<_> = domain_events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                EventEnvelope::new(shop_order_id, expected_version + i as i64 + 1, event, correlation_id)
                    .with_user(actor_id)
            })
            .collect();

        let saved = bounded(
            self.store_timeout,
            "save_shop_order",
            self.store.save_shop_order(&after, expected_version, &envelopes),
        )
        .await;

        if let Err(err) = saved {
            if matches!(err, StoreError::VersionConflict { .. }) {
                self.metrics.record_store_conflict("shop_order");
                tracing::debug!(
                    shop_order_id = %shop_order_id,
                    operation,
                    expected_version,
                    "Lost version race"
                );
            }
            return Err(err.into());
        }

        self.metrics.observe_command(operation, started.elapsed().as_secs_f64());
        tracing::debug!(
            shop_order_id = %shop_order_id,
            operation,
            version = after.version,
            events = envelopes.len(),
            "Command committed"
        );

        Ok(Committed {
            before,
            after,
            events: envelopes,
        })
    }
}
