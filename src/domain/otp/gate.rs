use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::record::{DeliveryOtp, OtpDraft};
use crate::domain::order::{OrderError, ShopOrder, ShopOrderCommand, ShopOrderCommandHandler};
use crate::metrics::Metrics;
use crate::notify::{Dispatcher, Handoff};
use crate::utils::{retry_on_transient, Clock, RetryConfig};

#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// How long a code stays valid after issue
    pub ttl: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
        }
    }
}

/// Issue and verify delivery codes.
///
/// Both go through the shop order's conditional write, so a verify that was
/// decided before a reissue committed fails on version and is re-decided
/// against the new code.
pub struct OtpGate {
    handler: Arc<ShopOrderCommandHandler>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
    metrics: Arc<Metrics>,
}

impl OtpGate {
    pub fn new(
        handler: Arc<ShopOrderCommandHandler>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: OtpConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            handler,
            dispatcher,
            clock,
            config,
            metrics,
        }
    }

    /// Fresh code material starting now
    pub fn draft(&self) -> OtpDraft {
        OtpDraft::generate(self.clock.now(), self.config.ttl)
    }

    /// Issue (or reissue) the code and hand it to the customer.
    /// Any earlier unconsumed code stops matching immediately.
    pub async fn issue(
        &self,
        shop_order_id: Uuid,
        actor_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<DeliveryOtp, OrderError> {
        let command = ShopOrderCommand::IssueOtp {
            actor_id,
            otp: self.draft(),
        };
        let committed = self.handler.handle(shop_order_id, command, actor_id, correlation_id).await?;
        let otp = committed.after.delivery_otp.clone().ok_or_else(|| {
            OrderError::Internal(anyhow::anyhow!("shop order {shop_order_id} has no OTP after issue"))
        })?;

        tracing::info!(
            shop_order_id = %shop_order_id,
            otp_version = otp.version,
            expires_at = %otp.expires_at,
            "🔑 Delivery OTP reissued"
        );
        self.hand_off(&committed.after).await;
        Ok(otp)
    }

    /// Send the current code of `shop_order` to its customer
    pub async fn hand_off(&self, shop_order: &ShopOrder) -> bool {
        let Some(otp) = shop_order.delivery_otp.as_ref() else {
            return false;
        };
        self.metrics.record_otp_issued();
        self.dispatcher
            .hand_off(Handoff::DeliveryOtp {
                recipient: shop_order.customer_id,
                shop_order_id: shop_order.id,
                code: otp.code.clone(),
                expires_at: otp.expires_at,
            })
            .await
    }

    /// Check the submitted code and mark it consumed.
    pub async fn verify(
        &self,
        shop_order_id: Uuid,
        actor_id: Uuid,
        code: &str,
        correlation_id: Uuid,
    ) -> Result<ShopOrder, OrderError> {
        let outcome = retry_on_transient(RetryConfig::for_conflicts(), |_| {
            let command = ShopOrderCommand::VerifyOtp {
                actor_id,
                code: code.to_string(),
                at: self.clock.now(),
            };
            self.handler.handle(shop_order_id, command, actor_id, correlation_id)
        })
        .await
        .into_result();

        match &outcome {
            Ok(_) => {
                self.metrics.record_otp_verification("verified");
                tracing::info!(shop_order_id = %shop_order_id, "✅ Delivery OTP verified");
            }
            Err(OrderError::Otp(e)) => {
                self.metrics.record_otp_verification(e.kind());
                tracing::info!(shop_order_id = %shop_order_id, outcome = e.kind(), "Delivery OTP rejected");
            }
            Err(e) => self.metrics.record_otp_verification(e.kind()),
        }

        outcome.map(|committed| committed.after)
    }
}
