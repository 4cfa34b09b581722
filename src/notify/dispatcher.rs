use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::mail::{Handoff, Mailer};
use super::{Audience, Notifier, RealtimeEnvelope, RealtimeEvent};
use crate::event_sourcing::core::DomainEvent;
use crate::metrics::Metrics;

// ============================================================================
// Dispatcher - fire-and-forget outbound side effects
// ============================================================================
//
// Called after a write has committed. Every call is bounded by `timeout`
// and every failure is logged and counted, never returned: a broken broker
// or mail relay must not undo or block an order change.
//
// ============================================================================

#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    mailer: Arc<dyn Mailer>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, mailer: Arc<dyn Mailer>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            notifier,
            mailer,
            timeout,
            metrics,
        }
    }

    /// Publish `event` to `audiences`. Returns whether the publish went through.
    pub async fn emit(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
        event: RealtimeEvent,
        audiences: &[Audience],
        correlation_id: Uuid,
    ) -> bool {
        if audiences.is_empty() {
            return true;
        }

        let name = event.event_name();
        let envelope = RealtimeEnvelope::new(aggregate_id, sequence_number, event, correlation_id);

        let delivered = match tokio::time::timeout(self.timeout, self.notifier.publish(&envelope, audiences)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    event = name,
                    aggregate_id = %aggregate_id,
                    audiences = audiences.len(),
                    "Realtime event published"
                );
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(event = name, aggregate_id = %aggregate_id, error = %e, "Realtime publish failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    event = name,
                    aggregate_id = %aggregate_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Realtime publish timed out"
                );
                false
            }
        };

        self.metrics.record_notification(name, delivered);
        delivered
    }

    /// Hand a payload to the mail collaborator. Returns whether it was accepted.
    pub async fn hand_off(&self, handoff: Handoff) -> bool {
        let kind = handoff.kind();
        let recipient = handoff.recipient();

        let delivered = match tokio::time::timeout(self.timeout, self.mailer.deliver(&handoff)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(kind, recipient = %recipient, error = %e, "Hand-off failed");
                false
            }
            Err(_) => {
                tracing::error!(kind, recipient = %recipient, "Hand-off timed out");
                false
            }
        };

        self.metrics.record_handoff(kind, delivered);
        delivered
    }
}
