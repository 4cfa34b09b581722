use std::sync::Arc;

use async_trait::async_trait;

use super::redpanda::RedpandaClient;
use crate::event_sourcing::core::serialize_event;
use crate::notify::{Audience, Notifier, RealtimeEnvelope};
use crate::utils::{retry_with_backoff, RetryConfig};

/// Realtime notifier backed by a broker topic.
///
/// One record per audience, keyed by the audience channel so a socket
/// gateway can route it and per-user ordering is kept within a partition.
pub struct RedpandaNotifier {
    client: Arc<RedpandaClient>,
    topic: String,
    retry: RetryConfig,
}

impl RedpandaNotifier {
    pub fn new(client: Arc<RedpandaClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            retry: RetryConfig::for_notifications(),
        }
    }
}

#[async_trait]
impl Notifier for RedpandaNotifier {
    async fn publish(&self, envelope: &RealtimeEnvelope, audiences: &[Audience]) -> anyhow::Result<()> {
        let payload = serialize_event(envelope)?;
        let mut failed = 0usize;

        for audience in audiences {
            let key = audience.channel();
            let sent = retry_with_backoff(self.retry.clone(), |_| {
                self.client.publish(&self.topic, &key, &envelope.event_type, &payload)
            })
            .await
            .into_result();

            if let Err(e) = sent {
                failed += 1;
                tracing::warn!(audience = %audience, event = %envelope.event_type, error = %e, "Audience publish failed");
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} audience publishes failed", audiences.len());
        }
        Ok(())
    }
}
