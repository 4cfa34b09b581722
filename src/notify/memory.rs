use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{Audience, Notifier, RealtimeEnvelope};

const CHANNEL_CAPACITY: usize = 64;

/// Per-audience broadcast topics, one per connected user.
///
/// A client "connects" by subscribing to its own audience. Publishing to an
/// audience nobody listens on is a silent miss, the same as a closed socket.
#[derive(Default)]
pub struct InMemoryNotifier {
    channels: RwLock<HashMap<Audience, broadcast::Sender<RealtimeEnvelope>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, audience: Audience) -> broadcast::Receiver<RealtimeEnvelope> {
        if let Some(sender) = self.channels.read().await.get(&audience) {
            return sender.subscribe();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(audience)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscriptions for an audience
    pub async fn connected(&self, audience: Audience) -> usize {
        self.channels
            .read()
            .await
            .get(&audience)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish(&self, envelope: &RealtimeEnvelope, audiences: &[Audience]) -> anyhow::Result<()> {
        let channels = self.channels.read().await;
        for audience in audiences {
            match channels.get(audience) {
                // send only errors when every receiver is gone
                Some(sender) if sender.send(envelope.clone()).is_ok() => {
                    tracing::trace!(audience = %audience, event = %envelope.event_type, "Pushed");
                }
                _ => {
                    tracing::trace!(audience = %audience, event = %envelope.event_type, "Audience not connected");
                }
            }
        }
        Ok(())
    }
}
