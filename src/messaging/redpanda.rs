use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
};

use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-compatible producer guarded by a circuit breaker. While the breaker
/// is open, publishes fail immediately instead of waiting on the broker.
pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaClient {
    pub fn new(brokers: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Redpanda producer: {e}"))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };
        let circuit_breaker = CircuitBreaker::new(cb_config)
            .with_observer(Arc::new(move |from, to| metrics.record_circuit_breaker_transition(from, to)));

        tracing::info!(brokers, "Redpanda producer created");
        Ok(Self {
            producer,
            circuit_breaker,
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, event_type: &str, payload: &str) -> Result<()> {
        let result = self
            .circuit_breaker
            .call(async {
                let headers = OwnedHeaders::new().insert(Header {
                    key: "event_type",
                    value: Some(event_type),
                });
                let record = FutureRecord::to(topic).key(key).payload(payload).headers(headers);

                self.producer
                    .send(record, rdkafka::util::Timeout::After(SEND_TIMEOUT))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(topic, key, event_type, "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(topic, "Circuit breaker open - Redpanda unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}
