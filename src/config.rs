use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::Context;
use tracing::info;

use crate::domain::assignment::MatcherConfig;
use crate::domain::otp::OtpConfig;

// ============================================================================
// Configuration - environment driven, every value has a logged default
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Scylla { uri: String, keyspace: String },
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Upper bound for a single store call
    pub store: Duration,
    /// Upper bound for a realtime publish or mail hand-off
    pub notify: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(2000),
            notify: Duration::from_millis(500),
        }
    }
}

/// Settings the order service itself needs
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub matcher: MatcherConfig,
    pub otp: OtpConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    /// Unset means realtime events stay in process
    pub redpanda_brokers: Option<String>,
    pub notify_topic: String,
    pub metrics_port: u16,
    pub service: ServiceConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match try_load::<String, _>(&lookup, "ORDER_STORE", "memory")?.to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "scylla" => StoreBackend::Scylla {
                uri: try_load(&lookup, "SCYLLA_URI", "127.0.0.1:9042")?,
                keyspace: try_load(&lookup, "SCYLLA_KEYSPACE", "delivery_ks")?,
            },
            other => anyhow::bail!("ORDER_STORE must be 'memory' or 'scylla', got '{other}'"),
        };

        let radius_km: f64 = try_load(&lookup, "ASSIGNMENT_RADIUS_KM", "5.0")?;
        if !(radius_km.is_finite() && radius_km > 0.0) {
            anyhow::bail!("ASSIGNMENT_RADIUS_KM must be a positive number, got {radius_km}");
        }
        let offer_ttl_secs: u32 = try_load(&lookup, "ASSIGNMENT_OFFER_TTL_SECS", "600")?;
        let otp_ttl_secs: u32 = try_load(&lookup, "OTP_TTL_SECS", "300")?;
        let store_timeout_ms: u64 = try_load(&lookup, "STORE_TIMEOUT_MS", "2000")?;
        let notify_timeout_ms: u64 = try_load(&lookup, "NOTIFY_TIMEOUT_MS", "500")?;

        Ok(Self {
            store,
            redpanda_brokers: lookup("REDPANDA_BROKERS").filter(|b| !b.trim().is_empty()),
            notify_topic: try_load(&lookup, "NOTIFY_TOPIC", "order-notifications")?,
            metrics_port: try_load(&lookup, "METRICS_PORT", "9090")?,
            service: ServiceConfig {
                matcher: MatcherConfig {
                    radius_km,
                    offer_ttl: chrono::Duration::seconds(i64::from(offer_ttl_secs)),
                },
                otp: OtpConfig {
                    ttl: chrono::Duration::seconds(i64::from(otp_ttl_secs)),
                },
                timeouts: TimeoutConfig {
                    store: Duration::from_millis(store_timeout_ms),
                    notify: Duration::from_millis(notify_timeout_ms),
                },
            },
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.redpanda_brokers, None);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.service.otp.ttl, chrono::Duration::minutes(5));
        assert_eq!(config.service.matcher.offer_ttl, chrono::Duration::minutes(10));
        assert_eq!(config.service.timeouts.notify, Duration::from_millis(500));
    }

    #[test]
    fn test_scylla_backend_and_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ORDER_STORE", "Scylla"),
            ("SCYLLA_URI", "scylla:9042"),
            ("REDPANDA_BROKERS", "redpanda:9092"),
            ("ASSIGNMENT_RADIUS_KM", "3.5"),
        ]))
        .unwrap();

        assert_eq!(
            config.store,
            StoreBackend::Scylla {
                uri: "scylla:9042".into(),
                keyspace: "delivery_ks".into()
            }
        );
        assert_eq!(config.redpanda_brokers.as_deref(), Some("redpanda:9092"));
        assert_eq!(config.service.matcher.radius_km, 3.5);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(Config::from_lookup(lookup(&[("METRICS_PORT", "ninety")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ASSIGNMENT_RADIUS_KM", "-1")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ORDER_STORE", "postgres")])).is_err());
    }
}
