// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

use crate::utils::CircuitState;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order lifecycle
// ============================================================================
//
// - Orders placed and shop order status transitions
// - Rejected commands by error kind, lost version races
// - OTP issuance and verification outcomes
// - Assignment offers, candidate counts, accept races
// - Realtime notifications and mail hand-offs
// - Broker circuit breaker state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Order lifecycle
    pub orders_placed: IntCounterVec,
    pub transitions: IntCounterVec,
    pub commands_rejected: IntCounterVec,
    pub store_conflicts: IntCounterVec,
    pub command_duration: HistogramVec,

    // OTP
    pub otp_issued: IntCounter,
    pub otp_verifications: IntCounterVec,

    // Assignment
    pub assignment_offers: IntCounter,
    pub assignment_candidates: HistogramVec,
    pub assignment_accepts: IntCounterVec,

    // Outbound
    pub notifications: IntCounterVec,
    pub handoffs: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_placed = IntCounterVec::new(
            Opts::new("orders_placed_total", "Orders placed"),
            &["payment_method"],
        )?;
        registry.register(Box::new(orders_placed.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new("shop_order_transitions_total", "Committed shop order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let commands_rejected = IntCounterVec::new(
            Opts::new("commands_rejected_total", "Commands rejected, by operation and error kind"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(commands_rejected.clone()))?;

        let store_conflicts = IntCounterVec::new(
            Opts::new("store_conflicts_total", "Conditional writes that lost a version race"),
            &["entity"],
        )?;
        registry.register(Box::new(store_conflicts.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("command_duration_seconds", "Time spent handling a command")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let otp_issued = IntCounter::new("delivery_otp_issued_total", "Delivery OTPs issued, including resends")?;
        registry.register(Box::new(otp_issued.clone()))?;

        let otp_verifications = IntCounterVec::new(
            Opts::new("delivery_otp_verifications_total", "Delivery OTP verification attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(otp_verifications.clone()))?;

        let assignment_offers = IntCounter::new("assignment_offers_total", "Assignment offers broadcast")?;
        registry.register(Box::new(assignment_offers.clone()))?;

        let assignment_candidates = HistogramVec::new(
            HistogramOpts::new("assignment_candidates", "Delivery partners found per search")
                .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(assignment_candidates.clone()))?;

        let assignment_accepts = IntCounterVec::new(
            Opts::new("assignment_accepts_total", "Assignment accept attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(assignment_accepts.clone()))?;

        let notifications = IntCounterVec::new(
            Opts::new("realtime_notifications_total", "Realtime notifications attempted"),
            &["event", "outcome"],
        )?;
        registry.register(Box::new(notifications.clone()))?;

        let handoffs = IntCounterVec::new(
            Opts::new("mail_handoffs_total", "Hand-offs to the notification/mail collaborator"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(handoffs.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            orders_placed,
            transitions,
            commands_rejected,
            store_conflicts,
            command_duration,
            otp_issued,
            otp_verifications,
            assignment_offers,
            assignment_candidates,
            assignment_accepts,
            notifications,
            handoffs,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_placed(&self, payment_method: &str) {
        self.orders_placed.with_label_values(&[payment_method]).inc();
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_rejection(&self, operation: &str, kind: &str) {
        self.commands_rejected.with_label_values(&[operation, kind]).inc();
    }

    pub fn record_store_conflict(&self, entity: &str) {
        self.store_conflicts.with_label_values(&[entity]).inc();
    }

    pub fn observe_command(&self, operation: &str, duration_secs: f64) {
        self.command_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    pub fn record_otp_issued(&self) {
        self.otp_issued.inc();
    }

    pub fn record_otp_verification(&self, outcome: &str) {
        self.otp_verifications.with_label_values(&[outcome]).inc();
    }

    pub fn record_assignment_search(&self, candidates: usize) {
        let outcome = if candidates == 0 { "none" } else { "offered" };
        if candidates > 0 {
            self.assignment_offers.inc();
        }
        self.assignment_candidates
            .with_label_values(&[outcome])
            .observe(candidates as f64);
    }

    pub fn record_assignment_accept(&self, won: bool) {
        let outcome = if won { "won" } else { "lost" };
        self.assignment_accepts.with_label_values(&[outcome]).inc();
    }

    pub fn record_notification(&self, event: &str, delivered: bool) {
        let outcome = if delivered { "published" } else { "failed" };
        self.notifications.with_label_values(&[event, outcome]).inc();
    }

    pub fn record_handoff(&self, kind: &str, delivered: bool) {
        let outcome = if delivered { "handed_off" } else { "failed" };
        self.handoffs.with_label_values(&[kind, outcome]).inc();
    }

    pub fn record_circuit_breaker_transition(&self, from: CircuitState, to: CircuitState) {
        self.circuit_breaker_state.set(to.gauge_value());
        self.circuit_breaker_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }
}
