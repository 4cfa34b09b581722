use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards the broker connection used for realtime notifications. When the
// broker keeps failing the breaker opens and publishes fail immediately,
// which keeps the notification path bounded while order writes carry on.
//
// States:
// - Closed: calls pass through
// - Open: calls are rejected until `timeout` has elapsed
// - HalfOpen: calls pass through; `success_threshold` successes close it
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding used by the metrics module.
    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Called with (from, to) whenever the breaker changes state.
pub type TransitionObserver = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    observer: Option<TransitionObserver>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub timeout: Duration,
    /// Successes in half-open needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run `operation` unless the circuit is open
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut guard = self.state.lock().await;
            if guard.state == CircuitState::Open {
                let waited_long_enough = guard
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if !waited_long_enough {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                guard.success_count = 0;
                self.move_to(&mut guard, CircuitState::HalfOpen);
            }
        }

        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    fn move_to(&self, guard: &mut BreakerState, to: CircuitState) {
        let from = guard.state;
        if from == to {
            return;
        }
        guard.state = to;
        tracing::info!(from = from.as_str(), to = to.as_str(), "Circuit breaker state changed");
        if let Some(observer) = &self.observer {
            observer(from, to);
        }
    }

    async fn record_success(&self) {
        let mut guard = self.state.lock().await;
        let current = guard.state;
        match current {
            CircuitState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    guard.opened_at = None;
                    self.move_to(&mut guard, CircuitState::Closed);
                }
            }
            CircuitState::Closed => guard.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut guard = self.state.lock().await;
        guard.failure_count += 1;

        let current = guard.state;
        let tripped = guard.failure_count >= self.config.failure_threshold;
        match current {
            CircuitState::Closed if tripped => {
                guard.opened_at = Some(Instant::now());
                self.move_to(&mut guard, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                guard.success_count = 0;
                guard.opened_at = Some(Instant::now());
                self.move_to(&mut guard, CircuitState::Open);
            }
            _ => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn reset(&self) {
        let mut guard = self.state.lock().await;
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.opened_at = None;
        self.move_to(&mut guard, CircuitState::Closed);
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}
