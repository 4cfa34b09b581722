// ============================================================================
// Messaging - Redpanda transport for realtime notifications
// ============================================================================

pub mod notifier;
pub mod redpanda;

pub use notifier::RedpandaNotifier;
pub use redpanda::RedpandaClient;
