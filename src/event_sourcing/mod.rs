// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic aggregate and event-envelope abstractions. Shop orders are
// persisted as versioned snapshots plus their event history; realtime
// notifications travel in the same envelope type.
//
// ============================================================================

pub mod core;

pub use self::core::*;
