// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - order:      orders, shop orders and the status transition engine
// - assignment: partner search, offers and first-accept-wins assignment
// - otp:        delivery confirmation codes
//
// This layer knows nothing about ScyllaDB or Redpanda; it talks to them
// through the store and notifier traits.
//
// ============================================================================

pub mod assignment;
pub mod order;
pub mod otp;
