// ============================================================================
// delivery_orders - order lifecycle core of a food delivery platform
// ============================================================================
//
// Orders split into one shop order per shop. Each shop order walks
// pending -> preparing -> ready -> out of delivery -> delivered (or is
// cancelled), is matched to exactly one delivery partner and is handed
// over against a one-time code. Every change is fanned out to the
// customer, the shop owner and the delivery partner.
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod messaging;
pub mod metrics;
pub mod notify;
pub mod service;
pub mod store;
pub mod utils;

pub use config::Config;
pub use service::{ActorOrders, Collaborators, OrderService};
