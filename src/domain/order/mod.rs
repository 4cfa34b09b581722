// ============================================================================
// Order Domain - orders, shop orders and the status transition engine
// ============================================================================
//
// - Value objects (status graph, geo points, money lines, payment)
// - Events and commands of the ShopOrder aggregate
// - Errors (OrderError, surfaced to callers)
// - Aggregate (Order header + ShopOrder state machine)
// - Command Handler (load -> decide -> conditional save)
// - Shop directory capability used at checkout
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;
pub mod shops;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
pub use shops::*;
