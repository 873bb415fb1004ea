//! API Module
//!
//! Administrative HTTP surface over the cache: read-through lookups,
//! invalidation, warm-up and statistics.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
