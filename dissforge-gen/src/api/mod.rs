//! HTTP API handlers
//!
//! REST endpoints for starting generation runs and fetching their results,
//! plus an SSE stream of generation events.

pub mod generate;
pub mod health;
pub mod runs;
pub mod sse;

pub use generate::generate_routes;
pub use health::health_routes;
pub use runs::run_routes;
pub use sse::event_stream;
