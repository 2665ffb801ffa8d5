//! API layer
//!
//! HTTP handlers for:
//! - OAuth connect routes
//! - Request echo (debugging aid)
//! - Metrics (Prometheus)

mod connect;
mod echo;
pub mod metrics;

pub use connect::connect_router;
pub use echo::echo_router;
pub use metrics::metrics_router;
