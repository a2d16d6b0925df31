//! Layers wrapped around the send-email route.

pub mod cors;
pub mod rate_limit;

pub use cors::create_cors_layer;
pub use rate_limit::{RateLimitState, rate_limit};
