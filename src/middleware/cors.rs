//! CORS layer for the single allowed origin.

use axum::http::header::{CONTENT_TYPE, InvalidHeaderValue};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use std::time::Duration;

use crate::service::API_KEY_HEADER;

/// How long browsers may cache a preflight answer.
pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Create a CORS layer that answers preflights for `allowed_origin` only.
///
/// Preflight `OPTIONS` requests are answered by the layer itself and never
/// reach the handler or the rate limiter.
pub fn create_cors_layer(allowed_origin: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    let origin = HeaderValue::from_str(allowed_origin.trim().trim_end_matches('/'))?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
        .max_age(PREFLIGHT_MAX_AGE))
}
