//! Router assembly for the relay.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use std::sync::Arc;

use crate::{
    handler,
    middleware::{RateLimitState, create_cors_layer, rate_limit},
    service::RelayService,
};

/// Build the application router.
///
/// Layer order, outermost first: tracing, CORS (answers preflights),
/// rate limiting (POST only), handler.
pub fn create_router(
    service: Arc<RelayService>,
    rate_limit_state: RateLimitState,
) -> Result<Router, Box<dyn std::error::Error>> {
    let cors = create_cors_layer(&service.config().allowed_domain)?;

    let router = Router::new()
        .route("/send-email", post(handler::send_email))
        .route_layer(middleware::from_fn_with_state(rate_limit_state, rate_limit))
        .route("/", get(handler::health_check))
        .with_state(service)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
