//! Per-client rate limiting for the send-email route.

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

use crate::dto::ErrorResponse;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

pub type ClientRateLimiter = DefaultKeyedRateLimiter<String>;

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<ClientRateLimiter>,
    trust_proxy_headers: bool,
}

impl RateLimitState {
    pub fn new(requests_per_minute: u32, trust_proxy_headers: bool) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            trust_proxy_headers,
        }
    }

    /// Returns `true` while `client` is within its quota.
    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }

    /// Drops limiter state for clients whose quota has fully replenished.
    pub fn cleanup(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn start_cleanup_task(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup();
                tracing::trace!("Rate limiter tracking {} clients", self.limiter.len());
            }
        });
    }

    fn client_key(&self, req: &Request) -> String {
        if self.trust_proxy_headers {
            // Take the first IP in the chain
            if let Some(ip) = req
                .headers()
                .get("X-Forwarded-For")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
            {
                return ip.to_string();
            }

            if let Some(real_ip) = req.headers().get("X-Real-IP").and_then(|v| v.to_str().ok()) {
                return real_ip.trim().to_string();
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string())
    }
}

pub async fn rate_limit(State(state): State<RateLimitState>, req: Request, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let client = state.client_key(&req);

    if !state.check(&client) {
        tracing::warn!(client = %client, "Send-email rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Too many requests. Please try again later.".to_string(),
            }),
        )
            .into_response();
    }

    next.run(req).await
}
