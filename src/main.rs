mod config;
mod dto;
mod error;
mod handler;
mod middleware;
mod router;
mod service;
mod transport;

use std::{net::SocketAddr, sync::Arc};

use middleware::RateLimitState;
use service::RelayService;
use transport::SmtpMailer;

#[tokio::main]
async fn main() {
    // Log setup
    tracing_subscriber::fmt().init();

    // Load config
    let cfg = config::load_config().expect("failed to locate or load config file");
    tracing::info!("Successfully loaded mail relay config");

    let missing = cfg.missing_smtp_settings();
    if !missing.is_empty() {
        tracing::error!(
            "SMTP settings incomplete, every send will fail until provided: {}",
            missing.join(", ")
        );
    }
    if cfg.api_key().is_none() {
        tracing::warn!("No API key configured, requests are only checked by origin");
    }
    tracing::info!(
        "Relaying through {}:{} ({:?}), allowed origin '{}'",
        cfg.smtp_host.as_deref().unwrap_or("<unset>"),
        cfg.smtp_port,
        cfg.tls_mode(),
        cfg.allowed_domain
    );
    tracing::info!("{}", transport::tls_notice(cfg.tls_mode()));

    // Setup rate limiting
    let rate_limit = RateLimitState::new(cfg.rate_limit_per_minute, cfg.trust_proxy_headers);
    rate_limit.clone().start_cleanup_task();

    // Setup service
    let port = cfg.listen_port;
    let service = Arc::new(RelayService::new(Arc::new(cfg), Arc::new(SmtpMailer)));

    // Setup router
    let router = router::create_router(service, rate_limit).unwrap_or_else(|e| {
        tracing::error!("Invalid allowed origin: {e}");
        panic!("invalid allowed origin: {e}");
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().expect("Failed to read local address");

    tracing::info!("Mail relay starting, listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
