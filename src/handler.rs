use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_macros::debug_handler;

use std::sync::Arc;

use crate::{dto::SendEmailRequest, service::RelayService};

#[debug_handler]
pub async fn send_email(
    State(service): State<Arc<RelayService>>,
    headers: HeaderMap,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Response {
    let payload = payload.map(|Json(p)| p).map_err(|e| e.body_text());

    match service.relay(&headers, payload).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!("Failed to send email: {e}");
            } else {
                tracing::warn!("Rejected send-email request: {e}");
            }
            e.into_response()
        }
    }
}

#[debug_handler]
pub async fn health_check() -> Response {
    (StatusCode::OK, "Hello from mail relay!").into_response()
}
