use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{dto::ErrorResponse, transport::TransportError};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Server configuration incomplete: missing {}", .0.join(", "))]
    Configuration(Vec<&'static str>),

    #[error("Invalid sender address: {0}")]
    InvalidSender(String),

    #[error("Invalid JSON payload: {0}")]
    MalformedPayload(String),

    #[error("Missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::MalformedPayload(_) | Self::MissingFields(_) | Self::InvalidRecipient(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Configuration(_) | Self::InvalidSender(_) | Self::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
