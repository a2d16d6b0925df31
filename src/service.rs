use axum::http::{HeaderMap, header};
use lettre::Address;
use url::Url;

use std::sync::Arc;

use crate::{
    config::Config,
    dto::{SendEmailRequest, SendEmailResponse},
    error::RelayError,
    transport::{MailTransport, OutboundMessage},
};

pub const API_KEY_HEADER: &str = "x-api-key";

pub const SUCCESS_MESSAGE: &str = "Email sent successfully!";

pub struct RelayService {
    config: Arc<Config>,
    transport: Arc<dyn MailTransport>,
}

/// A request payload with every required field present.
struct ValidatedRequest {
    recipient: String,
    subject: String,
    message: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize_origin(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

/// The caller's origin: the `Origin` header, or the origin of `Referer`
/// when no `Origin` was sent at all.
fn request_origin(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = headers.get(header::ORIGIN) {
        return origin
            .to_str()
            .ok()
            .map(|origin| normalize_origin(origin).to_string());
    }

    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok())?;
    let origin = Url::parse(referer).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

impl RelayService {
    pub fn new(config: Arc<Config>, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let Some(expected) = self.config.api_key() else {
            return Ok(());
        };

        match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            Some(provided) if provided == expected => Ok(()),
            _ => Err(RelayError::Unauthorized),
        }
    }

    fn check_origin(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let allowed = normalize_origin(&self.config.allowed_domain);
        match request_origin(headers) {
            Some(origin) if origin == allowed => Ok(()),
            other => {
                tracing::debug!("Rejected origin {:?}, expected '{}'", other, allowed);
                Err(RelayError::Forbidden)
            }
        }
    }

    fn validate(request: SendEmailRequest) -> Result<ValidatedRequest, RelayError> {
        let recipient = non_empty(request.recipient);
        let subject = non_empty(request.subject);
        let message = non_empty(request.message);

        match (recipient, subject, message) {
            (Some(recipient), Some(subject), Some(message)) => {
                let recipient = recipient.trim().to_string();
                recipient
                    .parse::<Address>()
                    .map_err(|e| RelayError::InvalidRecipient(e.to_string()))?;
                Ok(ValidatedRequest {
                    recipient,
                    subject,
                    message,
                })
            }
            (recipient, subject, message) => Err(RelayError::MissingFields(
                [
                    ("recipient", recipient.is_none()),
                    ("subject", subject.is_none()),
                    ("message", message.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, missing)| missing.then_some(name))
                .collect(),
            )),
        }
    }

    /// Runs the authorization, origin, configuration and payload checks in
    /// that order, then hands one message to the transport.
    ///
    /// `payload` is `Err` with a description when the body was not valid JSON.
    pub async fn relay(
        &self,
        headers: &HeaderMap,
        payload: Result<SendEmailRequest, String>,
    ) -> Result<SendEmailResponse, RelayError> {
        self.authorize(headers)?;
        self.check_origin(headers)?;

        let settings = self
            .config
            .smtp_settings()
            .map_err(RelayError::Configuration)?;
        settings
            .sender
            .parse::<Address>()
            .map_err(|e| RelayError::InvalidSender(e.to_string()))?;

        let request = Self::validate(payload.map_err(RelayError::MalformedPayload)?)?;

        tracing::info!(
            "Relaying email to '{}' with subject '{}'",
            request.recipient,
            request.subject
        );

        let message = OutboundMessage {
            from: settings.sender.clone(),
            to: request.recipient,
            subject: request.subject,
            body: request.message,
        };

        self.transport.send(&settings, message).await?;

        Ok(SendEmailResponse {
            message: SUCCESS_MESSAGE.to_string(),
        })
    }
}
