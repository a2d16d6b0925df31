use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use std::time::Duration;

use crate::config::{SmtpSettings, TlsMode};

/// Bound on a whole session, in multiples of the per-operation timeout.
const SESSION_DEADLINE_FACTOR: u32 = 3;

/// A composed plain-text message, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid email address format: {0}")]
    AddressFormat(#[from] lettre::address::AddressError),

    #[error("Failed to build email message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    SmtpTransport(#[from] lettre::transport::smtp::Error),

    #[error("Failed to connect to SMTP relay: {0}")]
    SmtpRelay(lettre::transport::smtp::Error),

    /// The session failed outside a single SMTP exchange.
    #[error("{0}")]
    Session(String),
}

/// Delivers one message per call. Implementations must not retry.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn send(
        &self,
        settings: &SmtpSettings,
        message: OutboundMessage,
    ) -> Result<(), TransportError>;
}

impl TryFrom<OutboundMessage> for Message {
    type Error = TransportError;

    fn try_from(message: OutboundMessage) -> Result<Self, Self::Error> {
        Ok(Self::builder()
            .from(message.from.parse()?)
            .to(message.to.parse()?)
            .subject(message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body)?)
    }
}

fn session_expired(deadline: Duration) -> TransportError {
    TransportError::Session(format!(
        "SMTP session did not complete within {}",
        humantime_serde::re::humantime::format_duration(deadline)
    ))
}

/// Start-up note on how the SMTP connection is secured.
pub fn tls_notice(tls: TlsMode) -> String {
    let mode = match tls {
        TlsMode::Starttls => "STARTTLS",
        TlsMode::Implicit => "implicit TLS",
    };
    format!(
        "SMTP uses {mode} with the platform TLS defaults; legacy renegotiation is not enabled, \
         servers that require it will fail the handshake"
    )
}

/// SMTP delivery over STARTTLS or implicit TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    fn transport(
        settings: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let builder = match settings.tls {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host),
            TlsMode::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            }
        }
        .map_err(TransportError::SmtpRelay)?;

        let creds = Credentials::new(settings.username.clone(), settings.password.clone());

        Ok(builder
            .port(settings.port)
            .timeout(Some(settings.timeout))
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        settings: &SmtpSettings,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let to = message.to.clone();
        let email = Message::try_from(message)?;
        let mailer = Self::transport(settings)?;

        tracing::debug!(
            "Opening SMTP session to {}:{} ({:?})",
            settings.host,
            settings.port,
            settings.tls
        );

        let deadline = settings.timeout * SESSION_DEADLINE_FACTOR;
        tokio::time::timeout(deadline, mailer.send(email))
            .await
            .map_err(|_| session_expired(deadline))??;

        tracing::info!("Message to {} accepted by {}", to, settings.host);

        Ok(())
    }
}
