//! Outbound mail: digests, invitations and operator alerts over SMTP via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::NotifyError;

/// Delivery of a plain-text message to a set of recipients.
///
/// Fire-and-forget: success means the transport accepted the message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str)
    -> Result<(), NotifyError>;
}

/// Trim, drop empties and de-duplicate (case-insensitively) a recipient list,
/// keeping first-seen order.
pub fn normalize_recipients<I, S>(recipients: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for r in recipients {
        let r = r.as_ref().trim();
        if r.is_empty() || out.iter().any(|o| o.eq_ignore_ascii_case(r)) {
            continue;
        }
        out.push(r.to_string());
    }
    out
}

/// Split a `;` or `,` separated address list.
pub fn split_addresses(list: &str) -> Vec<String> {
    normalize_recipients(list.split([';', ',']))
}

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if neither `EMAIL_SMTP_HOST` nor `EMAIL_IMAP_HOST` is set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_SMTP_HOST").ok().or_else(|| {
            std::env::var("EMAIL_IMAP_HOST")
                .ok()
                .map(|h| h.replace("imap", "smtp"))
        })?;
        let port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Notifier that relays through an authenticated SMTP server.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn from_address(&self) -> &str {
        &self.config.from_address
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Build the outgoing message.
fn build_message(
    from: &str,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> Result<Message, NotifyError> {
    if recipients.is_empty() {
        return Err(NotifyError::NoRecipients);
    }
    let mut builder = Message::builder().from(parse_mailbox(from)?).subject(subject);
    for to in recipients {
        builder = builder.to(parse_mailbox(to)?);
    }
    builder
        .body(body.to_string())
        .map_err(|e| NotifyError::Build(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let recipients = normalize_recipients(recipients);
        let email = build_message(&self.config.from_address, &recipients, subject, body)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| NotifyError::Send(format!("SMTP relay error: {e}")))?
                .port(config.port)
                .credentials(creds)
                .build();
            transport
                .send(&email)
                .map_err(|e| NotifyError::Send(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::Send(format!("send task panicked: {e}")))??;

        tracing::info!(recipients = recipients.len(), subject, "Email sent");
        Ok(())
    }
}
