use async_trait::async_trait;
use clientmon_common::types::ChannelKind;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::any_succeeded;
use crate::error::{NotifyError, Result};
use crate::utils::format_data;
use crate::{NotificationChannel, OutgoingMessage};

/// `[notify.email]` SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// Use STARTTLS on a plain connection instead of implicit TLS.
    #[serde(default)]
    pub starttls: bool,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    465
}

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        };
        let mut builder = builder
            .map_err(|e| NotifyError::InvalidConfig(format!("smtp_host: {e}")))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = config
            .from
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("from address '{}': {e}", config.from)))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn subject(message: &OutgoingMessage<'_>) -> String {
        let n = message.notification;
        match message.client_name {
            Some(client) => format!(
                "[clientmon][{}] {} - {}",
                n.notification_type, n.title, client
            ),
            None => format!("[clientmon][{}] {}", n.notification_type, n.title),
        }
    }

    fn format_body(message: &OutgoingMessage<'_>) -> String {
        let n = message.notification;
        let client_line = match (message.client_name, n.client_id.as_deref()) {
            (Some(name), Some(id)) => format!("\nClient: {name} ({id})"),
            (None, Some(id)) => format!("\nClient: {id}"),
            (Some(name), None) => format!("\nClient: {name}"),
            (None, None) => String::new(),
        };
        let details = format_data(&n.data);
        let details_line = if details.is_empty() {
            String::new()
        } else {
            format!("\nDetails: {details}")
        };
        format!(
            "{title}\nType: {kind}{client_line}\n\n{message}{details_line}\nTime: {time}",
            title = n.title,
            kind = n.notification_type,
            message = n.message,
            time = n.created_at.to_rfc3339(),
        )
    }

    async fn send_one(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::SmtpError(format!("invalid recipient '{recipient}': {e}")))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::SmtpError(e.to_string()))?;

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self.transport.send(email.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        recipient = %recipient,
                        error = %e,
                        "Email send failed, retrying"
                    );
                    last_err = Some(e);
                    if attempt < 2 {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            100 * 2u64.pow(attempt),
                        ))
                        .await;
                    }
                }
            }
        }
        Err(NotifyError::SmtpError(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, message: &OutgoingMessage<'_>) -> Result<()> {
        if message.recipients.is_empty() {
            return Err(NotifyError::NoRecipients(ChannelKind::Email));
        }
        let subject = Self::subject(message);
        let body = Self::format_body(message);

        let mut outcomes = Vec::with_capacity(message.recipients.len());
        for recipient in message.recipients {
            let outcome = self.send_one(recipient, &subject, &body).await;
            outcomes.push((recipient.clone(), outcome));
        }
        any_succeeded(ChannelKind::Email, outcomes)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }
}
