use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Alert, NotificationError, Notifier};
use crate::config::EmailConfig;

/// Plain-text mail over an authenticated STARTTLS relay.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Must be called inside a Tokio runtime: the SMTP connection pool starts
    /// its background task on construction.
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let from: Mailbox = config.address.parse()?;
        let to: Mailbox = config.recipient.parse()?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.address.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { mailer, from, to })
    }

    pub fn build_message(&self, alert: &Alert) -> Result<Message, NotificationError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(alert.email_body())?)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let message = self.build_message(alert)?;
        self.mailer.send(message).await?;
        log::debug!("Email accepted by relay for {}", self.to);
        Ok(())
    }
}
