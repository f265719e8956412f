//! SMTP delivery: one envelope per alert addressed to the platform group's
//! full recipient batch.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use super::config::EmailPlatformConfig;

/// Transport seam so fan-out can be exercised without an SMTP server.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_batch(
        &self,
        config: &EmailPlatformConfig,
        recipients: &[String],
        subject: &str,
        body_html: String,
    ) -> anyhow::Result<()>;
}

pub struct SmtpEmailTransport;

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    #[instrument(skip_all, fields(recipients = recipients.len()))]
    async fn send_batch(
        &self,
        config: &EmailPlatformConfig,
        recipients: &[String],
        subject: &str,
        body_html: String,
    ) -> anyhow::Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }

        let mut builder = Message::builder()
            .from(config.from_address.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);

        for recipient in recipients {
            builder = builder.to(recipient.parse()?);
        }

        let email = builder.body(body_html)?;

        let mailer: AsyncSmtpTransport<Tokio1Executor> = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)?
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .port(config.smtp_port)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_server)
                .port(config.smtp_port)
                .build()
        };

        mailer.send(email).await?;
        debug!("alert email batch delivered");
        Ok(())
    }
}
