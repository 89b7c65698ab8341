use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Content id the HTML body uses to reference the inline QR image.
pub const QR_CONTENT_ID: &str = "qrcode";

/// A rendered ticket confirmation ready for delivery.
pub struct TicketEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub qr_png: Vec<u8>,
    pub pdf: Vec<u8>,
    pub pdf_filename: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: TicketEmail) -> Result<()>;
}

pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(config.username, config.password))
            .build();
        let from = config.from.parse()?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: TicketEmail) -> Result<()> {
        let png = ContentType::parse("image/png")?;
        let pdf = ContentType::parse("application/pdf")?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject)
            .multipart(
                MultiPart::mixed()
                    .multipart(
                        MultiPart::related()
                            .singlepart(SinglePart::html(email.html))
                            .singlepart(
                                Attachment::new_inline(QR_CONTENT_ID.to_string())
                                    .body(email.qr_png, png),
                            ),
                    )
                    .singlepart(Attachment::new(email.pdf_filename).body(email.pdf, pdf)),
            )?;

        let response = self.transport.send(message).await?;
        info!("Ticket email sent to {} ({})", email.to, response.code());
        Ok(())
    }
}

/// Used when no SMTP relay is configured: logs instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: TicketEmail) -> Result<()> {
        info!(
            "Mail transport not configured; would send '{}' to {} with {} ({} bytes)",
            email.subject,
            email.to,
            email.pdf_filename,
            email.pdf.len()
        );
        Ok(())
    }
}
