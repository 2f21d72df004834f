//! Emailing rendered invoices.

use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use service_core::error::AppError;

use crate::config::SmtpConfig;
use crate::services::rendering::RenderedDocument;

#[derive(Debug, Clone)]
pub struct InvoiceEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: RenderedDocument,
}

/// Outcome of a send attempt. Delivery failures land here, not in `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub recipient: String,
    pub detail: Option<String>,
}

#[async_trait]
pub trait InvoiceMailer: Send + Sync {
    async fn deliver(&self, email: &InvoiceEmail) -> Result<(), AppError>;
}

pub fn invoice_subject(invoice_number: &str, business_name: &str) -> String {
    format!("Invoice {} from {}", invoice_number, business_name)
}

pub fn invoice_body(
    to_name: &str,
    invoice_number: &str,
    total: &str,
    message: Option<&str>,
    business_name: &str,
) -> String {
    let mut body = format!(
        "Hi {},\n\nPlease find attached invoice {} for {}.\n\n",
        to_name, invoice_number, total
    );
    if let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) {
        body.push_str(message);
        body.push_str("\n\n");
    }
    body.push_str("Thank you for your business!\n\nBest regards,\n");
    body.push_str(business_name);
    body
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, AppError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AppError::ConfigError(anyhow!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }

    fn build_message(&self, email: &InvoiceEmail) -> Result<Message, AppError> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow!("Invalid from address: {}", e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| AppError::invalid("recipient", format!("'{}' is not a valid address", email.to)))?;
        let content_type = ContentType::parse(&email.attachment.content_type)
            .map_err(|e| AppError::InternalError(anyhow!("Invalid attachment type: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.body.clone()),
                    )
                    .singlepart(
                        Attachment::new(email.attachment.file_name.clone())
                            .body(email.attachment.bytes.clone(), content_type),
                    ),
            )
            .map_err(|e| AppError::InternalError(anyhow!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl InvoiceMailer for SmtpMailer {
    async fn deliver(&self, email: &InvoiceEmail) -> Result<(), AppError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured(anyhow!("SMTP delivery is not enabled")))?;

        let message = self.build_message(email)?;
        transport
            .send(message)
            .await
            .map_err(|e| AppError::ExternalServiceError(anyhow!("Failed to send email: {}", e)))?;

        tracing::info!(to = %email.to, subject = %email.subject, "Invoice email sent");
        Ok(())
    }
}

/// Records every email instead of sending it. Fails on demand.
#[derive(Default)]
pub struct MockMailer {
    fail: bool,
    sent: Mutex<Vec<InvoiceEmail>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<InvoiceEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InvoiceMailer for MockMailer {
    async fn deliver(&self, email: &InvoiceEmail) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::ExternalServiceError(anyhow!(
                "mock mailer rejected message to {}",
                email.to
            )));
        }
        tracing::info!(to = %email.to, subject = %email.subject, "[MOCK] Invoice email would be sent");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            user: String::new(),
            password: String::new(),
            from_email: "billing@example.com".to_string(),
            from_name: "Spark Electric".to_string(),
            enabled,
        }
    }

    fn email(to: &str) -> InvoiceEmail {
        InvoiceEmail {
            to: to.to_string(),
            subject: invoice_subject("2024-0008", "Spark Electric"),
            body: "body".to_string(),
            attachment: RenderedDocument {
                file_name: "invoice-2024-0008.txt".to_string(),
                content_type: "text/plain; charset=utf-8".to_string(),
                bytes: b"Invoice 2024-0008".to_vec(),
            },
        }
    }

    #[test]
    fn body_includes_optional_message() {
        let body = invoice_body("Dana", "2024-0008", "$290.85", Some("Net 30 please."), "Spark");
        assert!(body.starts_with("Hi Dana,"));
        assert!(body.contains("invoice 2024-0008 for $290.85"));
        assert!(body.contains("Net 30 please."));
        assert!(body.ends_with("Best regards,\nSpark"));

        let body = invoice_body("Dana", "2024-0008", "$290.85", Some("  "), "Spark");
        assert!(!body.contains("\n\n\n\n"));
    }

    #[test]
    fn subject_names_invoice_and_business() {
        assert_eq!(
            invoice_subject("2024-0008", "Spark Electric"),
            "Invoice 2024-0008 from Spark Electric"
        );
    }

    #[tokio::test]
    async fn message_rejects_bad_recipient() {
        let mailer = SmtpMailer::new(config(true)).unwrap();
        assert!(mailer.build_message(&email("dana@example.com")).is_ok());
        let err = mailer.build_message(&email("not an address")).unwrap_err();
        assert_eq!(err.field(), Some("recipient"));
    }

    #[tokio::test]
    async fn disabled_smtp_is_not_configured() {
        let mailer = SmtpMailer::new(config(false)).unwrap();
        let err = mailer.deliver(&email("dana@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn mock_records_or_fails() {
        let mailer = MockMailer::new();
        mailer.deliver(&email("dana@example.com")).await.unwrap();
        assert_eq!(mailer.sent().len(), 1);

        let failing = MockMailer::failing();
        assert!(failing.deliver(&email("dana@example.com")).await.is_err());
        assert!(failing.sent().is_empty());
    }
}
