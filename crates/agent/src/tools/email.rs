use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use operator_core::config::EmailConfig;

use super::{required_str, Tool};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

/// Delivers one email and returns the relay's acknowledgement.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<String>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Builds a STARTTLS relay transport. Returns `Ok(None)` when no SMTP host is configured.
    ///
    /// No connection is opened until the first send.
    pub fn from_config(config: &EmailConfig, timeout: Duration) -> Result<Option<Self>> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };
        let from: Mailbox = config
            .from
            .parse()
            .with_context(|| format!("invalid sender address `{}`", config.from))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid smtp host `{host}`"))?
            .port(config.smtp_port)
            .timeout(Some(timeout));
        if let (Some(username), Some(password)) =
            (config.smtp_username.as_ref(), config.smtp_password.as_ref())
        {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Some(Self { transport: builder.build(), from }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<String> {
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("invalid recipient address `{}`", email.to))?;
        let content_type =
            if email.is_html { ContentType::TEXT_HTML } else { ContentType::TEXT_PLAIN };
        let message = lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(content_type)
            .body(email.body)
            .context("could not build email")?;

        let response = self.transport.send(message).await.context("smtp delivery failed")?;
        Ok(response.message().collect::<Vec<_>>().join(" "))
    }
}

/// Sends an email report, optionally as HTML.
pub struct SendEmailTool {
    mailer: Arc<dyn Mailer>,
}

impl SendEmailTool {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

pub(crate) fn outgoing_email(arguments: &Value) -> Result<OutgoingEmail> {
    let to = required_str(arguments, "to_email")?;
    let body = required_str(arguments, "body")?;
    let subject = arguments
        .get("subject")
        .and_then(Value::as_str)
        .filter(|subject| !subject.trim().is_empty())
        .unwrap_or("No Subject");
    let is_html = arguments.get("is_html").and_then(Value::as_bool).unwrap_or(false);

    Ok(OutgoingEmail {
        to: to.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        is_html,
    })
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Sends an email. For formatted reports such as tables or styled text, set is_html to \
         true and write the body as HTML."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to_email": {"type": "string", "description": "Recipient email address."},
                "subject": {"type": "string", "description": "Subject line."},
                "body": {"type": "string", "description": "Email body."},
                "is_html": {"type": "boolean", "description": "Send the body as HTML."}
            },
            "required": ["to_email", "body"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let email = outgoing_email(&arguments)?;
        let recipient = email.to.clone();
        let acknowledgement = self.mailer.send(email).await?;
        Ok(json!({"status": "sent", "to_email": recipient, "relay": acknowledgement}))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    use operator_core::config::AppConfig;

    use super::{outgoing_email, Mailer, OutgoingEmail, SendEmailTool, SmtpMailer};
    use crate::tools::Tool;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> Result<String> {
            self.sent.lock().expect("sent").push(email);
            Ok("250 Ok".to_string())
        }
    }

    #[tokio::test]
    async fn sends_html_reports_through_the_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let tool = SendEmailTool::new(mailer.clone());

        let output = tool
            .execute(json!({
                "to_email": "ana@example.com",
                "subject": "Pipeline",
                "body": "<table></table>",
                "is_html": true
            }))
            .await
            .expect("sent");

        assert_eq!(output["status"], "sent");
        assert_eq!(output["relay"], "250 Ok");
        let sent = mailer.sent.lock().expect("sent");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_html);
        assert_eq!(sent[0].subject, "Pipeline");
    }

    #[test]
    fn subject_and_format_have_defaults() {
        let email = outgoing_email(&json!({"to_email": "ana@example.com", "body": "hi"}))
            .expect("valid arguments");

        assert_eq!(email.subject, "No Subject");
        assert!(!email.is_html);
    }

    #[tokio::test]
    async fn missing_recipient_or_body_fails_before_sending() {
        let mailer = Arc::new(RecordingMailer::default());
        let tool = SendEmailTool::new(mailer.clone());

        let error = tool.execute(json!({"body": "hi"})).await.expect_err("no recipient");
        assert!(error.to_string().contains("to_email"));
        let error =
            tool.execute(json!({"to_email": "ana@example.com"})).await.expect_err("no body");
        assert!(error.to_string().contains("body"));
        assert!(mailer.sent.lock().expect("sent").is_empty());
    }

    #[tokio::test]
    async fn smtp_mailer_is_built_only_when_a_host_is_configured() {
        let mut config = AppConfig::default().tools.email;
        let timeout = Duration::from_secs(5);
        assert!(SmtpMailer::from_config(&config, timeout).expect("no host").is_none());

        config.smtp_host = Some("email-smtp.us-east-1.amazonaws.com".to_string());
        assert!(SmtpMailer::from_config(&config, timeout).expect("relay").is_some());

        config.from = "not an address".to_string();
        assert!(SmtpMailer::from_config(&config, timeout).is_err());
    }
}
