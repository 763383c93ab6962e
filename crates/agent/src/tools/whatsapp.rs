use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{required_str, Tool};

/// Sends a text message through the WhatsApp Cloud API.
pub struct SendWhatsAppMessageTool {
    http: reqwest::Client,
    token: SecretString,
    number_id: String,
    api_base: String,
}

impl SendWhatsAppMessageTool {
    pub fn new(
        http: reqwest::Client,
        token: SecretString,
        number_id: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self { http, token, number_id: number_id.into(), api_base: api_base.into() }
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base.trim_end_matches('/'), self.number_id)
    }
}

pub(crate) fn text_message_payload(recipient: &str, message: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": recipient,
        "type": "text",
        "text": {"body": message}
    })
}

#[async_trait]
impl Tool for SendWhatsAppMessageTool {
    fn name(&self) -> &str {
        "send_whatsapp_message"
    }

    fn description(&self) -> &str {
        "Sends a WhatsApp text message to the given recipient phone number."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": {"type": "string", "description": "Recipient phone number."},
                "message": {"type": "string", "description": "Text to deliver."}
            },
            "required": ["recipient", "message"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let recipient = required_str(&arguments, "recipient")?;
        let message = required_str(&arguments, "message")?;

        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(self.token.expose_secret())
            .json(&text_message_payload(recipient, message))
            .send()
            .await
            .context("whatsapp request failed")?;

        let status = response.status();
        let body: Value = response.json().await.context("whatsapp returned invalid JSON")?;
        if !status.is_success() {
            bail!("whatsapp send failed: {} - {}", status.as_u16(), body);
        }
        Ok(body)
    }
}
