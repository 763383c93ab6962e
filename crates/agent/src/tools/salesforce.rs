use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use operator_db::SalesforceCredentialStore;

use super::{required_str, Tool};

/// Builds the OAuth authorize URL a user follows to connect their Salesforce org.
pub struct SalesforceOAuthUrlTool {
    domain: String,
    client_id: String,
    redirect_uri: String,
}

impl SalesforceOAuthUrlTool {
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn authorize_url(&self, profile_id: &str) -> Result<Url> {
        let base = format!("https://{}/services/oauth2/authorize", self.domain);
        let state = format!("profile:{profile_id}");
        Url::parse_with_params(
            &base,
            [
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", "api"),
                ("state", state.as_str()),
            ],
        )
        .with_context(|| format!("invalid salesforce domain `{}`", self.domain))
    }
}

#[async_trait]
impl Tool for SalesforceOAuthUrlTool {
    fn name(&self) -> &str {
        "generate_salesforce_oauth_url"
    }

    fn description(&self) -> &str {
        "Generates the Salesforce OAuth2 authorization URL the user must open to connect \
         their Salesforce account to the given profile."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "profile_id": {"type": "string", "description": "Profile the connection is for."}
            },
            "required": ["profile_id"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let profile_id = required_str(&arguments, "profile_id")?;
        Ok(Value::String(self.authorize_url(profile_id)?.to_string()))
    }
}

/// Runs a SOQL query with the stored access token of a profile.
pub struct ExecuteSoqlTool {
    http: reqwest::Client,
    credentials: Arc<dyn SalesforceCredentialStore>,
    api_version: String,
}

impl ExecuteSoqlTool {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<dyn SalesforceCredentialStore>,
        api_version: impl Into<String>,
    ) -> Self {
        Self { http, credentials, api_version: api_version.into() }
    }
}

#[async_trait]
impl Tool for ExecuteSoqlTool {
    fn name(&self) -> &str {
        "execute_salesforce_soql"
    }

    fn description(&self) -> &str {
        "Executes a read-only SOQL query against the user's Salesforce org and returns the \
         matching records."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "soql_query": {"type": "string", "description": "The SOQL query to execute."},
                "profile_id": {
                    "type": "string",
                    "description": "Profile whose Salesforce credentials are used."
                }
            },
            "required": ["soql_query", "profile_id"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let soql_query = required_str(&arguments, "soql_query")?;
        let profile_id = required_str(&arguments, "profile_id")?;

        let credential = self
            .credentials
            .find(profile_id)
            .await?
            .ok_or_else(|| {
                anyhow!("no Salesforce credentials stored for profile `{profile_id}`")
            })?;
        if credential.access_token.is_empty() || credential.instance_url.is_empty() {
            bail!("missing access_token or instance_url for profile `{profile_id}`");
        }

        let url = format!(
            "{}/services/data/{}/query",
            credential.instance_url.trim_end_matches('/'),
            self.api_version
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&credential.access_token)
            .query(&[("q", soql_query)])
            .send()
            .await
            .context("salesforce request failed")?;

        let status = response.status();
        let body = response.text().await.context("failed to read salesforce response")?;
        if !status.is_success() {
            bail!("salesforce query failed: {} - {}", status.as_u16(), body);
        }

        let parsed: Value =
            serde_json::from_str(&body).context("salesforce returned invalid JSON")?;
        Ok(parsed.get("records").cloned().unwrap_or_else(|| Value::Array(Vec::new())))
    }
}
