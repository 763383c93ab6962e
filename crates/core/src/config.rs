use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pruning::PruningPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub checkpoint: CheckpointConfig,
    pub pruning: PruningConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub ttl_secs: u64,
    pub max_read_units: u32,
    pub max_write_units: u32,
    pub capacity_window_secs: u64,
    pub save_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct PruningConfig {
    pub min_keep: usize,
    pub delete_trigger: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub system_prompt_path: Option<PathBuf>,
    pub max_iterations: u32,
    pub conflict_retries: u32,
    pub parallel_tools: bool,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub salesforce_domain: Option<String>,
    pub salesforce_client_id: Option<String>,
    pub salesforce_redirect_uri: Option<String>,
    pub salesforce_api_version: String,
    pub whatsapp_token: Option<SecretString>,
    pub whatsapp_number_id: Option<String>,
    pub whatsapp_api_base: String,
    /// Shared by the tools' HTTP client and the per-call dispatch timeout.
    pub timeout_secs: u64,
    /// Streamable HTTP endpoint of an MCP server; when set, each turn uses its tool list.
    pub mcp_server_url: Option<String>,
    pub email: EmailConfig,
}

/// SMTP relay for `send_email`. SES exposes the same interface on its SMTP endpoint.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<SecretString>,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub agent_max_iterations: Option<u32>,
    pub pruning_min_keep: Option<usize>,
    pub pruning_delete_trigger: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("could not read system prompt `{path}`: {source}")]
    ReadPrompt { path: PathBuf, source: std::io::Error },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://operator.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            checkpoint: CheckpointConfig {
                ttl_secs: 86_400,
                max_read_units: 100,
                max_write_units: 100,
                capacity_window_secs: 1,
                save_retries: 3,
                retry_base_delay_ms: 200,
            },
            pruning: PruningConfig { min_keep: 20, delete_trigger: 30 },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                retry_base_delay_ms: 500,
            },
            agent: AgentConfig {
                name: "sf-agent".to_string(),
                system_prompt_path: None,
                max_iterations: 10,
                conflict_retries: 1,
                parallel_tools: true,
            },
            tools: ToolsConfig {
                salesforce_domain: None,
                salesforce_client_id: None,
                salesforce_redirect_uri: None,
                salesforce_api_version: "v60.0".to_string(),
                whatsapp_token: None,
                whatsapp_number_id: None,
                whatsapp_api_base: "https://graph.facebook.com/v22.0".to_string(),
                timeout_secs: 30,
                mcp_server_url: None,
                email: EmailConfig {
                    smtp_host: None,
                    smtp_port: 587,
                    smtp_username: None,
                    smtp_password: None,
                    from: "agent@mockify.com".to_string(),
                },
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl PruningConfig {
    pub fn policy(&self) -> PruningPolicy {
        PruningPolicy::new(self.min_keep, self.delete_trigger)
    }
}

impl AgentConfig {
    /// Reads the configured system prompt, or returns the built-in one.
    pub fn load_system_prompt(&self) -> Result<String, ConfigError> {
        match &self.system_prompt_path {
            Some(path) => fs::read_to_string(path)
                .map_err(|source| ConfigError::ReadPrompt { path: path.clone(), source }),
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are sf-agent, an assistant that answers questions \
about the user's Salesforce data and relays answers on the user's channels. Use the available \
tools to query Salesforce or deliver messages. When you are done, reply with a single JSON \
object and nothing else: {\"nextagent\": \"END\", \"message\": \"<text shown to the user>\"}.";

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("operator.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(checkpoint) = patch.checkpoint {
            if let Some(ttl_secs) = checkpoint.ttl_secs {
                self.checkpoint.ttl_secs = ttl_secs;
            }
            if let Some(max_read_units) = checkpoint.max_read_units {
                self.checkpoint.max_read_units = max_read_units;
            }
            if let Some(max_write_units) = checkpoint.max_write_units {
                self.checkpoint.max_write_units = max_write_units;
            }
            if let Some(capacity_window_secs) = checkpoint.capacity_window_secs {
                self.checkpoint.capacity_window_secs = capacity_window_secs;
            }
            if let Some(save_retries) = checkpoint.save_retries {
                self.checkpoint.save_retries = save_retries;
            }
            if let Some(retry_base_delay_ms) = checkpoint.retry_base_delay_ms {
                self.checkpoint.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(pruning) = patch.pruning {
            if let Some(min_keep) = pruning.min_keep {
                self.pruning.min_keep = min_keep;
            }
            if let Some(delete_trigger) = pruning.delete_trigger {
                self.pruning.delete_trigger = delete_trigger;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(name) = agent.name {
                self.agent.name = name;
            }
            if let Some(system_prompt_path) = agent.system_prompt_path {
                self.agent.system_prompt_path = Some(system_prompt_path);
            }
            if let Some(max_iterations) = agent.max_iterations {
                self.agent.max_iterations = max_iterations;
            }
            if let Some(conflict_retries) = agent.conflict_retries {
                self.agent.conflict_retries = conflict_retries;
            }
            if let Some(parallel_tools) = agent.parallel_tools {
                self.agent.parallel_tools = parallel_tools;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(salesforce_domain) = tools.salesforce_domain {
                self.tools.salesforce_domain = Some(salesforce_domain);
            }
            if let Some(salesforce_client_id) = tools.salesforce_client_id {
                self.tools.salesforce_client_id = Some(salesforce_client_id);
            }
            if let Some(salesforce_redirect_uri) = tools.salesforce_redirect_uri {
                self.tools.salesforce_redirect_uri = Some(salesforce_redirect_uri);
            }
            if let Some(salesforce_api_version) = tools.salesforce_api_version {
                self.tools.salesforce_api_version = salesforce_api_version;
            }
            if let Some(whatsapp_token_value) = tools.whatsapp_token {
                self.tools.whatsapp_token = Some(secret_value(whatsapp_token_value));
            }
            if let Some(whatsapp_number_id) = tools.whatsapp_number_id {
                self.tools.whatsapp_number_id = Some(whatsapp_number_id);
            }
            if let Some(whatsapp_api_base) = tools.whatsapp_api_base {
                self.tools.whatsapp_api_base = whatsapp_api_base;
            }
            if let Some(timeout_secs) = tools.timeout_secs {
                self.tools.timeout_secs = timeout_secs;
            }
            if let Some(mcp_server_url) = tools.mcp_server_url {
                self.tools.mcp_server_url = Some(mcp_server_url);
            }
            if let Some(email) = tools.email {
                if let Some(smtp_host) = email.smtp_host {
                    self.tools.email.smtp_host = Some(smtp_host);
                }
                if let Some(smtp_port) = email.smtp_port {
                    self.tools.email.smtp_port = smtp_port;
                }
                if let Some(smtp_username) = email.smtp_username {
                    self.tools.email.smtp_username = Some(smtp_username);
                }
                if let Some(smtp_password) = email.smtp_password {
                    self.tools.email.smtp_password = Some(secret_value(smtp_password));
                }
                if let Some(from) = email.from {
                    self.tools.email.from = from;
                }
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OPERATOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OPERATOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("OPERATOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("OPERATOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPERATOR_CHECKPOINT_TTL_SECS") {
            self.checkpoint.ttl_secs = parse_env("OPERATOR_CHECKPOINT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_CHECKPOINT_MAX_READ_UNITS") {
            self.checkpoint.max_read_units =
                parse_env("OPERATOR_CHECKPOINT_MAX_READ_UNITS", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_CHECKPOINT_MAX_WRITE_UNITS") {
            self.checkpoint.max_write_units =
                parse_env("OPERATOR_CHECKPOINT_MAX_WRITE_UNITS", &value)?;
        }

        let min_keep =
            read_env("OPERATOR_PRUNING_MIN_KEEP").or_else(|| read_env("MSG_HISTORY_TO_KEEP"));
        if let Some(value) = min_keep {
            self.pruning.min_keep = parse_env("OPERATOR_PRUNING_MIN_KEEP", &value)?;
        }
        let delete_trigger = read_env("OPERATOR_PRUNING_DELETE_TRIGGER")
            .or_else(|| read_env("DELETE_TRIGGER_COUNT"));
        if let Some(value) = delete_trigger {
            self.pruning.delete_trigger = parse_env("OPERATOR_PRUNING_DELETE_TRIGGER", &value)?;
        }

        if let Some(value) = read_env("OPERATOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("OPERATOR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPERATOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        let model = read_env("OPERATOR_LLM_MODEL").or_else(|| read_env("MODEL_NAME"));
        if let Some(value) = model {
            self.llm.model = value;
        }
        if let Some(value) = read_env("OPERATOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("OPERATOR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("OPERATOR_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("OPERATOR_AGENT_NAME") {
            self.agent.name = value;
        }
        if let Some(value) = read_env("OPERATOR_AGENT_SYSTEM_PROMPT_PATH") {
            self.agent.system_prompt_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("OPERATOR_AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("OPERATOR_AGENT_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_AGENT_CONFLICT_RETRIES") {
            self.agent.conflict_retries = parse_env("OPERATOR_AGENT_CONFLICT_RETRIES", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_AGENT_PARALLEL_TOOLS") {
            self.agent.parallel_tools = parse_env("OPERATOR_AGENT_PARALLEL_TOOLS", &value)?;
        }

        if let Some(value) = read_env("OPERATOR_SALESFORCE_DOMAIN") {
            self.tools.salesforce_domain = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SALESFORCE_CLIENT_ID") {
            self.tools.salesforce_client_id = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SALESFORCE_REDIRECT_URI") {
            self.tools.salesforce_redirect_uri = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SALESFORCE_API_VERSION") {
            self.tools.salesforce_api_version = value;
        }
        if let Some(value) = read_env("OPERATOR_WHATSAPP_TOKEN") {
            self.tools.whatsapp_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPERATOR_WHATSAPP_NUMBER_ID") {
            self.tools.whatsapp_number_id = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_TOOLS_TIMEOUT_SECS") {
            self.tools.timeout_secs = parse_env("OPERATOR_TOOLS_TIMEOUT_SECS", &value)?;
        }
        let mcp_server_url =
            read_env("OPERATOR_MCP_SERVER_URL").or_else(|| read_env("MCP_SERVER_URL"));
        if let Some(value) = mcp_server_url {
            self.tools.mcp_server_url = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SMTP_HOST") {
            self.tools.email.smtp_host = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SMTP_PORT") {
            self.tools.email.smtp_port = parse_env("OPERATOR_SMTP_PORT", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_SMTP_USERNAME") {
            self.tools.email.smtp_username = Some(value);
        }
        if let Some(value) = read_env("OPERATOR_SMTP_PASSWORD") {
            self.tools.email.smtp_password = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPERATOR_EMAIL_FROM").or_else(|| read_env("EMAIL_FROM")) {
            self.tools.email.from = value;
        }

        if let Some(value) = read_env("OPERATOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("OPERATOR_SERVER_PORT") {
            self.server.port = parse_env("OPERATOR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("OPERATOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("OPERATOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("OPERATOR_LOGGING_LEVEL").or_else(|| read_env("OPERATOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OPERATOR_LOGGING_FORMAT").or_else(|| read_env("OPERATOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(max_iterations) = overrides.agent_max_iterations {
            self.agent.max_iterations = max_iterations;
        }
        if let Some(min_keep) = overrides.pruning_min_keep {
            self.pruning.min_keep = min_keep;
        }
        if let Some(delete_trigger) = overrides.pruning_delete_trigger {
            self.pruning.delete_trigger = delete_trigger;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_checkpoint(&self.checkpoint)?;
        validate_pruning(&self.pruning)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_tools(&self.tools)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("operator.toml"), PathBuf::from("config/operator.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_checkpoint(checkpoint: &CheckpointConfig) -> Result<(), ConfigError> {
    if checkpoint.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "checkpoint.ttl_secs must be greater than zero".to_string(),
        ));
    }
    if checkpoint.max_read_units == 0 || checkpoint.max_write_units == 0 {
        return Err(ConfigError::Validation(
            "checkpoint.max_read_units and checkpoint.max_write_units must be greater than zero"
                .to_string(),
        ));
    }
    if checkpoint.capacity_window_secs == 0 {
        return Err(ConfigError::Validation(
            "checkpoint.capacity_window_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_pruning(pruning: &PruningConfig) -> Result<(), ConfigError> {
    if pruning.min_keep == 0 {
        return Err(ConfigError::Validation(
            "pruning.min_keep must be greater than zero".to_string(),
        ));
    }
    if pruning.delete_trigger < pruning.min_keep {
        return Err(ConfigError::Validation(format!(
            "pruning.delete_trigger ({}) must be at least pruning.min_keep ({})",
            pruning.delete_trigger, pruning.min_keep
        )));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model is required".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.name must not be empty".to_string()));
    }
    if agent.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "agent.max_iterations must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if let Some(redirect_uri) = &tools.salesforce_redirect_uri {
        if !redirect_uri.starts_with("http://") && !redirect_uri.starts_with("https://") {
            return Err(ConfigError::Validation(
                "tools.salesforce_redirect_uri must start with http:// or https://".to_string(),
            ));
        }
    }
    if tools.whatsapp_token.is_some() != tools.whatsapp_number_id.is_some() {
        return Err(ConfigError::Validation(
            "tools.whatsapp_token and tools.whatsapp_number_id must be set together".to_string(),
        ));
    }
    if tools.timeout_secs == 0 || tools.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tools.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if let Some(url) = &tools.mcp_server_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "tools.mcp_server_url must start with http:// or https://".to_string(),
            ));
        }
    }
    if tools.email.smtp_username.is_some() != tools.email.smtp_password.is_some() {
        return Err(ConfigError::Validation(
            "tools.email.smtp_username and tools.email.smtp_password must be set together"
                .to_string(),
        ));
    }
    if !tools.email.from.contains('@') {
        return Err(ConfigError::Validation(
            "tools.email.from must be an email address".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    checkpoint: Option<CheckpointPatch>,
    pruning: Option<PruningPatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    tools: Option<ToolsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckpointPatch {
    ttl_secs: Option<u64>,
    max_read_units: Option<u32>,
    max_write_units: Option<u32>,
    capacity_window_secs: Option<u64>,
    save_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PruningPatch {
    min_keep: Option<usize>,
    delete_trigger: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    name: Option<String>,
    system_prompt_path: Option<PathBuf>,
    max_iterations: Option<u32>,
    conflict_retries: Option<u32>,
    parallel_tools: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    salesforce_domain: Option<String>,
    salesforce_client_id: Option<String>,
    salesforce_redirect_uri: Option<String>,
    salesforce_api_version: Option<String>,
    whatsapp_token: Option<String>,
    whatsapp_number_id: Option<String>,
    whatsapp_api_base: Option<String>,
    timeout_secs: Option<u64>,
    mcp_server_url: Option<String>,
    email: Option<EmailPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
