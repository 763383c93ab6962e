use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use operator_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(
        key: &'static str,
        value: impl Into<String>,
        env_keys: &'static [&'static str],
    ) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["OPERATOR_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["OPERATOR_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "checkpoint.ttl_secs",
            config.checkpoint.ttl_secs.to_string(),
            &["OPERATOR_CHECKPOINT_TTL_SECS"],
        ),
        Field::new(
            "checkpoint.max_read_units",
            config.checkpoint.max_read_units.to_string(),
            &["OPERATOR_CHECKPOINT_MAX_READ_UNITS"],
        ),
        Field::new(
            "checkpoint.max_write_units",
            config.checkpoint.max_write_units.to_string(),
            &["OPERATOR_CHECKPOINT_MAX_WRITE_UNITS"],
        ),
        Field::new(
            "pruning.min_keep",
            config.pruning.min_keep.to_string(),
            &["OPERATOR_PRUNING_MIN_KEEP", "MSG_HISTORY_TO_KEEP"],
        ),
        Field::new(
            "pruning.delete_trigger",
            config.pruning.delete_trigger.to_string(),
            &["OPERATOR_PRUNING_DELETE_TRIGGER", "DELETE_TRIGGER_COUNT"],
        ),
        Field::new("llm.provider", config.llm.provider.as_str(), &["OPERATOR_LLM_PROVIDER"]),
        Field::new("llm.model", &config.llm.model, &["OPERATOR_LLM_MODEL", "MODEL_NAME"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["OPERATOR_LLM_BASE_URL"],
        ),
        Field::new(
            "llm.api_key",
            redacted(config.llm.api_key.is_some()),
            &["OPERATOR_LLM_API_KEY"],
        ),
        Field::new("agent.name", &config.agent.name, &["OPERATOR_AGENT_NAME"]),
        Field::new(
            "agent.system_prompt_path",
            config
                .agent
                .system_prompt_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<built-in>".to_string()),
            &["OPERATOR_AGENT_SYSTEM_PROMPT_PATH"],
        ),
        Field::new(
            "agent.max_iterations",
            config.agent.max_iterations.to_string(),
            &["OPERATOR_AGENT_MAX_ITERATIONS"],
        ),
        Field::new(
            "tools.salesforce_domain",
            config.tools.salesforce_domain.as_deref().unwrap_or("<unset>"),
            &["OPERATOR_SALESFORCE_DOMAIN"],
        ),
        Field::new(
            "tools.whatsapp_token",
            redacted(config.tools.whatsapp_token.is_some()),
            &["OPERATOR_WHATSAPP_TOKEN"],
        ),
        Field::new(
            "tools.timeout_secs",
            config.tools.timeout_secs.to_string(),
            &["OPERATOR_TOOLS_TIMEOUT_SECS"],
        ),
        Field::new(
            "tools.mcp_server_url",
            config.tools.mcp_server_url.as_deref().unwrap_or("<unset>"),
            &["OPERATOR_MCP_SERVER_URL", "MCP_SERVER_URL"],
        ),
        Field::new(
            "tools.email.smtp_host",
            config.tools.email.smtp_host.as_deref().unwrap_or("<unset>"),
            &["OPERATOR_SMTP_HOST"],
        ),
        Field::new(
            "tools.email.smtp_password",
            redacted(config.tools.email.smtp_password.is_some()),
            &["OPERATOR_SMTP_PASSWORD"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["OPERATOR_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["OPERATOR_SERVER_PORT"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["OPERATOR_LOGGING_LEVEL", "OPERATOR_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["OPERATOR_LOGGING_FORMAT", "OPERATOR_LOG_FORMAT"],
        ),
    ]
}

fn redacted(present: bool) -> &'static str {
    if present {
        "<redacted>"
    } else {
        "<unset>"
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["operator.toml", "config/operator.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
