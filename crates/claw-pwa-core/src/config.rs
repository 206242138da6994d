//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ClawPwaError, Result};
use crate::protocol::{ClientInfo, ThinkingMode};

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Top-level ClawPWA configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Handshake timeout in seconds (default: 30).
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.into()
}

fn default_gateway_timeout() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
            token_env: None,
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl GatewayConfig {
    /// `token`, falling back to the variable named by `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

/// Client descriptor announced in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_id")]
    pub id: String,
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_client_platform")]
    pub platform: String,
    #[serde(default = "default_client_mode")]
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_client_id() -> String {
    "webchat-ui".into()
}

fn default_client_version() -> String {
    "1.0.0".into()
}

fn default_client_platform() -> String {
    "web".into()
}

fn default_client_mode() -> String {
    "webchat".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            version: default_client_version(),
            platform: default_client_platform(),
            mode: default_client_mode(),
            display_name: None,
        }
    }
}

impl ClientConfig {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            version: Some(self.version.clone()),
            platform: Some(self.platform.clone()),
            mode: Some(self.mode.clone()),
        }
    }
}

/// Defaults for chat operations and the run watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_session_key")]
    pub session_key: String,

    /// `"auto"`, another mode name, or `"true"`/`"false"`.
    #[serde(default = "default_thinking")]
    pub thinking: String,

    #[serde(default = "default_true")]
    pub deliver: bool,

    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Max silence between run events before the run is given up (default: 30).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Max total duration of a run (default: 90).
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_session_key() -> String {
    "global".into()
}

fn default_thinking() -> String {
    "auto".into()
}

fn default_true() -> bool {
    true
}

fn default_history_limit() -> u32 {
    10
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_run_timeout() -> u64 {
    90
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_key: default_session_key(),
            thinking: default_thinking(),
            deliver: true,
            history_limit: default_history_limit(),
            idle_timeout_secs: default_idle_timeout(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

impl ChatConfig {
    pub fn thinking_mode(&self) -> ThinkingMode {
        ThinkingMode::from(self.thinking.as_str())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Bridge server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Allowed CORS origins; `"*"` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_server_port() -> u16 {
    36006
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `plain` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Base level, e.g. `warn`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "claw_pwa_client=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// `stderr` or `stdout`.
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

/// First non-empty value of `direct` or the variable named by `env_var`.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    direct
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            env_var
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|v| !v.is_empty())
        })
}

static ENV_VAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

/// Expand `${NAME}` references; unset variables expand to "".
fn expand_env_refs(input: &str) -> String {
    match ENV_VAR_PATTERN.as_ref() {
        Some(pattern) => pattern
            .replace_all(input, |caps: &regex::Captures| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        None => input.to_string(),
    }
}

impl Config {
    /// Read a JSON5 config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = expand_env_refs(&std::fs::read_to_string(path)?);
        let config = json5::from_str::<Config>(&text)
            .map_err(|e| ClawPwaError::Config(format!("{}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Default config file location: `~/.claw_pwa/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Apply command-line overrides; flags win over file values.
    pub fn apply_overrides(
        &mut self,
        gateway_url: Option<String>,
        token: Option<String>,
        port: Option<u16>,
    ) {
        if let Some(url) = gateway_url {
            self.gateway.get_or_insert_with(GatewayConfig::default).url = url;
        }
        if let Some(token) = token {
            self.gateway.get_or_insert_with(GatewayConfig::default).token = Some(token);
        }
        if let Some(port) = port {
            self.server.get_or_insert_with(ServerConfig::default).port = port;
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn gateway_url(&self) -> String {
        self.gateway
            .as_ref()
            .map(|g| g.url.clone())
            .unwrap_or_else(default_gateway_url)
    }

    pub fn gateway_token(&self) -> Option<String> {
        self.gateway.as_ref().and_then(|g| g.resolve_token())
    }

    /// Handshake timeout.
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .as_ref()
                .map(|g| g.timeout_secs)
                .unwrap_or_else(default_gateway_timeout),
        )
    }

    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Look up a dotted key such as `chat.session_key`.
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let root = serde_json::to_value(self).ok()?;
        path.split('.')
            .try_fold(&root, |node, key| node.get(key))
            .cloned()
    }

    /// Check the config. Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let (mut warnings, mut errors) = (Vec::new(), Vec::new());

        let url = self.gateway_url();
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            errors.push(format!("Gateway URL must use ws:// or wss://: {url}"));
        }

        if self.gateway_token().is_none() {
            warnings.push("Gateway token not configured; connect will carry no auth".to_string());
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        if let Some(chat) = &self.chat {
            if chat.history_limit == 0 {
                warnings.push("chat.history_limit is 0; history requests return nothing".to_string());
            }
            if chat.idle_timeout_secs > chat.run_timeout_secs {
                warnings.push(format!(
                    "chat.idle_timeout_secs ({}) exceeds chat.run_timeout_secs ({})",
                    chat.idle_timeout_secs, chat.run_timeout_secs
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for ClawPWA data: `~/.claw_pwa/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claw_pwa")
}
