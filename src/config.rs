//! Configuration module for gridview.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 5000
//!
//! [hub]
//! session_queue = 256
//!
//! [notifier]
//! enabled = true
//! ledger_path = "versions.yaml"
//!
//! [notifier.repositories.naas-core]
//! name_label = "TalonImageName"
//! tag_label = "TalonImageTag"
//!
//! [notifier.channel]
//! kind = "webhook"
//! url = "${RELEASE_WEBHOOK_URL}"
//! ```

use crate::sink::{
    Ledger, LedgerError, LogChannel, NoopSink, NotifierSink, OutboundChannel, ReleaseNotifier,
    WebhookChannel,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Failed to open ledger: {0}")]
    LedgerError(#[from] LedgerError),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GridviewConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// HTTP listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the webhook endpoint (OPTIONS + POST)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Path subscribers connect to over WebSocket
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            endpoint: default_endpoint(),
            hub_path: default_hub_path(),
        }
    }
}

fn default_port() -> u16 {
    5000
}

fn default_endpoint() -> String {
    "/api/updates".to_string()
}

fn default_hub_path() -> String {
    "/hubs/gridevents".to_string()
}

/// Fan-out hub configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    /// Frames buffered per subscriber before new ones are dropped
    #[serde(default = "default_session_queue")]
    pub session_queue: usize,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_queue: default_session_queue(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

fn default_session_queue() -> usize {
    crate::hub::DEFAULT_SESSION_QUEUE
}

fn default_heartbeat_secs() -> u64 {
    30
}

/// Labels used when announcing releases of one repository
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RepositoryLabels {
    pub name_label: String,
    pub tag_label: String,
}

/// Release notifier configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Repository name -> labels
    #[serde(default)]
    pub repositories: HashMap<String, RepositoryLabels>,

    #[serde(default)]
    pub channel: ChannelConfig,

    /// Upper bound on one sink offer before the request moves on
    #[serde(default = "default_offer_timeout_ms")]
    pub offer_timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ledger_path: default_ledger_path(),
            repositories: HashMap::new(),
            channel: ChannelConfig::default(),
            offer_timeout_ms: default_offer_timeout_ms(),
        }
    }
}

fn default_ledger_path() -> String {
    "versions.yaml".to_string()
}

fn default_offer_timeout_ms() -> u64 {
    crate::ingest::DEFAULT_OFFER_TIMEOUT.as_millis() as u64
}

/// Outbound channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// "log" (default) or "webhook"
    #[serde(default = "default_channel_kind")]
    pub kind: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retries: u32,

    /// Format: "json" (default) or "discord"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: default_channel_kind(),
            url: None,
            timeout_ms: default_timeout_ms(),
            retries: 0,
            format: default_format(),
        }
    }
}

fn default_channel_kind() -> String {
    "log".to_string()
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_format() -> String {
    "json".to_string()
}

impl GridviewConfig {
    /// Load configuration from the default path or GRIDVIEW_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("GRIDVIEW_CONFIG").unwrap_or_else(|_| "config/gridview.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            port = config.server.port,
            notifier_enabled = config.notifier.enabled,
            repositories = config.notifier.repositories.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate TOML text, substituting `${VAR}` placeholders.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: GridviewConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.server.endpoint, &self.server.hub_path] {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Route '{}' must start with '/'",
                    path
                )));
            }
        }

        if self.server.endpoint == self.server.hub_path {
            return Err(ConfigError::ValidationError(
                "endpoint and hub_path must differ".to_string(),
            ));
        }

        if self.hub.session_queue == 0 {
            return Err(ConfigError::ValidationError(
                "hub.session_queue must be at least 1".to_string(),
            ));
        }

        if self.notifier.offer_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "notifier.offer_timeout_ms must be at least 1".to_string(),
            ));
        }

        for (name, labels) in &self.notifier.repositories {
            if labels.name_label.is_empty() || labels.tag_label.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Repository '{}' has an empty label",
                    name
                )));
            }
        }

        let channel = &self.notifier.channel;
        match channel.kind.as_str() {
            "log" => {}
            "webhook" => {
                let url = channel.url.as_deref().unwrap_or_default();

                if url.contains("${") {
                    warn!(
                        url = %url,
                        "Webhook URL contains unsubstituted environment variable"
                    );
                } else if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::ValidationError(
                        "Webhook channel URL must start with http:// or https://".to_string(),
                    ));
                }

                if channel.format != "json" && channel.format != "discord" {
                    return Err(ConfigError::ValidationError(
                        "Webhook channel format must be 'json' or 'discord'".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown channel kind: {}",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Build the outbound channel for release digests.
    ///
    /// A webhook whose URL still holds a `${VAR}` placeholder falls back to
    /// the log channel.
    pub fn build_channel(&self) -> Arc<dyn OutboundChannel> {
        let channel = &self.notifier.channel;

        match (channel.kind.as_str(), channel.url.as_deref()) {
            ("webhook", Some(url)) if !url.contains("${") => {
                let mut webhook = WebhookChannel::new(url)
                    .with_timeout(Duration::from_millis(channel.timeout_ms))
                    .with_retries(channel.retries);
                if channel.format == "discord" {
                    webhook = webhook.with_discord_format();
                }
                Arc::new(webhook)
            }
            ("webhook", url) => {
                warn!(url = ?url, "Webhook channel has no usable URL, logging digests instead");
                Arc::new(LogChannel::new())
            }
            _ => Arc::new(LogChannel::new()),
        }
    }

    /// Build the notifier sink. Disabled notifier -> [`NoopSink`].
    pub async fn build_sink(&self) -> Result<Arc<dyn NotifierSink>, ConfigError> {
        if !self.notifier.enabled {
            debug!("Release notifier disabled");
            return Ok(Arc::new(NoopSink));
        }

        let ledger =
            Ledger::open(&self.notifier.ledger_path, self.notifier.repositories.values()).await?;

        Ok(Arc::new(ReleaseNotifier::new(
            self.notifier.repositories.clone(),
            Arc::new(ledger),
            self.build_channel(),
        )))
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.notifier.offer_timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.hub.heartbeat_secs.max(1))
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern is valid")
});

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
