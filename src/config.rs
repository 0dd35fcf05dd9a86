//! Configuration for the logger instance and its dispatcher
//!
//! Values come from an optional YAML file, then environment variables override
//! them. Library code never reads the environment on its own: binaries call
//! [`Config::from_env`] or [`Config::apply_env`] and hand the result to
//! [`crate::Logger`].

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FATAL_FLUSH_TIMEOUT_SECS: u64 = 5;

pub const ENV_BOT_TOKEN: &str = "TELELOG_BOT_TOKEN";
pub const ENV_APP_NAME: &str = "TELELOG_APP_NAME";
pub const ENV_DEBUG_MODE: &str = "TELELOG_DEBUG_MODE";
pub const ENV_RECIPIENT_LIST: &str = "TELELOG_RECIPIENT_LIST";
pub const ENV_CALLER_INFO: &str = "TELELOG_CALLER_INFO";
pub const ENV_API_URL: &str = "TELELOG_API_URL";

/// Environment variables read by [`Config::apply_env`], in display order.
pub const ENV_VARS: [&str; 6] = [
    ENV_BOT_TOKEN,
    ENV_APP_NAME,
    ENV_DEBUG_MODE,
    ENV_RECIPIENT_LIST,
    ENV_CALLER_INFO,
    ENV_API_URL,
];

/// Interpret a flag value. `1`, `true`, `enabled`, `active` and `yes`
/// (any case) mean enabled; everything else means disabled.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "enabled" | "active" | "yes"
    )
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    telegram: Option<TelegramSection>,
    app: Option<AppSection>,
    dispatch: Option<DispatchSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramSection {
    bot_token: Option<String>,
    api_url: Option<String>,
    parse_mode: Option<String>,
    recipient_list: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    positive_recipients_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    debug: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    caller_info: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchSection {
    queue_capacity: Option<usize>,
    workers: Option<usize>,
    send_timeout_secs: Option<u64>,
    fatal_flush_timeout_secs: Option<u64>,
}

/// Deserialize a flag that can be either a YAML bool or one of the
/// string spellings accepted by [`parse_flag`]
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b)),
        Some(serde_yaml::Value::String(s)) => Ok(Some(parse_flag(&s))),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(parse_flag(&n.to_string()))),
        Some(other) => Err(D::Error::custom(format!(
            "expected bool or string, got {:?}",
            other
        ))),
    }
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bot_token: String,
    pub app_name: String,
    pub debug: bool,
    pub caller_info: bool,
    pub recipient_list: Option<PathBuf>,
    pub positive_recipients_only: bool,
    pub api_url: String,
    pub parse_mode: Option<String>,
    pub queue_capacity: usize,
    pub workers: usize,
    pub send_timeout: Duration,
    pub fatal_flush_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            app_name: String::new(),
            debug: false,
            caller_info: false,
            recipient_list: None,
            positive_recipients_only: false,
            api_url: DEFAULT_API_URL.to_string(),
            parse_mode: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            fatal_flush_timeout: Duration::from_secs(DEFAULT_FATAL_FLUSH_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text. Missing sections keep their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: YamlConfig = if content.trim().is_empty() {
            YamlConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let telegram = yaml.telegram.unwrap_or_default();
        let app = yaml.app.unwrap_or_default();
        let dispatch = yaml.dispatch.unwrap_or_default();
        let defaults = Self::default();

        let config = Self {
            bot_token: resolve_placeholder(telegram.bot_token)
                .map(|t| t.trim().to_string())
                .unwrap_or_default(),
            app_name: resolve_placeholder(app.name).unwrap_or_default(),
            debug: app.debug.unwrap_or(defaults.debug),
            caller_info: app.caller_info.unwrap_or(defaults.caller_info),
            recipient_list: resolve_placeholder(telegram.recipient_list)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            positive_recipients_only: telegram
                .positive_recipients_only
                .unwrap_or(defaults.positive_recipients_only),
            api_url: resolve_placeholder(telegram.api_url).unwrap_or(defaults.api_url),
            parse_mode: telegram.parse_mode.filter(|m| !m.is_empty()),
            queue_capacity: dispatch.queue_capacity.unwrap_or(defaults.queue_capacity),
            workers: dispatch.workers.unwrap_or(defaults.workers),
            send_timeout: dispatch
                .send_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
            fatal_flush_timeout: dispatch
                .fatal_flush_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.fatal_flush_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from any key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(token) = get(ENV_BOT_TOKEN) {
            self.bot_token = token.trim().to_string();
        }
        if let Some(name) = get(ENV_APP_NAME) {
            self.app_name = name;
        }
        if let Some(debug) = get(ENV_DEBUG_MODE) {
            self.debug = parse_flag(&debug);
        }
        if let Some(path) = get(ENV_RECIPIENT_LIST) {
            self.recipient_list = Some(PathBuf::from(path));
        }
        if let Some(caller_info) = get(ENV_CALLER_INFO) {
            self.caller_info = parse_flag(&caller_info);
        }
        if let Some(url) = get(ENV_API_URL) {
            self.api_url = url;
        }
    }

    /// Reject values the dispatcher cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("api_url must not be empty".into()));
        }
        Ok(())
    }
}

/// Expand a `${VAR}` value from the environment; other values pass through
fn resolve_placeholder(value: Option<String>) -> Option<String> {
    let v = value?;
    if v.starts_with("${") && v.ends_with('}') {
        let var_name = &v[2..v.len() - 1];
        return std::env::var(var_name).ok();
    }
    Some(v)
}
