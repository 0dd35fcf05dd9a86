//! Transport client: delivers rendered text to a chat.
//!
//! [`Connector`] turns a bot token into a live [`Transport`]; the Telegram
//! implementation validates the token with `getMe` before handing one out.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::recipients::RecipientId;
use crate::{Error, Result};

/// Sends one text message to one chat.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, chat_id: RecipientId, text: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Builds a transport for a token, failing when the token is rejected.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Arc<dyn Transport>>>;
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// Subset of the `User` object returned by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

async fn read_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    let parsed: ApiResponse<T> = serde_json::from_str(&body)
        .map_err(|_| Error::Connection(format!("unexpected response (HTTP {})", status)))?;

    if !parsed.ok || !status.is_success() {
        return Err(Error::Telegram(format!(
            "{} (code {})",
            parsed.description.unwrap_or_else(|| "request rejected".to_string()),
            parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16()))
        )));
    }

    parsed
        .result
        .ok_or_else(|| Error::Telegram("response without result".to_string()))
}

/// Connector for the Telegram Bot HTTP API.
#[derive(Debug, Clone)]
pub struct TelegramConnector {
    api_url: String,
    parse_mode: Option<String>,
    timeout: Duration,
}

impl TelegramConnector {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            parse_mode: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_SEND_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone())
            .with_parse_mode(config.parse_mode.clone())
            .with_timeout(config.send_timeout)
    }

    pub fn with_parse_mode(mut self, parse_mode: Option<String>) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate `token` against `getMe` and build a transport for it.
    pub async fn connect_telegram(&self, token: &str) -> Result<TelegramTransport> {
        let http = Client::builder()
            .user_agent(concat!("telelog/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Connection(format!("HTTP client error: {}", e)))?;

        let base = format!("{}/bot{}", self.api_url, token);
        let resp = http.get(format!("{}/getMe", base)).send().await?;
        let bot: BotUser = read_response(resp).await?;

        info!(
            bot_id = bot.id,
            username = bot.username.as_deref().unwrap_or(""),
            "Connected to Telegram Bot API"
        );

        Ok(TelegramTransport {
            http,
            base,
            parse_mode: self.parse_mode.clone(),
            bot,
        })
    }
}

impl Connector for TelegramConnector {
    fn connect<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        Box::pin(async move {
            let transport = self.connect_telegram(token).await?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }
}

/// Transport bound to one validated bot token.
pub struct TelegramTransport {
    http: Client,
    base: String,
    parse_mode: Option<String>,
    bot: BotUser,
}

impl TelegramTransport {
    pub fn bot(&self) -> &BotUser {
        &self.bot
    }

    pub async fn send_message(&self, chat_id: RecipientId, text: &str) -> Result<()> {
        let mut params = vec![("chat_id", chat_id.to_string()), ("text", text.to_string())];
        if let Some(mode) = &self.parse_mode {
            params.push(("parse_mode", mode.clone()));
        }

        let resp = self
            .http
            .post(format!("{}/sendMessage", self.base))
            .form(&params)
            .send()
            .await?;

        let _: serde_json::Value = read_response(resp).await?;
        debug!(chat_id, "Telegram message sent");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("bot", &self.bot)
            .field("parse_mode", &self.parse_mode)
            .finish_non_exhaustive()
    }
}

impl Transport for TelegramTransport {
    fn send<'a>(&'a self, chat_id: RecipientId, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.send_message(chat_id, text))
    }
}
