//! Error types for telelog

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Flush timed out with {pending} deliveries still pending")]
    FlushTimeout { pending: usize },

    #[error("Transport not connected")]
    NotConnected,

    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Dispatch queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // The request URL embeds the bot token
        let err = err.without_url();
        if err.is_timeout() {
            Error::Connection(format!("request timed out: {}", err))
        } else {
            Error::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
