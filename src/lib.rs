//! Telegram log forwarding
//!
//! This library provides:
//! - A [`Logger`] with Fatal/Error/Warn/Info/Debug calls that fan each message
//!   out to every configured Telegram chat
//! - Recipient lists loaded from files, bytes or readers
//! - A bounded background dispatcher so logging never blocks on the network
//! - Optional caller location (file, line, function) in every message
//! - A file follower used by the `telelog` binary to forward log lines
//! - Prometheus metrics for messages and deliveries

pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod logger;
pub mod macros;
pub mod metrics;
pub mod recipients;
pub mod tail;
pub mod testing;
pub mod transport;

// Re-export common types
pub use config::Config;
pub use dispatch::{DeliveryFailure, Dispatcher, FailureHook, FailureReason};
pub use error::{Error, Result};
pub use format::{CallerInfo, FormattedMessage, Severity};
pub use logger::{FatalAction, Logger};
pub use recipients::{RecipientId, RecipientSource, RecipientStore};
pub use tail::{Tail, TailOptions};
pub use transport::{Connector, TelegramConnector, TelegramTransport, Transport};
