//! Logger instance: configuration, recipients and the severity API.
//!
//! Every severity call formats one message and queues one delivery per
//! recipient on the [`Dispatcher`]. Calls never wait for delivery and never
//! see per-recipient failures; those go to tracing, metrics and the optional
//! failure hook.
//!
//! ```no_run
//! use std::sync::Arc;
//! use telelog::{Config, Logger, TelegramConnector};
//!
//! # async fn run() -> telelog::Result<()> {
//! let config = Config::from_env();
//! let connector = Arc::new(TelegramConnector::from_config(&config));
//! let logger = Logger::connect(&config, connector).await?;
//!
//! logger.info("service started");
//! telelog::error!(logger, "payment {} failed", 42);
//! logger.flush(std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::{Dispatcher, FailureHook, FailureReason};
use crate::format::{format_message, formatted_body, plain_body, CallerInfo, Severity};
use crate::metrics;
use crate::recipients::{RecipientId, RecipientSource, RecipientStore};
use crate::transport::{Connector, TelegramConnector, Transport};
use crate::{Error, Result};

/// What a fatal log call does once its message is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalAction {
    /// Exit the process with this status code.
    Exit(i32),
    /// Panic with the message body.
    Panic,
}

impl Default for FatalAction {
    fn default() -> Self {
        FatalAction::Exit(1)
    }
}

pub struct Logger {
    app_name: String,
    debug: bool,
    caller_info: bool,
    token: String,
    recipients: RecipientStore,
    connector: Arc<dyn Connector>,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Dispatcher,
    fatal_action: FatalAction,
    fatal_flush_timeout: Duration,
}

impl Logger {
    /// Build a logger without connecting. Loads `config.recipient_list` if
    /// set and starts the dispatcher on the current tokio runtime.
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let recipients = if config.positive_recipients_only {
            RecipientStore::positive_only()
        } else {
            RecipientStore::new()
        };

        let mut logger = Self {
            app_name: config.app_name.clone(),
            debug: config.debug,
            caller_info: config.caller_info,
            token: String::new(),
            recipients,
            connector,
            transport: None,
            dispatcher: Dispatcher::from_config(config)?,
            fatal_action: FatalAction::default(),
            fatal_flush_timeout: config.fatal_flush_timeout,
        };

        if let Some(path) = &config.recipient_list {
            logger.load_recipients([RecipientSource::path(path)]);
        }

        Ok(logger)
    }

    /// [`Logger::new`] followed by [`Logger::set_token`] with the configured
    /// token.
    pub async fn connect(config: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let mut logger = Self::new(config, connector)?;
        logger.set_token(&config.bot_token).await?;
        Ok(logger)
    }

    /// Connect through the Telegram Bot API described by `config`.
    pub async fn telegram(config: &Config) -> Result<Self> {
        Self::connect(config, Arc::new(TelegramConnector::from_config(config))).await
    }

    /// Switch to a new bot token.
    ///
    /// The same token as the connected one is a no-op (`Ok(false)`). A
    /// different token is validated through the connector; on failure the
    /// previous token and transport stay in place.
    pub async fn set_token(&mut self, token: &str) -> Result<bool> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::InvalidArgument("bot token is empty".to_string()));
        }
        if token == self.token && self.transport.is_some() {
            debug!("Bot token unchanged, keeping transport");
            return Ok(false);
        }

        let transport = self.connector.connect(token).await?;
        self.transport = Some(transport);
        self.token = token.to_string();
        info!(app = %self.app_name, "Transport connected");
        Ok(true)
    }

    pub fn set_app_name(&mut self, name: impl Into<String>) {
        self.app_name = name.into();
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn set_caller_info(&mut self, enabled: bool) {
        self.caller_info = enabled;
    }

    pub fn set_fatal_action(&mut self, action: FatalAction) {
        self.fatal_action = action;
    }

    pub fn set_fatal_flush_timeout(&mut self, timeout: Duration) {
        self.fatal_flush_timeout = timeout;
    }

    /// Observe deliveries that were dropped or failed.
    pub fn set_failure_hook(&self, hook: Option<FailureHook>) {
        self.dispatcher.set_failure_hook(hook);
    }

    /// Append recipients from each source. Unreadable sources are logged and
    /// skipped. Returns the number of ids added.
    pub fn load_recipients<I>(&mut self, sources: I) -> usize
    where
        I: IntoIterator<Item = RecipientSource>,
    {
        let mut added = 0;
        for source in sources {
            let name = format!("{:?}", source);
            match self.recipients.load(source) {
                Ok(n) => added += n,
                Err(err) => warn!(source = %name, error = %err, "Could not read recipient source"),
            }
        }
        added
    }

    pub fn add_recipient(&mut self, id: RecipientId) -> bool {
        self.recipients.push(id)
    }

    pub fn recipients(&self) -> &[RecipientId] {
        self.recipients.ids()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn caller_info_enabled(&self) -> bool {
        self.caller_info
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Wait for queued deliveries, bounded by `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.dispatcher.flush(timeout).await
    }

    /// Flush and stop the dispatcher. Later log calls are dropped.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.dispatcher.shutdown(timeout).await
    }

    /// Whether a call at `severity` would be dispatched.
    pub fn enabled(&self, severity: Severity) -> bool {
        severity != Severity::Debug || self.debug
    }

    /// Format `body` and queue it for every recipient. Returns the number of
    /// deliveries queued.
    ///
    /// With caller info enabled and no `caller` given, the location of this
    /// call is used.
    #[track_caller]
    pub fn log(&self, severity: Severity, body: &str, caller: Option<CallerInfo>) -> usize {
        if !self.enabled(severity) {
            return 0;
        }

        let caller = match (self.caller_info, caller) {
            (false, _) => None,
            (true, Some(caller)) => Some(caller),
            (true, None) => Some(CallerInfo::here()),
        };
        let message = format_message(severity, &self.app_name, caller.as_ref(), body);
        metrics::record_message(severity);

        let Some(transport) = &self.transport else {
            for &chat_id in self.recipients.ids() {
                self.dispatcher
                    .reject(severity, chat_id, FailureReason::NotConnected);
            }
            return 0;
        };

        self.recipients
            .ids()
            .iter()
            .filter(|&&chat_id| {
                self.dispatcher
                    .enqueue(severity, chat_id, &message, transport)
                    .is_ok()
            })
            .count()
    }

    #[doc(hidden)]
    pub fn log_args(&self, severity: Severity, args: fmt::Arguments<'_>, caller: CallerInfo) -> usize {
        if !self.enabled(severity) {
            return 0;
        }
        self.log(severity, &formatted_body(args), Some(caller))
    }

    #[doc(hidden)]
    pub fn fatal_args(&self, args: fmt::Arguments<'_>, caller: CallerInfo) -> ! {
        let body = formatted_body(args);
        self.log(Severity::Fatal, &body, Some(caller));
        self.terminate(&body)
    }

    #[track_caller]
    fn caller_here(&self) -> Option<CallerInfo> {
        if self.caller_info {
            Some(CallerInfo::here())
        } else {
            None
        }
    }

    /// Dispatch at fatal level, wait up to the fatal flush timeout, then
    /// apply the [`FatalAction`].
    #[track_caller]
    pub fn fatal(&self, msg: impl fmt::Display) -> ! {
        let body = plain_body(msg);
        self.log(Severity::Fatal, &body, self.caller_here());
        self.terminate(&body)
    }

    #[track_caller]
    pub fn fatalf(&self, args: fmt::Arguments<'_>) -> ! {
        let body = formatted_body(args);
        self.log(Severity::Fatal, &body, self.caller_here());
        self.terminate(&body)
    }

    #[track_caller]
    pub fn error(&self, msg: impl fmt::Display) {
        self.log(Severity::Error, &plain_body(msg), self.caller_here());
    }

    #[track_caller]
    pub fn errorf(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Error, &formatted_body(args), self.caller_here());
    }

    #[track_caller]
    pub fn warn(&self, msg: impl fmt::Display) {
        self.log(Severity::Warn, &plain_body(msg), self.caller_here());
    }

    #[track_caller]
    pub fn warnf(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Warn, &formatted_body(args), self.caller_here());
    }

    #[track_caller]
    pub fn info(&self, msg: impl fmt::Display) {
        self.log(Severity::Info, &plain_body(msg), self.caller_here());
    }

    #[track_caller]
    pub fn infof(&self, args: fmt::Arguments<'_>) {
        self.log(Severity::Info, &formatted_body(args), self.caller_here());
    }

    /// Dispatched only when debug mode is on.
    #[track_caller]
    pub fn debug(&self, msg: impl fmt::Display) {
        if self.debug {
            self.log(Severity::Debug, &plain_body(msg), self.caller_here());
        }
    }

    #[track_caller]
    pub fn debugf(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            self.log(Severity::Debug, &formatted_body(args), self.caller_here());
        }
    }

    /// [`Logger::fatal`] for async callers: awaits the bounded flush on any
    /// runtime flavor, then applies the [`FatalAction`]. The future never
    /// completes.
    #[track_caller]
    pub fn fatal_async(&self, msg: impl fmt::Display) -> impl Future<Output = ()> + '_ {
        self.fatal_flushed(plain_body(msg), self.caller_here())
    }

    async fn fatal_flushed(&self, body: String, caller: Option<CallerInfo>) {
        self.log(Severity::Fatal, &body, caller);
        if let Err(err) = self.dispatcher.flush(self.fatal_flush_timeout).await {
            warn!(error = %err, "Fatal message delivery not confirmed");
        }
        self.finish_fatal(&body)
    }

    fn terminate(&self, body: &str) -> ! {
        if let Err(err) = self.dispatcher.flush_blocking(self.fatal_flush_timeout) {
            warn!(error = %err, "Fatal message delivery not confirmed");
        }
        self.finish_fatal(body)
    }

    fn finish_fatal(&self, body: &str) -> ! {
        match self.fatal_action {
            FatalAction::Exit(code) => {
                error!(code, app = %self.app_name, "Fatal log call, exiting");
                std::process::exit(code)
            }
            FatalAction::Panic => panic!("fatal: {}", body.trim_end()),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("app_name", &self.app_name)
            .field("debug", &self.debug)
            .field("caller_info", &self.caller_info)
            .field("recipients", &self.recipients.len())
            .field("connected", &self.is_connected())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    fn config() -> Config {
        Config {
            bot_token: "1:valid".to_string(),
            app_name: "orders".to_string(),
            ..Config::default()
        }
    }

    async fn connected(recipients: &str) -> (Logger, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new());
        let mut logger = Logger::connect(&config(), connector.clone()).await.unwrap();
        logger.load_recipients([RecipientSource::bytes(recipients)]);
        (logger, connector)
    }

    #[tokio::test]
    async fn connect_uses_configured_token() {
        let (logger, connector) = connected("").await;
        assert!(logger.is_connected());
        assert_eq!(connector.attempts(), vec!["1:valid".to_string()]);
    }

    #[tokio::test]
    async fn same_token_does_not_reconnect() {
        let (mut logger, connector) = connected("").await;
        assert!(!logger.set_token("1:valid").await.unwrap());
        assert!(!logger.set_token("  1:valid\n").await.unwrap());
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn different_token_reconnects() {
        let (mut logger, connector) = connected("").await;
        assert!(logger.set_token("2:other").await.unwrap());
        assert!(logger.set_token("1:valid").await.unwrap());
        assert_eq!(connector.attempts(), vec!["1:valid", "2:other", "1:valid"]);
    }

    #[tokio::test]
    async fn rejected_token_keeps_previous_transport() {
        let connector = Arc::new(MockConnector::new().reject("9:bad"));
        let mut logger = Logger::connect(&config(), connector.clone()).await.unwrap();
        logger.add_recipient(5);

        let err = logger.set_token("9:bad").await.unwrap_err();
        assert!(matches!(err, Error::Telegram(_)));
        assert!(logger.is_connected());

        // Still bound to the original token.
        assert!(!logger.set_token("1:valid").await.unwrap());
        logger.info("still works");
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn empty_token_is_invalid() {
        let connector = Arc::new(MockConnector::new());
        let mut logger = Logger::new(&config(), connector.clone()).unwrap();
        let err = logger.set_token("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn one_delivery_per_recipient_in_order() {
        let (logger, connector) = connected("10\n20\n30").await;
        assert_eq!(logger.log(Severity::Warn, "disk low\n", None), 3);
        logger.flush(Duration::from_secs(1)).await.unwrap();

        let mut sent = connector.transport().sent();
        sent.sort_by_key(|(chat, _)| *chat);
        let chats: Vec<_> = sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(chats, vec![10, 20, 30]);
        assert!(sent
            .iter()
            .all(|(_, text)| text == "⚠️ [WARN] orders\n\nMessage:\ndisk low\n"));
    }

    #[tokio::test]
    async fn debug_is_gated_by_debug_flag() {
        let (mut logger, connector) = connected("1").await;
        logger.debug("x");
        logger.debugf(format_args!("y={}", 1));
        assert_eq!(logger.log(Severity::Debug, "z\n", None), 0);
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert!(connector.transport().sent().is_empty());

        logger.set_debug(true);
        logger.debug("x");
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn other_levels_ignore_debug_flag() {
        let (logger, connector) = connected("1").await;
        assert!(!logger.is_debug());
        logger.error("e");
        logger.warn("w");
        logger.info("i");
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.transport().sent().len(), 3);
    }

    #[tokio::test]
    async fn errorf_without_caller_info() {
        let (logger, connector) = connected("1").await;
        logger.errorf(format_args!("count={}", 5));
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            connector.transport().sent(),
            vec![(1, "🥴 [ERROR] orders\n\nMessage:\ncount=5\n".to_string())]
        );
    }

    #[tokio::test]
    async fn caller_info_block_only_when_enabled() {
        let (mut logger, connector) = connected("1").await;
        logger.info("plain");
        logger.set_caller_info(true);
        logger.info("located");
        logger.flush(Duration::from_secs(1)).await.unwrap();

        let sent = connector.transport().sent();
        let plain = sent.iter().find(|(_, t)| t.contains("plain")).unwrap();
        let located = sent.iter().find(|(_, t)| t.contains("located")).unwrap();
        assert!(!plain.1.contains("Filename:"));
        assert!(located.1.contains("Filename: logger.rs\n"));
        assert!(located.1.contains("FuncName: <unknown>\n"));
    }

    #[tokio::test]
    async fn caller_passed_while_disabled_is_ignored() {
        let (logger, connector) = connected("1").await;
        logger.log(Severity::Info, "m\n", Some(CallerInfo::new("/a/b.rs", 3, "f")));
        logger.flush(Duration::from_secs(1)).await.unwrap();
        assert!(!connector.transport().sent()[0].1.contains("Filename"));
    }

    #[tokio::test]
    async fn not_connected_drops_and_reports() {
        let connector = Arc::new(MockConnector::new());
        let mut logger = Logger::new(&config(), connector.clone()).unwrap();
        logger.add_recipient(1);
        logger.add_recipient(2);

        let reports = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = reports.clone();
        logger.set_failure_hook(Some(Arc::new(move |f: &crate::dispatch::DeliveryFailure| {
            sink.lock().unwrap().push(f.reason);
        })));

        assert_eq!(logger.log(Severity::Error, "lost\n", None), 0);
        assert_eq!(
            reports.lock().unwrap().as_slice(),
            &[FailureReason::NotConnected, FailureReason::NotConnected]
        );
    }

    #[tokio::test]
    async fn recipients_load_from_configured_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"123\nabc\n456\n").unwrap();

        let cfg = Config {
            recipient_list: Some(file.path().to_path_buf()),
            ..config()
        };
        let logger = Logger::new(&cfg, Arc::new(MockConnector::new())).unwrap();
        assert_eq!(logger.recipients(), &[123, 456]);
    }

    #[tokio::test]
    async fn unreadable_sources_are_skipped() {
        let connector = Arc::new(MockConnector::new());
        let mut logger = Logger::new(&config(), connector).unwrap();
        let added = logger.load_recipients([
            RecipientSource::path("/nonexistent/chats"),
            RecipientSource::bytes("7\n8"),
        ]);
        assert_eq!(added, 2);
        assert_eq!(logger.recipients(), &[7, 8]);
    }

    #[tokio::test]
    async fn positive_only_config_filters_recipients() {
        let cfg = Config {
            positive_recipients_only: true,
            ..config()
        };
        let mut logger = Logger::new(&cfg, Arc::new(MockConnector::new())).unwrap();
        logger.load_recipients([RecipientSource::bytes("-5\n5")]);
        assert_eq!(logger.recipients(), &[5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fatal_dispatches_then_terminates() {
        let (mut logger, connector) = connected("1\n2").await;
        logger.set_fatal_action(FatalAction::Panic);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            logger.fatal("boom");
        }));

        let payload = outcome.unwrap_err();
        let text = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert_eq!(text, "fatal: boom");

        let mut sent = connector.transport().sent();
        sent.sort_by_key(|(chat, _)| *chat);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "💥 [FATAL] orders\n\nMessage:\nboom\n");
    }

    #[tokio::test]
    async fn fatal_async_flushes_on_current_thread_runtime() {
        use futures::FutureExt;

        let (mut logger, connector) = connected("3").await;
        logger.set_fatal_action(FatalAction::Panic);

        let outcome = std::panic::AssertUnwindSafe(logger.fatal_async("async boom"))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        assert_eq!(
            connector.transport().sent(),
            vec![(3, "💥 [FATAL] orders\n\nMessage:\nasync boom\n".to_string())]
        );
    }

    #[tokio::test]
    async fn log_without_caller_uses_call_site_when_enabled() {
        let (mut logger, connector) = connected("1").await;
        logger.log(Severity::Info, "plain\n", None);
        logger.set_caller_info(true);
        logger.log(Severity::Info, "located\n", None);
        logger.flush(Duration::from_secs(1)).await.unwrap();

        let sent = connector.transport().sent();
        assert!(sent
            .iter()
            .any(|(_, text)| text == "👀 [INFO] orders\n\nMessage:\nplain\n"));
        let located = sent
            .iter()
            .map(|(_, text)| text)
            .find(|text| text.ends_with("located\n"))
            .unwrap();
        assert!(located.starts_with("👀 [INFO] orders\n\nFilename: logger.rs\nLine: "));
        assert!(located.contains("FuncName: <unknown>\n\nMessage:\nlocated\n"));
    }

    #[tokio::test]
    async fn shutdown_stops_dispatch() {
        let (mut logger, connector) = connected("1").await;
        logger.info("before");
        logger.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(logger.log(Severity::Info, "after\n", None), 0);
        assert_eq!(connector.transport().sent().len(), 1);
    }

    #[test]
    fn fatal_action_defaults_to_exit_one() {
        assert_eq!(FatalAction::default(), FatalAction::Exit(1));
    }
}
