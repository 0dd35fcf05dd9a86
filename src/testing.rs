//! In-memory transports and connectors.
//!
//! Useful for tests and for running a [`crate::Logger`] without network
//! access.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::recipients::RecipientId;
use crate::transport::{Connector, Transport};
use crate::{Error, Result};

/// Records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(RecipientId, String)>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records each attempt, then reports it as failed.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    fn send<'a>(&'a self, chat_id: RecipientId, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((chat_id, text.to_string()));
            }
            if self.fail {
                Err(Error::Telegram("simulated failure".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Never completes a send.
#[derive(Debug, Default)]
pub struct HangingTransport;

impl Transport for HangingTransport {
    fn send<'a>(&'a self, _chat_id: RecipientId, _text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(futures::future::pending())
    }
}

/// Connector that hands out one shared [`RecordingTransport`] and counts
/// connection attempts per token.
#[derive(Debug, Default)]
pub struct MockConnector {
    transport: Arc<RecordingTransport>,
    rejected: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `token` as invalid.
    pub fn reject(mut self, token: &str) -> Self {
        self.rejected.insert(token.to_string());
        self
    }

    pub fn transport(&self) -> Arc<RecordingTransport> {
        self.transport.clone()
    }

    /// Tokens passed to `connect`, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        Box::pin(async move {
            if let Ok(mut attempts) = self.attempts.lock() {
                attempts.push(token.to_string());
            }
            if self.rejected.contains(token) {
                return Err(Error::Telegram("Unauthorized (code 401)".to_string()));
            }
            Ok(self.transport.clone() as Arc<dyn Transport>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_transport_keeps_send_order() {
        let transport = RecordingTransport::new();
        tokio_test::block_on(async {
            transport.send(2, "b").await.unwrap();
            transport.send(1, "a").await.unwrap();
        });
        assert_eq!(
            transport.sent(),
            vec![(2, "b".to_string()), (1, "a".to_string())]
        );
    }

    #[test]
    fn failing_transport_records_then_errors() {
        let transport = RecordingTransport::failing();
        let result = tokio_test::block_on(transport.send(1, "x"));
        assert!(matches!(result, Err(Error::Telegram(_))));
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn mock_connector_counts_attempts_and_rejects() {
        let connector = MockConnector::new().reject("bad");
        tokio_test::block_on(async {
            assert!(connector.connect("good").await.is_ok());
            assert!(connector.connect("bad").await.is_err());
        });
        assert_eq!(connector.attempts(), vec!["good".to_string(), "bad".to_string()]);
    }

    #[test]
    fn hanging_transport_never_completes() {
        let transport = HangingTransport;
        let mut send = tokio_test::task::spawn(transport.send(1, "x"));
        tokio_test::assert_pending!(send.poll());
    }
}
