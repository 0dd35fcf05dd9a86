//! Background delivery: a bounded queue drained by a pool of worker tasks.
//!
//! Enqueueing never blocks the caller. When the queue is full the delivery is
//! dropped and reported, so backpressure is visible instead of unbounded.
//! [`Dispatcher::flush`] waits for everything enqueued so far to finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::format::{FormattedMessage, Severity};
use crate::metrics;
use crate::recipients::RecipientId;
use crate::transport::Transport;
use crate::{Error, Result};

/// Why a delivery did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The transport returned an error.
    Transport,
    /// The send did not finish within the send timeout.
    Timeout,
    /// The queue was full.
    QueueFull,
    /// The dispatcher was shut down.
    QueueClosed,
    /// No transport was connected at dispatch time.
    NotConnected,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Transport => "error",
            FailureReason::Timeout => "timeout",
            FailureReason::QueueFull => "dropped",
            FailureReason::QueueClosed => "closed",
            FailureReason::NotConnected => "no_transport",
        }
    }
}

/// Report handed to the failure hook.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub chat_id: RecipientId,
    pub severity: Severity,
    pub reason: FailureReason,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Observer for dropped deliveries. Called from worker tasks and from the
/// logging thread; it must not block.
pub type FailureHook = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;

struct Job {
    chat_id: RecipientId,
    severity: Severity,
    message: FormattedMessage,
    transport: Arc<dyn Transport>,
}

struct Shared {
    pending: AtomicUsize,
    drained: Notify,
    send_timeout: Duration,
    on_failure: RwLock<Option<FailureHook>>,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn report(&self, chat_id: RecipientId, severity: Severity, reason: FailureReason, error: Option<String>) {
        warn!(
            chat_id,
            severity = %severity,
            reason = reason.as_str(),
            error = error.as_deref().unwrap_or(""),
            "Log delivery failed"
        );

        let hook = self.on_failure.read().ok().and_then(|guard| guard.clone());
        if let Some(hook) = hook {
            hook(&DeliveryFailure {
                chat_id,
                severity,
                reason,
                error,
                at: Utc::now(),
            });
        }
    }
}

pub struct Dispatcher {
    tx: Option<mpsc::Sender<Job>>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    runtime: Handle,
}

impl Dispatcher {
    /// Start `workers` tasks on the current tokio runtime.
    pub fn new(capacity: usize, workers: usize, send_timeout: Duration) -> Result<Self> {
        if capacity == 0 || workers == 0 {
            return Err(Error::InvalidArgument(
                "dispatcher needs a non-zero queue capacity and worker count".into(),
            ));
        }
        let handle = Handle::try_current()
            .map_err(|e| Error::InvalidArgument(format!("no tokio runtime: {}", e)))?;

        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            send_timeout,
            on_failure: RwLock::new(None),
        });

        let workers = (0..workers)
            .map(|id| handle.spawn(worker_loop(id, rx.clone(), shared.clone())))
            .collect();

        Ok(Self {
            tx: Some(tx),
            shared,
            workers,
            runtime: handle,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.queue_capacity, config.workers, config.send_timeout)
    }

    pub fn set_failure_hook(&self, hook: Option<FailureHook>) {
        if let Ok(mut guard) = self.shared.on_failure.write() {
            *guard = hook;
        }
    }

    /// Deliveries enqueued and not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Queue one delivery without waiting. Failures are reported through the
    /// hook as well as returned.
    pub fn enqueue(
        &self,
        severity: Severity,
        chat_id: RecipientId,
        message: &FormattedMessage,
        transport: &Arc<dyn Transport>,
    ) -> Result<()> {
        let Some(tx) = &self.tx else {
            self.reject(severity, chat_id, FailureReason::QueueClosed);
            return Err(Error::QueueClosed);
        };

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        metrics::record_enqueued();

        let job = Job {
            chat_id,
            severity,
            message: message.clone(),
            transport: transport.clone(),
        };

        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(err) => {
                let (reason, error) = match err {
                    mpsc::error::TrySendError::Full(_) => (FailureReason::QueueFull, Error::QueueFull),
                    mpsc::error::TrySendError::Closed(_) => {
                        (FailureReason::QueueClosed, Error::QueueClosed)
                    }
                };
                metrics::record_dropped(reason.as_str());
                self.shared.finish_one();
                self.shared.report(chat_id, severity, reason, None);
                Err(error)
            }
        }
    }

    /// Record a delivery that was never queued.
    pub fn reject(&self, severity: Severity, chat_id: RecipientId, reason: FailureReason) {
        metrics::record_rejected(reason.as_str());
        self.shared.report(chat_id, severity, reason, None);
    }

    /// Wait until every delivery enqueued so far has finished.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        let drained = async {
            loop {
                let notified = shared.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if shared.pending.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, drained)
            .await
            .map_err(|_| Error::FlushTimeout {
                pending: self.pending(),
            })
    }

    /// [`Dispatcher::flush`] from synchronous code.
    ///
    /// Works outside the runtime and on multi-threaded runtime threads. On a
    /// current-thread runtime the workers cannot progress while this thread
    /// blocks, so it returns an error without waiting.
    pub fn flush_blocking(&self, timeout: Duration) -> Result<()> {
        match Handle::try_current() {
            Err(_) => self.runtime.block_on(self.flush(timeout)),
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| current.block_on(self.flush(timeout)))
            }
            Ok(_) => Err(Error::InvalidArgument(
                "cannot wait for deliveries on a current-thread runtime".to_string(),
            )),
        }
    }

    /// Flush, then close the queue and stop the workers. Workers still busy
    /// after a failed flush are aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        let flushed = self.flush(timeout).await;
        self.tx = None;

        for handle in self.workers.drain(..) {
            if flushed.is_ok() {
                let _ = handle.await;
            } else {
                handle.abort();
            }
        }
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .field("workers", &self.workers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, shared: Arc<Shared>) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker = id, "Dispatch queue closed, worker exiting");
            return;
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            shared.send_timeout,
            job.transport.send(job.chat_id, job.message.as_str()),
        )
        .await;

        let status = match result {
            Ok(Ok(())) => "ok",
            Ok(Err(err)) => {
                shared.report(
                    job.chat_id,
                    job.severity,
                    FailureReason::Transport,
                    Some(err.to_string()),
                );
                FailureReason::Transport.as_str()
            }
            Err(_) => {
                shared.report(
                    job.chat_id,
                    job.severity,
                    FailureReason::Timeout,
                    Some(Error::Timeout(shared.send_timeout).to_string()),
                );
                FailureReason::Timeout.as_str()
            }
        };

        metrics::record_delivery(status, started.elapsed());
        shared.finish_one();
    }
}
