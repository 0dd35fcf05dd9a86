//! Follow a file and emit each complete line.
//!
//! A `notify` watcher on the parent directory wakes the follower when the
//! file changes; `poll_interval` is the fallback when no event arrives. At end
//! of file the follower checks whether the file was truncated (restart from
//! the top) or replaced by rotation (drain the old file, then reopen the path).
//! The file must exist when following starts.

use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config as WatchConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;

const LINE_CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Start at the current end of the file instead of the beginning.
    pub from_end: bool,
    /// Fallback wake-up when no file event arrives.
    pub poll_interval: Duration,
    /// Reopen the path when the file behind it is replaced.
    pub reopen: bool,
    /// Longer lines are split into chunks of this size.
    pub max_line_bytes: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            from_end: false,
            poll_interval: Duration::from_millis(250),
            reopen: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Lines of a followed file. Dropping it stops the follower task.
pub struct Tail {
    lines: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl Tail {
    /// Open `path` and start following it.
    pub async fn follow(path: impl Into<PathBuf>, options: TailOptions) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path).await?;
        let identity = file_id(&file.metadata().await?);

        let position = if options.from_end {
            file.seek(SeekFrom::End(0)).await?
        } else {
            0
        };

        let (wake_tx, wake_rx) = mpsc::channel(1);
        let watcher = match watch_parent(&path, wake_tx) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "File events unavailable, polling only");
                None
            }
        };
        info!(path = %path.display(), position, "Following file");

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let follower = Follower {
            path,
            options,
            reader: BufReader::new(file),
            position,
            identity,
            pending: Vec::new(),
            tx,
            wake: Some(wake_rx),
            _watcher: watcher,
        };
        let task = tokio::spawn(follower.run());

        Ok(Self { lines: rx, task })
    }

    /// Next complete line without its terminator. `None` once the follower
    /// has stopped.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch the directory holding `path` and signal `wake` on changes to it.
fn watch_parent(path: &Path, wake: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let name: Option<OsString> = path.file_name().map(|n| n.to_os_string());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant =
                    event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove();
                let ours = event.paths.is_empty()
                    || event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == name.as_deref());
                if relevant && ours {
                    // A wake-up is already queued when this fails.
                    let _ = wake.try_send(());
                }
            }
            Err(err) => warn!(error = %err, "File watch error"),
        },
        WatchConfig::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

type FileId = Option<(u64, u64)>;

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> FileId {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> FileId {
    None
}

enum Step {
    /// Read something; keep reading.
    More,
    /// Nothing left to read right now.
    Eof,
    /// Receiver gone or read failed.
    Stop,
}

struct Follower {
    path: PathBuf,
    options: TailOptions,
    reader: BufReader<File>,
    position: u64,
    identity: FileId,
    pending: Vec<u8>,
    tx: mpsc::Sender<String>,
    wake: Option<mpsc::Receiver<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Follower {
    async fn run(mut self) {
        loop {
            match self.step().await {
                Step::More => {}
                Step::Stop => return,
                Step::Eof => {
                    if self.tx.is_closed() {
                        return;
                    }
                    self.wait_for_change().await;
                    match self.check_replaced().await {
                        Ok(true) => {}
                        Ok(false) => return,
                        Err(err) => {
                            warn!(path = %self.path.display(), error = %err, "Failed to reopen followed file");
                        }
                    }
                }
            }
        }
    }

    /// Read up to the next newline, emitting a line when one completes.
    async fn step(&mut self) -> Step {
        let max = self.options.max_line_bytes.max(1);
        let limit = max.saturating_sub(self.pending.len()).max(1) as u64;

        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.pending)
            .await;

        match read {
            Ok(0) => Step::Eof,
            Ok(n) => {
                self.position += n as u64;
                if self.pending.last() == Some(&b'\n') {
                    return self.emit().await;
                }
                if self.pending.len() >= max {
                    warn!(path = %self.path.display(), max, "Line too long, splitting");
                    return self.emit().await;
                }
                // Writer is mid-line; wait for the rest.
                Step::More
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Read error while following file");
                Step::Stop
            }
        }
    }

    async fn emit(&mut self) -> Step {
        let line = decode_line(&self.pending);
        self.pending.clear();
        if self.tx.send(line).await.is_err() {
            debug!(path = %self.path.display(), "Line receiver dropped, stopping");
            return Step::Stop;
        }
        Step::More
    }

    /// Sleep until a file event or the poll interval, whichever comes first.
    async fn wait_for_change(&mut self) {
        let poll = tokio::time::sleep(self.options.poll_interval);
        let watcher_gone = match self.wake.as_mut() {
            Some(wake) => tokio::select! {
                event = wake.recv() => event.is_none(),
                _ = poll => false,
            },
            None => {
                poll.await;
                false
            }
        };
        if watcher_gone {
            self.wake = None;
        }
    }

    /// Handle truncation and rotation after hitting end of file. Returns
    /// false when the receiver is gone.
    async fn check_replaced(&mut self) -> Result<bool> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Rotated away and not yet recreated.
            Err(_) => return Ok(true),
        };

        let identity = file_id(&meta);
        if self.options.reopen && identity.is_some() && identity != self.identity {
            info!(path = %self.path.display(), "File replaced, draining old file before reopening");
            loop {
                match self.step().await {
                    Step::More => {}
                    Step::Eof => break,
                    Step::Stop => return Ok(false),
                }
            }
            if !self.pending.is_empty() {
                if let Step::Stop = self.emit().await {
                    return Ok(false);
                }
            }

            let file = File::open(&self.path).await?;
            self.identity = file_id(&file.metadata().await?);
            self.reader = BufReader::new(file);
            self.position = 0;
            return Ok(true);
        }

        if meta.len() < self.position {
            info!(path = %self.path.display(), "File truncated, restarting from the top");
            self.reader.seek(SeekFrom::Start(0)).await?;
            self.position = 0;
            self.pending.clear();
        }
        Ok(true)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}
