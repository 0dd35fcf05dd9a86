//! Recipient store: the chat ids every log message is delivered to.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use tracing::warn;

use crate::Result;

/// Telegram chat id. Group chats use negative ids.
pub type RecipientId = i64;

/// Where recipient ids are read from.
pub enum RecipientSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

impl RecipientSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        RecipientSource::Path(path.into())
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        RecipientSource::Bytes(bytes.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        RecipientSource::Reader(Box::new(reader))
    }

    fn describe(&self) -> String {
        match self {
            RecipientSource::Path(p) => p.display().to_string(),
            RecipientSource::Bytes(b) => format!("<{} bytes>", b.len()),
            RecipientSource::Reader(_) => "<reader>".to_string(),
        }
    }
}

impl std::fmt::Debug for RecipientSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecipientSource({})", self.describe())
    }
}

/// Ordered list of recipient ids. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientStore {
    ids: Vec<RecipientId>,
    positive_only: bool,
}

impl RecipientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that silently skips ids `<= 0`.
    pub fn positive_only() -> Self {
        Self {
            ids: Vec::new(),
            positive_only: true,
        }
    }

    pub fn ids(&self) -> &[RecipientId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Append one id. Returns false when the positivity filter rejects it.
    pub fn push(&mut self, id: RecipientId) -> bool {
        if self.positive_only && id <= 0 {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Read a source and append every id it contains.
    ///
    /// Lines that do not parse are logged and skipped; I/O failures are
    /// returned. Returns the number of ids added.
    pub fn load(&mut self, source: RecipientSource) -> Result<usize> {
        let name = source.describe();
        let content = match source {
            RecipientSource::Path(path) => fs::read(&path)?,
            RecipientSource::Bytes(bytes) => bytes,
            RecipientSource::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                buf
            }
        };
        Ok(self.parse_into(&String::from_utf8_lossy(&content), &name))
    }

    fn parse_into(&mut self, content: &str, source: &str) -> usize {
        let mut added = 0;
        for (idx, raw) in content.split('\n').enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<RecipientId>() {
                Ok(id) => {
                    if self.push(id) {
                        added += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        source = %source,
                        line = idx + 1,
                        value = %line,
                        error = %e,
                        "Skipping invalid recipient id"
                    );
                }
            }
        }
        added
    }
}
