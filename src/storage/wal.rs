//! Global write-ahead log.
//!
//! One entry per line. Each line is the base64 of an AES-GCM sealed JSON
//! document `{"timestamp": .., "operation": "ADD_NODE", "payload": ..}`.
//! `append` returns only after the line is on stable storage, which is the
//! commit point of a mutation. A torn final line (crash mid-append) fails
//! authentication on replay and is skipped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoManager;
use crate::error::{GraphError, Result};
use crate::storage::{Node, Relation};

/// Logged mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalOperation {
    AddNode(Node),
    /// Carries the complete node after the update, so replay is a plain put.
    UpdateNode(Node),
    DeleteNode(String),
    AddLink(Relation),
    DeleteLink {
        source: String,
        target: String,
        #[serde(rename = "type")]
        relation_type: String,
    },
}

impl WalOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            WalOperation::AddNode(_) => "ADD_NODE",
            WalOperation::UpdateNode(_) => "UPDATE_NODE",
            WalOperation::DeleteNode(_) => "DELETE_NODE",
            WalOperation::AddLink(_) => "ADD_LINK",
            WalOperation::DeleteLink { .. } => "DELETE_LINK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,

    #[serde(flatten)]
    pub operation: WalOperation,
}

impl WalEntry {
    pub fn new(operation: WalOperation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self { timestamp, operation }
    }
}

struct WalFile {
    file: File,
    entries: usize,

    // A failed append left bytes that could not be cut off; the next
    // append starts with a newline to seal them into their own line
    torn: bool,

    #[cfg(test)]
    fail_next_write: bool,
}

impl WalFile {
    fn write_durably(&mut self, buf: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        let inject = std::mem::take(&mut self.fail_next_write);
        #[cfg(not(test))]
        let inject = false;

        if inject {
            // Half a batch reaches the file, as on a full disk
            self.file.write_all(&buf[..buf.len() / 2])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }

        self.file.write_all(buf)?;
        self.file.sync_data()
    }
}

pub struct WriteAheadLog {
    path: PathBuf,
    crypto: Arc<CryptoManager>,
    inner: Mutex<WalFile>,
}

impl WriteAheadLog {
    /// Open (creating if needed) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P, crypto: Arc<CryptoManager>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;

        // Terminate a torn trailing record so the next append starts on its own line
        if !contents.is_empty() && contents.last() != Some(&b'\n') {
            tracing::warn!("WAL {:?} ends with a partial record; sealing it off", path);
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        let entries = contents
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .count();

        tracing::debug!("Opened WAL {:?} with {} entries", path, entries);

        Ok(Self {
            path,
            crypto,
            inner: Mutex::new(WalFile {
                file,
                entries,
                torn: false,
                #[cfg(test)]
                fail_next_write: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one entry.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Durably append several entries with a single write and fsync.
    pub fn append_batch(&self, entries: &[WalEntry]) -> Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(self.encode_line(entry)?.as_bytes());
            buf.push(b'\n');
        }

        let mut inner = self.inner.lock();
        if inner.torn {
            buf.insert(0, b'\n');
        }
        let start = inner
            .file
            .metadata()
            .map_err(|e| GraphError::WalWrite(format!("{:?}: {}", self.path, e)))?
            .len();

        if let Err(e) = inner.write_durably(&buf) {
            // Cut off whatever part of the batch landed
            if let Err(rollback) = inner.file.set_len(start).and_then(|_| inner.file.sync_data()) {
                tracing::error!("WAL {:?} keeps a partial record: {}", self.path, rollback);
                inner.torn = true;
            }
            return Err(GraphError::WalWrite(format!("{:?}: {}", self.path, e)));
        }

        inner.torn = false;
        inner.entries += entries.len();
        Ok(())
    }

    /// Make the next append fail after writing half its bytes.
    #[cfg(test)]
    pub(crate) fn fail_next_append(&self) {
        self.inner.lock().fail_next_write = true;
    }

    /// Every readable entry in append order. Unreadable lines are skipped
    /// with a warning.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        let _guard = self.inner.lock();
        let contents = fs::read(&self.path)?;

        let mut entries = Vec::new();
        for (idx, line) in contents.split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            match self.decode_line(idx + 1, line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping WAL entry: {}", e),
            }
        }
        Ok(entries)
    }

    /// Empty the log. Only valid once every logged mutation is saved.
    pub fn truncate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .file
            .set_len(0)
            .and_then(|_| inner.file.sync_all())
            .map_err(|e| GraphError::WalWrite(format!("truncate {:?}: {}", self.path, e)))?;
        inner.entries = 0;
        inner.torn = false;
        Ok(())
    }

    /// Entries currently in the file, counting unreadable lines.
    pub fn len(&self) -> usize {
        self.inner.lock().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode_line(&self, entry: &WalEntry) -> Result<String> {
        let json = serde_json::to_vec(entry)?;
        let sealed = self.crypto.encrypt(&json)?;
        Ok(BASE64.encode(sealed))
    }

    fn decode_line(&self, line_no: usize, line: &[u8]) -> Result<WalEntry> {
        let corrupt = |reason: String| GraphError::WalCorruptEntry { line: line_no, reason };

        let text = std::str::from_utf8(line).map_err(|e| corrupt(e.to_string()))?;
        let sealed = BASE64
            .decode(text.trim_end_matches('\r'))
            .map_err(|e| corrupt(format!("base64: {}", e)))?;
        let json = self
            .crypto
            .decrypt(&sealed)
            .map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| corrupt(format!("json: {}", e)))
    }
}
