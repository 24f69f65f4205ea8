//! Error types for the graph engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Integrity violation: {role} node '{id}' does not exist")]
    IntegrityViolation { id: String, role: &'static str },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("Writes are fenced after a WAL failure; acknowledge it before writing again")]
    WriteFenced,

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Shard {shard} is corrupt: {reason}")]
    StorageCorruption { shard: usize, reason: String },

    #[error("Corrupt WAL entry at line {line}: {reason}")]
    WalCorruptEntry { line: usize, reason: String },

    #[error("Failed to initialize encryption key: {0}")]
    CryptoInit(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
