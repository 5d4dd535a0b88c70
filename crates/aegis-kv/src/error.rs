//! KV-specific error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("revision mismatch: expected {expected}, current {current}")]
    RevisionMismatch { expected: u64, current: u64 },

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid key '{0}': keys may not contain '.', ' ', '*', '>', or '/'")]
    InvalidKey(String),

    #[error("bucket '{0}' does not support per-key TTL (stream lacks allow_msg_ttl)")]
    TtlNotSupported(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<KvError> for CoreError {
    fn from(value: KvError) -> Self {
        match value {
            KvError::NotConnected(_) => CoreError::NotConnected,
            KvError::RevisionMismatch { expected, current } => {
                CoreError::RevisionMismatch { expected, current }
            }
            KvError::AlreadyExists(key) => CoreError::AlreadyExists(key),
            KvError::NotFound(key) => CoreError::NotFound(key),
            KvError::InvalidKey(msg) => CoreError::Validation(msg),
            KvError::TtlNotSupported(_) => CoreError::KvTtlNotSupported,
            KvError::Transport(msg) => CoreError::Transport(msg),
        }
    }
}
