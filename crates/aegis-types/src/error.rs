//! The error taxonomy every `aegis-*` crate composes into.
//!
//! Each crate defines its own narrow `thiserror` enum for the errors its own
//! operations can produce (`KvError`, `RegistryError`, ...) and converts into
//! `CoreError` at its public boundary via `#[from]`. `CoreError` is what
//! crosses crate lines and what a caller ultimately matches on; it carries a
//! stable machine `code()` alongside the human `Display` message so clients
//! in any language can branch on behavior without parsing prose.

use thiserror::Error;

/// Stable machine-readable error codes (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotConnected,
    Timeout,
    RevisionMismatch,
    AlreadyExists,
    NotFound,
    NotActive,
    PublishFailed,
    ValidationError,
    KvTtlNotSupported,
    AfterNRetries,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RevisionMismatch => "REVISION_MISMATCH",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotActive => "NOT_ACTIVE",
            ErrorCode::PublishFailed => "PUBLISH_FAILED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::KvTtlNotSupported => "KV_TTL_NOT_SUPPORTED",
            ErrorCode::AfterNRetries => "AFTER_N_RETRIES",
        }
    }
}

/// The unified, cross-crate error type (spec §7 table).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not connected: no healthy transport")]
    NotConnected,

    #[error("operation timed out after {0}")]
    Timeout(crate::Duration),

    #[error("revision mismatch: expected {expected}, current {current}")]
    RevisionMismatch { expected: u64, current: u64 },

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("target is not the active instance")]
    NotActive,

    #[error("publish failed after retries: {0}")]
    PublishFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("KV bucket does not support per-key TTL")]
    KvTtlNotSupported,

    #[error("call failed after {attempts} retries: {last}")]
    AfterNRetries { attempts: u32, last: Box<CoreError> },

    #[error("transport error: {0}")]
    Transport(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotConnected | CoreError::Transport(_) => ErrorCode::NotConnected,
            CoreError::Timeout(_) => ErrorCode::Timeout,
            CoreError::RevisionMismatch { .. } => ErrorCode::RevisionMismatch,
            CoreError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::NotActive => ErrorCode::NotActive,
            CoreError::PublishFailed(_) => ErrorCode::PublishFailed,
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::KvTtlNotSupported => ErrorCode::KvTtlNotSupported,
            CoreError::AfterNRetries { .. } => ErrorCode::AfterNRetries,
        }
    }

    /// `true` for errors a caller following spec §7's retry guidance may
    /// retry transparently (transient transport/timeout conditions).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::NotConnected | CoreError::Timeout(_) | CoreError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::NotActive.as_str(), "NOT_ACTIVE");
        assert_eq!(ErrorCode::RevisionMismatch.as_str(), "REVISION_MISMATCH");
    }

    #[test]
    fn validation_error_never_retryable() {
        let err = CoreError::Validation("bad input".into());
        assert!(!err.is_retryable());
    }
}
