//! Bus-specific error taxonomy, composed into [`aegis_types::CoreError`].

use aegis_types::{CoreError, Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected: no healthy connection in the pool")]
    NotConnected,

    #[error("operation timed out after {0}")]
    Timeout(Duration),

    #[error("publish failed after retries: {0}")]
    PublishFailed(String),

    #[error("key/subject validation error: {0}")]
    Validation(String),

    #[error("underlying transport error: {0}")]
    Transport(String),

    #[error("stream does not support per-key TTL")]
    KvTtlNotSupported,
}

impl From<BusError> for CoreError {
    fn from(value: BusError) -> Self {
        match value {
            BusError::NotConnected => CoreError::NotConnected,
            BusError::Timeout(d) => CoreError::Timeout(d),
            BusError::PublishFailed(msg) => CoreError::PublishFailed(msg),
            BusError::Validation(msg) => CoreError::Validation(msg),
            BusError::Transport(msg) => CoreError::Transport(msg),
            BusError::KvTtlNotSupported => CoreError::KvTtlNotSupported,
        }
    }
}

impl From<async_nats::ConnectError> for BusError {
    fn from(value: async_nats::ConnectError) -> Self {
        BusError::Transport(value.to_string())
    }
}

impl From<async_nats::PublishError> for BusError {
    fn from(value: async_nats::PublishError) -> Self {
        BusError::Transport(value.to_string())
    }
}

impl From<async_nats::RequestError> for BusError {
    fn from(value: async_nats::RequestError) -> Self {
        BusError::Transport(value.to_string())
    }
}

impl From<async_nats::SubscribeError> for BusError {
    fn from(value: async_nats::SubscribeError) -> Self {
        BusError::Transport(value.to_string())
    }
}

impl From<async_nats::jetstream::context::CreateStreamError> for BusError {
    fn from(value: async_nats::jetstream::context::CreateStreamError) -> Self {
        BusError::Transport(value.to_string())
    }
}

impl From<async_nats::jetstream::stream::ConsumerError> for BusError {
    fn from(value: async_nats::jetstream::stream::ConsumerError) -> Self {
        BusError::Transport(value.to_string())
    }
}
