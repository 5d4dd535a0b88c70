//! Election-specific error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error(transparent)]
    Kv(#[from] aegis_kv::KvError),

    #[error("malformed leader record at {key}: {source}")]
    MalformedRecord { key: String, source: serde_json::Error },
}

impl From<ElectionError> for CoreError {
    fn from(value: ElectionError) -> Self {
        match value {
            ElectionError::Kv(e) => e.into(),
            ElectionError::MalformedRecord { key, source } => {
                CoreError::Validation(format!("malformed leader record at {key}: {source}"))
            }
        }
    }
}
