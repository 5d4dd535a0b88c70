//! Registry-specific error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Kv(#[from] aegis_kv::KvError),

    #[error("instance not found: {service}/{instance_id}")]
    InstanceNotFound { service: String, instance_id: String },

    #[error(transparent)]
    Validation(#[from] CoreError),
}

impl From<RegistryError> for CoreError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Kv(e) => e.into(),
            RegistryError::InstanceNotFound { service, instance_id } => {
                CoreError::NotFound(format!("{service}/{instance_id}"))
            }
            RegistryError::Validation(e) => e,
        }
    }
}
