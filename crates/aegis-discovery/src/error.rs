//! Discovery-specific error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Registry(#[from] aegis_registry::RegistryError),
}

impl From<DiscoveryError> for CoreError {
    fn from(value: DiscoveryError) -> Self {
        match value {
            DiscoveryError::Registry(e) => e.into(),
        }
    }
}
