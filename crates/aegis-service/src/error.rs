//! Service-lifecycle error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] aegis_config::ConfigError),

    #[error(transparent)]
    Bus(#[from] aegis_bus::BusError),

    #[error(transparent)]
    Registry(#[from] aegis_registry::RegistryError),

    #[error(transparent)]
    Failover(#[from] aegis_failover::FailoverError),

    #[error("service already started")]
    AlreadyStarted,

    #[error("service not started")]
    NotStarted,
}

impl From<ServiceError> for CoreError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Config(e) => CoreError::Validation(e.to_string()),
            ServiceError::Bus(e) => e.into(),
            ServiceError::Registry(e) => e.into(),
            ServiceError::Failover(e) => e.into(),
            ServiceError::AlreadyStarted | ServiceError::NotStarted => CoreError::Validation(value.to_string()),
        }
    }
}
