//! RPC-specific error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Bus(#[from] aegis_bus::BusError),

    #[error(transparent)]
    Discovery(#[from] aegis_discovery::DiscoveryError),

    #[error("no healthy instance of {0} available")]
    NoInstanceAvailable(String),
}

impl From<RpcError> for CoreError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Bus(e) => e.into(),
            RpcError::Discovery(e) => e.into(),
            RpcError::NoInstanceAvailable(service) => CoreError::NotFound(service),
        }
    }
}
