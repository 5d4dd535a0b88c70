//! Failover-use-case error taxonomy.

use aegis_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error(transparent)]
    Kv(#[from] aegis_kv::KvError),

    #[error(transparent)]
    Election(#[from] aegis_election::ElectionError),

    #[error(transparent)]
    Bus(#[from] aegis_bus::BusError),

    #[error("already monitoring {service}/{instance_id}/{group}")]
    AlreadyMonitoring { service: String, instance_id: String, group: String },

    #[error("not monitoring {service}/{instance_id}/{group}")]
    NotMonitoring { service: String, instance_id: String, group: String },

    #[error("refusing manual election: leader already healthy")]
    LeaderAlreadyHealthy,
}

impl From<FailoverError> for CoreError {
    fn from(value: FailoverError) -> Self {
        match value {
            FailoverError::Kv(e) => e.into(),
            FailoverError::Election(e) => e.into(),
            FailoverError::Bus(e) => e.into(),
            FailoverError::AlreadyMonitoring { service, instance_id, group } => {
                CoreError::AlreadyExists(format!("{service}/{instance_id}/{group}"))
            }
            FailoverError::NotMonitoring { service, instance_id, group } => {
                CoreError::NotFound(format!("{service}/{instance_id}/{group}"))
            }
            FailoverError::LeaderAlreadyHealthy => CoreError::Validation("leader already healthy".to_string()),
        }
    }
}
