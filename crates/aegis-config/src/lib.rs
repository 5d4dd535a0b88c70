//! Layered configuration for the AegisSDK runtime.
//!
//! Precedence, highest to lowest:
//!
//! 1. Explicit overrides passed to [`ConfigLoader`] by the embedding
//!    application.
//! 2. Environment variables (`AEGIS_*`).
//! 3. `aegis.local.toml` (gitignored, local overrides).
//! 4. `aegis.toml` (project config).
//! 5. Built-in defaults ([`CoreConfig::default`]).

mod error;
mod failover;
mod loader;

pub use error::ConfigError;
pub use failover::{FailoverPolicy, FailoverTiming};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};

use aegis_types::{CoreError, Duration, GroupId};

/// The options table in spec §6, "Configuration".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub servers: Vec<String>,
    pub pool_size: u8,
    pub max_reconnect_attempts: u32,
    pub reconnect_time_wait_secs: f64,
    pub use_msgpack: bool,
    pub registry_ttl_secs: f64,
    pub heartbeat_interval_secs: f64,
    pub stale_threshold_secs: f64,
    pub leader_ttl_secs: f64,
    pub election_heartbeat_secs: f64,
    pub election_timeout_secs: f64,
    pub failover_policy: FailoverPolicy,
    pub enable_registration: bool,
    pub group_id: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            pool_size: 1,
            max_reconnect_attempts: 10,
            reconnect_time_wait_secs: 2.0,
            use_msgpack: true,
            registry_ttl_secs: 30.0,
            heartbeat_interval_secs: 10.0,
            stale_threshold_secs: 35.0,
            leader_ttl_secs: 5.0,
            election_heartbeat_secs: 2.0,
            election_timeout_secs: 10.0,
            failover_policy: FailoverPolicy::default(),
            enable_registration: true,
            group_id: "default".to_string(),
        }
    }
}

impl CoreConfig {
    /// Enforces spec §3 Global invariant 4: `heartbeat_interval < leader_ttl
    /// < election_timeout`, plus the pool size and identifier bounds implied
    /// by §4.1 and §3.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size < 1 || self.pool_size > 10 {
            return Err(ConfigError::Validation(format!(
                "pool_size must be 1..=10, got {}",
                self.pool_size
            )));
        }
        if self.servers.is_empty() {
            return Err(ConfigError::Validation(
                "servers must contain at least one endpoint".to_string(),
            ));
        }
        for server in &self.servers {
            let scheme_ok = ["nats://", "tls://", "ws://", "wss://"]
                .iter()
                .any(|scheme| server.starts_with(scheme));
            if !scheme_ok {
                return Err(ConfigError::Validation(format!(
                    "server url '{server}' must use scheme nats|tls|ws|wss"
                )));
            }
        }
        if !(self.election_heartbeat_secs < self.leader_ttl_secs
            && self.leader_ttl_secs < self.election_timeout_secs)
        {
            return Err(ConfigError::Validation(format!(
                "timing inequality violated: election_heartbeat ({}) < leader_ttl ({}) < election_timeout ({}) must hold",
                self.election_heartbeat_secs, self.leader_ttl_secs, self.election_timeout_secs
            )));
        }
        GroupId::new(self.group_id.clone()).map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(())
    }

    pub fn group_id(&self) -> Result<GroupId, CoreError> {
        GroupId::new(self.group_id.clone())
    }

    pub fn reconnect_time_wait(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.reconnect_time_wait_secs)
    }

    pub fn registry_ttl(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.registry_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.heartbeat_interval_secs)
    }

    pub fn stale_threshold(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.stale_threshold_secs)
    }

    pub fn leader_ttl(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.leader_ttl_secs)
    }

    pub fn election_heartbeat(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.election_heartbeat_secs)
    }

    pub fn election_timeout(&self) -> Result<Duration, CoreError> {
        Duration::from_secs_f64(self.election_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_timing_invariant() {
        CoreConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn rejects_broken_timing_inequality() {
        let mut config = CoreConfig::default();
        config.leader_ttl_secs = 1.0;
        config.election_heartbeat_secs = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_pool_size() {
        let mut config = CoreConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());
        config.pool_size = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_server_scheme() {
        let mut config = CoreConfig::default();
        config.servers = vec!["http://localhost:4222".to_string()];
        assert!(config.validate().is_err());
    }
}
