//! Fluent construction of a [`Service`] (spec "Service Lifecycle" row, §5
//! "handler registry frozen at `start()`"): identity and wiring are settled
//! here; `build()` opens the bus connection and the registry/discovery/RPC
//! stack but does not yet register the instance or install handlers — that
//! happens in [`Service::start`].

use std::sync::Arc;

use aegis_bus::MessageBus;
use aegis_config::CoreConfig;
use aegis_discovery::ServiceDiscovery;
use aegis_failover::FailoverMonitor;
use aegis_registry::ServiceRegistry;
use aegis_rpc::RpcClient;
use aegis_types::{CoreError, GroupId, InstanceId, MetricsSink, NoopMetrics, ServiceName};
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::handlers::AcceptingGate;
use crate::service::Service;

/// Builds a [`Service`]. `service_name` and `config` are required; every
/// other field defaults to something workable for a single-instance,
/// non-HA deployment.
pub struct ServiceBuilder {
    service_name: ServiceName,
    config: CoreConfig,
    instance_id: InstanceId,
    version: String,
    group: GroupId,
    ha_enabled: bool,
    metrics: Arc<dyn MetricsSink>,
}

impl ServiceBuilder {
    pub fn new(service_name: &str, config: CoreConfig) -> Result<Self, CoreError> {
        let service_name = ServiceName::new(service_name)?;
        let group = config.group_id()?;
        Ok(Self {
            service_name,
            config,
            instance_id: default_instance_id()?,
            version: "0.1.0".to_string(),
            group,
            ha_enabled: false,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn with_instance_id(mut self, instance_id: &str) -> Result<Self, CoreError> {
        self.instance_id = InstanceId::new(instance_id)?;
        Ok(self)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_group(mut self, group: &str) -> Result<Self, CoreError> {
        self.group = GroupId::new(group)?;
        Ok(self)
    }

    /// Enables Sticky Single-Active election for this service (spec §4.4-§4.6).
    /// Required before registering any exclusive RPC handler.
    pub fn with_ha(mut self, enabled: bool) -> Self {
        self.ha_enabled = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Connects the Message Bus Adapter, opens the registry/election KV
    /// buckets, and assembles discovery + the RPC client. Does not register
    /// the instance or install any handler yet.
    pub async fn build(self) -> Result<Service, ServiceError> {
        self.config.validate()?;

        let bus = Arc::new(MessageBus::connect(&self.config).await?);
        let js = bus.jetstream();

        let registry_ttl = self
            .config
            .registry_ttl()
            .map_err(|e| aegis_config::ConfigError::Validation(e.to_string()))?;
        let registry = Arc::new(ServiceRegistry::connect(&js, registry_ttl).await?);
        let discovery = Arc::new(ServiceDiscovery::new(Arc::clone(&registry), registry_ttl));
        let rpc_client =
            Arc::new(RpcClient::new(Arc::clone(&bus), Arc::clone(&discovery)).with_metrics(Arc::clone(&self.metrics)));

        let failover = if self.ha_enabled {
            Some(Arc::new(FailoverMonitor::new(js, Arc::clone(&bus))))
        } else {
            None
        };

        Ok(Service::new(
            self.service_name,
            self.instance_id,
            self.version,
            self.group,
            self.config,
            self.ha_enabled,
            self.metrics,
            bus,
            registry,
            discovery,
            rpc_client,
            failover,
            AcceptingGate::new(),
            CancellationToken::new(),
        ))
    }
}

fn default_instance_id() -> Result<InstanceId, CoreError> {
    InstanceId::new(format!("{}-{}", hostname_fragment(), std::process::id()))
}

fn hostname_fragment() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "instance".to_string())
}
