//! The running [`Service`]: registration, handler installation, the
//! heartbeat loop, and the ordered shutdown drain (spec §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aegis_bus::{CommandHandler, EventHandler, MessageBus, RpcHandler};
use aegis_config::CoreConfig;
use aegis_discovery::ServiceDiscovery;
use aegis_election::ElectionState;
use aegis_failover::FailoverMonitor;
use aegis_registry::ServiceRegistry;
use aegis_rpc::{RetryPolicy, RpcCall, RpcClient};
use aegis_types::{
    CoreError, Event, GroupId, InstanceId, InstanceStatus, MethodName, MetricsSink, RPCResponse, ServiceInstance,
    ServiceName, StickyActiveStatus,
};

use crate::error::ServiceError;
use crate::handlers::{AcceptingGate, GuardedCommandHandler, GuardedEventHandler, GuardedRpcHandler};

/// Grace period the drain sequence waits after closing the accepting gate,
/// before deregistering and disconnecting (spec §5 "default 10 s").
pub const SHUTDOWN_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);

struct PendingHandlers {
    rpc: Vec<(MethodName, Arc<dyn RpcHandler>, bool)>,
    events: Vec<(String, Arc<dyn EventHandler>, Option<String>)>,
    commands: Vec<(String, Arc<dyn CommandHandler>)>,
}

/// A running (or not-yet-started) service instance: the bus connection,
/// registry/discovery/RPC stack, optional HA election, and the handler
/// registry that freezes once [`Self::start`] installs it on the bus.
pub struct Service {
    service_name: ServiceName,
    instance_id: InstanceId,
    group: GroupId,
    config: CoreConfig,
    ha_enabled: bool,
    metrics: Arc<dyn MetricsSink>,

    bus: Arc<MessageBus>,
    registry: Arc<ServiceRegistry>,
    discovery: Arc<ServiceDiscovery>,
    rpc_client: Arc<RpcClient>,
    failover: Option<Arc<FailoverMonitor>>,

    gate: Arc<AcceptingGate>,
    cancellation: CancellationToken,
    started: AtomicBool,

    pending: AsyncMutex<PendingHandlers>,
    instance: Arc<AsyncMutex<ServiceInstance>>,
    heartbeat_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Service {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        service_name: ServiceName,
        instance_id: InstanceId,
        version: String,
        group: GroupId,
        config: CoreConfig,
        ha_enabled: bool,
        metrics: Arc<dyn MetricsSink>,
        bus: Arc<MessageBus>,
        registry: Arc<ServiceRegistry>,
        discovery: Arc<ServiceDiscovery>,
        rpc_client: Arc<RpcClient>,
        failover: Option<Arc<FailoverMonitor>>,
        gate: Arc<AcceptingGate>,
        cancellation: CancellationToken,
    ) -> Self {
        let initial_status = if ha_enabled { InstanceStatus::Standby } else { InstanceStatus::Active };
        let initial_sticky = ha_enabled.then_some(StickyActiveStatus::Standby);
        let instance = ServiceInstance {
            service_name: service_name.clone(),
            instance_id: instance_id.clone(),
            version,
            status: initial_status,
            last_heartbeat: Utc::now(),
            sticky_active_status: initial_sticky,
            metadata: std::collections::BTreeMap::new(),
        };

        Self {
            service_name,
            instance_id,
            group,
            config,
            ha_enabled,
            metrics,
            bus,
            registry,
            discovery,
            rpc_client,
            failover,
            gate,
            cancellation,
            started: AtomicBool::new(false),
            pending: AsyncMutex::new(PendingHandlers { rpc: Vec::new(), events: Vec::new(), commands: Vec::new() }),
            instance: Arc::new(AsyncMutex::new(instance)),
            heartbeat_task: AsyncMutex::new(None),
        }
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    pub fn rpc_client(&self) -> &Arc<RpcClient> {
        &self.rpc_client
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// A snapshot of this instance's current registry record.
    pub async fn instance_snapshot(&self) -> ServiceInstance {
        self.instance.lock().await.clone()
    }

    fn ensure_not_started(&self) -> Result<(), ServiceError> {
        if self.is_started() {
            return Err(ServiceError::AlreadyStarted);
        }
        Ok(())
    }

    /// Registers a handler for `method`. Rejected once the service has
    /// started (spec §5 "handler registry is frozen at `start()`").
    pub async fn register_rpc(&self, method: MethodName, handler: Arc<dyn RpcHandler>) -> Result<(), ServiceError> {
        self.ensure_not_started()?;
        self.pending.lock().await.rpc.push((method, handler, false));
        Ok(())
    }

    /// Registers a handler that only runs while this instance holds
    /// leadership of `self.group` (spec [SUPPLEMENT] `exclusive_rpc`).
    /// Requires HA to have been enabled on the builder.
    pub async fn register_exclusive_rpc(
        &self,
        method: MethodName,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<(), ServiceError> {
        self.ensure_not_started()?;
        if self.failover.is_none() {
            return Err(ServiceError::Failover(aegis_failover::FailoverError::NotMonitoring {
                service: self.service_name.to_string(),
                instance_id: self.instance_id.to_string(),
                group: self.group.to_string(),
            }));
        }
        self.pending.lock().await.rpc.push((method, handler, true));
        Ok(())
    }

    pub async fn subscribe_event(
        &self,
        pattern: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        durable: Option<String>,
    ) -> Result<(), ServiceError> {
        self.ensure_not_started()?;
        self.pending.lock().await.events.push((pattern.into(), handler, durable));
        Ok(())
    }

    pub async fn register_command(
        &self,
        command: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), ServiceError> {
        self.ensure_not_started()?;
        self.pending.lock().await.commands.push((command.into(), handler));
        Ok(())
    }

    /// Installs every registered handler on the bus, registers this
    /// instance, starts HA election monitoring if enabled, and spawns the
    /// heartbeat loop. Returns [`ServiceError::AlreadyStarted`] if called
    /// twice.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.ensure_not_started()?;

        let PendingHandlers { rpc, events, commands } = {
            let mut pending = self.pending.lock().await;
            PendingHandlers {
                rpc: std::mem::take(&mut pending.rpc),
                events: std::mem::take(&mut pending.events),
                commands: std::mem::take(&mut pending.commands),
            }
        };

        for (method, handler, exclusive) in rpc {
            let guarded: Arc<dyn RpcHandler> = if exclusive {
                let failover = Arc::clone(self.failover.as_ref().expect("validated at registration"));
                Arc::new(GuardedRpcHandler::exclusive(
                    handler,
                    Arc::clone(&self.gate),
                    failover,
                    self.service_name.clone(),
                    self.instance_id.clone(),
                    self.group.clone(),
                ))
            } else {
                Arc::new(GuardedRpcHandler::new(handler, Arc::clone(&self.gate)))
            };
            self.bus.register_rpc_handler(&self.service_name, &method, guarded).await?;
        }

        for (pattern, handler, durable) in events {
            let guarded = Arc::new(GuardedEventHandler::new(handler, Arc::clone(&self.gate)));
            self.bus.subscribe_event(&pattern, guarded, durable.as_deref()).await?;
        }

        for (command, handler) in commands {
            let guarded = Arc::new(GuardedCommandHandler::new(handler, Arc::clone(&self.gate)));
            self.bus.register_command_handler(&self.service_name, &command, guarded).await?;
        }

        let registry_ttl = self.config.registry_ttl().map_err(config_validation_error)?;
        if self.config.enable_registration {
            let instance = self.instance.lock().await.clone();
            self.registry.register(&instance, registry_ttl).await?;
        }

        if let (true, Some(failover)) = (self.ha_enabled, &self.failover) {
            let election_heartbeat = self.config.election_heartbeat().map_err(config_validation_error)?;
            let leader_ttl = self.config.leader_ttl().map_err(config_validation_error)?;
            failover
                .start_monitoring(
                    self.service_name.clone(),
                    self.instance_id.clone(),
                    self.group.clone(),
                    election_heartbeat,
                    leader_ttl,
                    self.config.failover_policy,
                )
                .await?;
        }

        self.gate.open();
        self.started.store(true, Ordering::SeqCst);

        let handle = self.spawn_heartbeat_task(registry_ttl);
        *self.heartbeat_task.lock().await = Some(handle);

        info!(service = %self.service_name, instance = %self.instance_id, ha = self.ha_enabled, "service started");
        Ok(())
    }

    fn spawn_heartbeat_task(&self, registry_ttl: aegis_types::Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let bus = Arc::clone(&self.bus);
        let failover = self.failover.clone();
        let instance = Arc::clone(&self.instance);
        let service_name = self.service_name.clone();
        let instance_id = self.instance_id.clone();
        let group = self.group.clone();
        let enable_registration = self.config.enable_registration;
        let cancellation = self.cancellation.clone();
        let interval = self
            .config
            .heartbeat_interval()
            .unwrap_or(aegis_types::Duration::from_secs(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.as_std());
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut instance = instance.lock().await;
                        instance.last_heartbeat = Utc::now();

                        if let Some(failover) = &failover {
                            if let Some(state) = failover.get_status(&service_name, &instance_id, &group).await {
                                let (status, sticky) = match state {
                                    ElectionState::Active => (InstanceStatus::Active, StickyActiveStatus::Active),
                                    ElectionState::Standby => (InstanceStatus::Standby, StickyActiveStatus::Standby),
                                    ElectionState::Electing => (InstanceStatus::Standby, StickyActiveStatus::Electing),
                                };
                                instance.status = status;
                                instance.sticky_active_status = Some(sticky);
                            }
                        }

                        if enable_registration {
                            if let Err(e) = registry.heartbeat(&instance, registry_ttl).await {
                                warn!(error = %e, "registry heartbeat write failed");
                            }
                        }

                        if let Err(e) = bus.send_heartbeat(&service_name, &instance_id, HashMap::new()).await {
                            warn!(error = %e, "bus heartbeat publish failed");
                        }
                    }
                }
            }
        })
    }

    /// Performs an outbound RPC call through this service's identity, using
    /// `retry` (or [`RetryPolicy::default`] when `None`).
    pub async fn call_rpc(
        &self,
        service: ServiceName,
        method: MethodName,
        params: serde_json::Value,
        timeout: aegis_types::Duration,
        retry: Option<RetryPolicy>,
    ) -> Result<RPCResponse, CoreError> {
        let call = RpcCall {
            service,
            method,
            params,
            timeout,
            source: self.instance_id.clone(),
            preferred: None,
        };
        self.rpc_client.call(call, &retry.unwrap_or_default()).await
    }

    pub async fn publish_event(&self, event: &Event) -> Result<(), ServiceError> {
        self.bus.publish_event(event).await.map_err(ServiceError::from)
    }

    /// Drains in the order spec §5 mandates: stop accepting new handler
    /// invocations, wait out the grace period for in-flight handlers,
    /// release HA leadership if held, deregister, then close the bus.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        if !self.is_started() {
            return Err(ServiceError::NotStarted);
        }

        self.gate.close();
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;

        self.cancellation.cancel();
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(failover) = &self.failover {
            if let Err(e) = failover.stop_monitoring(&self.service_name, &self.instance_id, &self.group).await {
                warn!(error = %e, "failed to release HA leadership during shutdown");
            }
        }

        if self.config.enable_registration {
            if let Err(e) = self.registry.deregister(&self.service_name, &self.instance_id).await {
                warn!(error = %e, "failed to deregister instance during shutdown");
            }
        }

        self.bus.disconnect().await;
        self.started.store(false, Ordering::SeqCst);
        info!(service = %self.service_name, instance = %self.instance_id, "service stopped");
        Ok(())
    }
}

fn config_validation_error(e: CoreError) -> ServiceError {
    ServiceError::Config(aegis_config::ConfigError::Validation(e.to_string()))
}
