//! # AegisSDK
//!
//! A Rust microservice runtime built on NATS/JetStream, providing service
//! registration, discovery, request/reply RPC, event pub/sub, durable
//! commands, and sticky single-active leader election for services that need
//! exactly one active instance per group.
//!
//! - **Ordered by design** - elections are decided by create-only CAS writes
//!   to a JetStream KV bucket, never by clock agreement between instances
//! - **Graceful handoff** - RPC clients retry transparently across a leader
//!   transition instead of surfacing it to callers
//! - **No split-brain by construction** - a lease TTL plus heartbeat
//!   hysteresis bound how long a stale leader can be mistaken for live
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Service                                │
//! │  ┌──────────┐  ┌───────────┐  ┌───────────┐  ┌─────────────────┐ │
//! │  │ Registry │  │ Discovery │  │    RPC    │  │ Failover/Election│ │
//! │  └────┬─────┘  └─────┬─────┘  └─────┬─────┘  └────────┬────────┘ │
//! │       └──────────────┴───────┬──────┴─────────────────┘          │
//! │                        ┌─────┴──────┐                            │
//! │                        │ Message Bus│ (NATS core + JetStream)     │
//! │                        └────────────┘                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use aegis_sdk::{ConfigLoader, CoreError, MethodName, RPCRequest, RpcHandler, ServiceBuilder};
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! struct CreateOrder;
//!
//! #[async_trait]
//! impl RpcHandler for CreateOrder {
//!     async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError> {
//!         Ok(request.params)
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! let service = ServiceBuilder::new("orders", config)?
//!     .with_ha(true)
//!     .build()
//!     .await?;
//!
//! service
//!     .register_exclusive_rpc(MethodName::new("create_order")?, Arc::new(CreateOrder))
//!     .await?;
//! service.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - **SDK layer**: [`ServiceBuilder`], [`Service`] - lifecycle, handler
//!   registration, start/stop
//! - **Configuration**: [`CoreConfig`], [`ConfigLoader`], [`FailoverPolicy`]
//! - **Transport**: the Message Bus Adapter ([`MessageBus`]) and its handler
//!   traits ([`RpcHandler`], [`EventHandler`], [`CommandHandler`])
//! - **Coordination**: [`ServiceRegistry`], [`ServiceDiscovery`],
//!   [`FailoverMonitor`], [`ElectionState`]
//! - **Calling out**: [`RpcClient`], [`RpcCall`], [`RetryPolicy`]

// Re-export the SDK layer - the main API most applications use.
pub use aegis_service::{
    AcceptingGate, GuardedCommandHandler, GuardedEventHandler, GuardedRpcHandler, Service, ServiceBuilder,
    ServiceError, SHUTDOWN_GRACE_PERIOD,
};

// Re-export configuration.
pub use aegis_config::{ConfigError, ConfigLoader, CoreConfig, FailoverPolicy, FailoverTiming};

// Re-export core domain types and the unified error taxonomy.
pub use aegis_types::{
    Command, CommandPriority, Duration, ErrorCode, Event, EventType, CoreError, GroupId, InstanceId,
    InstanceStatus, KVEntry, LeaderRecord, MetricsSink, MethodName, NoopMetrics, RPCRequest, RPCResponse,
    ServiceInstance, ServiceName, StickyActiveStatus,
};

// Re-export the Message Bus Adapter and its handler traits.
pub use aegis_bus::{decode, encode, BusError, CommandHandler, EventHandler, MessageBus, RpcHandler};

// Re-export the raw JetStream KV primitive, for applications that need a
// bucket of their own alongside the registry/election buckets.
pub use aegis_kv::{to_wire_key, BucketStatus, KvError, KvStore, PutMode, PutOptions, WatchOp};

// Re-export the Service Registry use case.
pub use aegis_registry::{RegistryError, RegistryEvent, ServiceRegistry, DEFAULT_CLEANUP_INTERVAL, DEFAULT_STALE_BUFFER};

// Re-export the election primitives, for applications that observe election
// state directly rather than through `FailoverMonitor`.
pub use aegis_election::{
    ElectionCoordinator, ElectionControl, ElectionError, ElectionEvent, ElectionState, HeartbeatMonitor, MonitorEvent,
};

// Re-export the Failover Coordinator use case - the normal entry point for
// Sticky Single-Active election.
pub use aegis_failover::{FailoverError, FailoverMonitor};

// Re-export Service Discovery.
pub use aegis_discovery::{DiscoveryError, SelectionStrategy, ServiceDiscovery};

// Re-export the RPC Call use case.
pub use aegis_rpc::{RetryPolicy, RpcCall, RpcClient, RpcError};
