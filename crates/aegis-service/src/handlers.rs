//! Handler registration and the sticky-active exclusive-RPC gate.
//!
//! [SUPPLEMENT] Grounded on the Python original's `exclusive_rpc` decorator
//! (`aegis_sdk/application/single_active_service.py`): a handler registered
//! as "exclusive" never runs unless the owning Service currently holds
//! leadership for its election group, regardless of what the handler itself
//! would have done. This is the server-side half of the client-side
//! `NOT_ACTIVE` retry implemented in `aegis-rpc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use aegis_bus::{CommandHandler, EventHandler, RpcHandler};
use aegis_election::ElectionState;
use aegis_failover::FailoverMonitor;
use aegis_types::{Command, CoreError, Event, GroupId, InstanceId, RPCRequest, ServiceName};

/// Flips to `false` once a `Service` begins its shutdown drain (spec §5
/// "stop accepting new handler invocations"); every wrapped handler
/// consults it before doing any work.
#[derive(Debug, Default)]
pub struct AcceptingGate(AtomicBool);

impl AcceptingGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps an [`RpcHandler`] so it stops accepting work during shutdown drain,
/// and — when `exclusive` — only runs while this instance is the elected
/// leader of `group`.
pub struct GuardedRpcHandler {
    inner: Arc<dyn RpcHandler>,
    gate: Arc<AcceptingGate>,
    exclusive: Option<ExclusiveContext>,
}

struct ExclusiveContext {
    failover: Arc<FailoverMonitor>,
    service: ServiceName,
    instance_id: InstanceId,
    group: GroupId,
}

impl GuardedRpcHandler {
    pub fn new(inner: Arc<dyn RpcHandler>, gate: Arc<AcceptingGate>) -> Self {
        Self { inner, gate, exclusive: None }
    }

    pub fn exclusive(
        inner: Arc<dyn RpcHandler>,
        gate: Arc<AcceptingGate>,
        failover: Arc<FailoverMonitor>,
        service: ServiceName,
        instance_id: InstanceId,
        group: GroupId,
    ) -> Self {
        Self {
            inner,
            gate,
            exclusive: Some(ExclusiveContext { failover, service, instance_id, group }),
        }
    }
}

#[async_trait]
impl RpcHandler for GuardedRpcHandler {
    async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError> {
        if !self.gate.is_open() {
            return Err(CoreError::NotActive);
        }
        if let Some(ctx) = &self.exclusive {
            let state = ctx.failover.get_status(&ctx.service, &ctx.instance_id, &ctx.group).await;
            if state != Some(ElectionState::Active) {
                return Err(CoreError::NotActive);
            }
        }
        self.inner.handle(request).await
    }
}

/// Wraps an [`EventHandler`] so deliveries during shutdown drain are
/// dropped (a no-op `Ok(())`, matching spec §9 Open Question 2's "core NATS
/// has nothing to ack" semantics — there is no failed delivery to report).
pub struct GuardedEventHandler {
    inner: Arc<dyn EventHandler>,
    gate: Arc<AcceptingGate>,
}

impl GuardedEventHandler {
    pub fn new(inner: Arc<dyn EventHandler>, gate: Arc<AcceptingGate>) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl EventHandler for GuardedEventHandler {
    async fn handle(&self, event: Event) -> Result<(), CoreError> {
        if !self.gate.is_open() {
            return Ok(());
        }
        self.inner.handle(event).await
    }
}

/// Wraps a [`CommandHandler`] so deliveries during shutdown drain are
/// `nak`'d for redelivery rather than processed.
pub struct GuardedCommandHandler {
    inner: Arc<dyn CommandHandler>,
    gate: Arc<AcceptingGate>,
}

impl GuardedCommandHandler {
    pub fn new(inner: Arc<dyn CommandHandler>, gate: Arc<AcceptingGate>) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl CommandHandler for GuardedCommandHandler {
    async fn handle(&self, command: Command) -> Result<Value, CoreError> {
        if !self.gate.is_open() {
            return Err(CoreError::NotActive);
        }
        self.inner.handle(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError> {
            Ok(request.params)
        }
    }

    #[tokio::test]
    async fn closed_gate_rejects_before_delegating() {
        let gate = AcceptingGate::new();
        let handler = GuardedRpcHandler::new(Arc::new(EchoHandler), gate);
        let request = RPCRequest {
            message_id: "m1".into(),
            correlation_id: "c1".into(),
            method: aegis_types::MethodName::new("ping").unwrap(),
            params: serde_json::json!({"x": 1}),
            timeout: aegis_types::Duration::from_secs(1),
            source: InstanceId::new("client").unwrap(),
            target: ServiceName::new("orders").unwrap(),
        };
        let result = handler.handle(request).await;
        assert!(matches!(result, Err(CoreError::NotActive)));
    }

    #[tokio::test]
    async fn open_gate_delegates_to_inner() {
        let gate = AcceptingGate::new();
        gate.open();
        let handler = GuardedRpcHandler::new(Arc::new(EchoHandler), gate);
        let request = RPCRequest {
            message_id: "m1".into(),
            correlation_id: "c1".into(),
            method: aegis_types::MethodName::new("ping").unwrap(),
            params: serde_json::json!({"x": 1}),
            timeout: aegis_types::Duration::from_secs(1),
            source: InstanceId::new("client").unwrap(),
            target: ServiceName::new("orders").unwrap(),
        };
        let result = handler.handle(request).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }
}
