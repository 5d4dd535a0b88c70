//! End-to-end lifecycle tests against a real `nats-server` (spec §8:
//! scenarios needing a live NATS server are `#[ignore]`d integration tests).
//! Run manually with `cargo test -p aegis-service -- --ignored` once
//! `nats-server` is on `PATH`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::Value;

use aegis_bus::RpcHandler;
use aegis_service::ServiceBuilder;
use aegis_test_support::NatsServerHarness;
use aegis_types::{CoreError, MethodName, RPCRequest};

struct EchoHandler;

#[async_trait]
impl RpcHandler for EchoHandler {
    async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError> {
        Ok(request.params)
    }
}

#[tokio::test]
#[ignore = "requires a local nats-server binary"]
async fn service_starts_registers_and_answers_rpc() {
    let harness = NatsServerHarness::start().expect("failed to spawn nats-server");
    assert!(harness.wait_ready(StdDuration::from_secs(5)), "nats-server never came up");

    let config = harness.config();
    let service = ServiceBuilder::new("orders", config)
        .expect("valid service name")
        .build()
        .await
        .expect("service should connect and build");

    service
        .register_rpc(MethodName::new("echo").unwrap(), Arc::new(EchoHandler))
        .await
        .expect("registration before start succeeds");

    service.start().await.expect("service should start");
    assert!(service.is_started());

    // Registering after start is rejected: the handler registry is frozen.
    let err = service
        .register_rpc(MethodName::new("late").unwrap(), Arc::new(EchoHandler))
        .await
        .expect_err("registration after start must fail");
    assert!(matches!(err, aegis_service::ServiceError::AlreadyStarted));

    service.stop().await.expect("service should stop cleanly");
    assert!(!service.is_started());
}

#[tokio::test]
#[ignore = "requires a local nats-server binary"]
async fn exclusive_rpc_requires_ha_enabled() {
    let harness = NatsServerHarness::start().expect("failed to spawn nats-server");
    assert!(harness.wait_ready(StdDuration::from_secs(5)), "nats-server never came up");

    let service = ServiceBuilder::new("orders", harness.config())
        .expect("valid service name")
        .with_ha(false)
        .build()
        .await
        .expect("service should connect and build");

    let err = service
        .register_exclusive_rpc(MethodName::new("promote").unwrap(), Arc::new(EchoHandler))
        .await
        .expect_err("exclusive RPC without HA must be rejected");
    assert!(matches!(err, aegis_service::ServiceError::Failover(_)));
}
