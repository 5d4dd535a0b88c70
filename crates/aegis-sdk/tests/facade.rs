//! Smoke tests that the facade re-exports compose into a working
//! `ServiceBuilder` without needing a live NATS server.

use aegis_sdk::{CoreConfig, MethodName, MetricsSink, ServiceBuilder};
use aegis_test_support::{InMemoryMetrics, ServiceInstanceBuilder};

#[test]
fn builder_rejects_invalid_service_name() {
    let config = CoreConfig::default();
    let result = ServiceBuilder::new("", config);
    assert!(result.is_err());
}

#[test]
fn builder_accepts_valid_name_and_group() {
    let config = CoreConfig::default();
    let builder = ServiceBuilder::new("orders", config)
        .expect("valid name")
        .with_group("orders-group")
        .expect("valid group")
        .with_version("1.2.3")
        .with_ha(true);
    drop(builder);
}

#[test]
fn method_name_round_trips_through_the_facade() {
    let method = MethodName::new("create_order").expect("valid method name");
    assert_eq!(method.as_str(), "create_order");
}

#[tokio::test]
async fn fixture_instance_and_in_memory_metrics_compose_through_the_facade() {
    let instance = ServiceInstanceBuilder::new()
        .with_service("payments")
        .with_metadata("region", serde_json::json!("us-east-1"))
        .build();
    assert_eq!(instance.service_name.as_str(), "payments");

    let metrics = InMemoryMetrics::new();
    metrics.incr("election.transitions", 1, &[("service", instance.service_name.as_str())]);
    assert_eq!(metrics.counter("election.transitions", &[("service", "payments")]), 1);
}
