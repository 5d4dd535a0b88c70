//! Fluent test-data builders, grounded on the Python SDK's
//! `tests/builders.py` (`RPCRequestBuilder`, `RPCResponseBuilder`,
//! `EventBuilder`): every field defaults to something innocuous so a test
//! only spells out what it actually cares about.

use std::collections::BTreeMap;

use chrono::Utc;

use aegis_types::{
    Command, CommandPriority, Duration, Event, EventType, GroupId, InstanceId, InstanceStatus,
    LeaderRecord, MethodName, RPCRequest, ServiceInstance, ServiceName, StickyActiveStatus,
};

/// Builds a [`ServiceInstance`] for tests. Defaults to service `"orders"`,
/// instance `"orders-1"`, status `ACTIVE`, heartbeat `now`.
pub struct ServiceInstanceBuilder {
    service_name: ServiceName,
    instance_id: InstanceId,
    version: String,
    status: InstanceStatus,
    last_heartbeat: chrono::DateTime<Utc>,
    sticky_active_status: Option<StickyActiveStatus>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for ServiceInstanceBuilder {
    fn default() -> Self {
        Self {
            service_name: ServiceName::new("orders").expect("literal is valid"),
            instance_id: InstanceId::new("orders-1").expect("literal is valid"),
            version: "1.0.0".to_string(),
            status: InstanceStatus::Active,
            last_heartbeat: Utc::now(),
            sticky_active_status: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl ServiceInstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service_name = ServiceName::new(service).expect("test service name must be valid");
        self
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = InstanceId::new(instance_id).expect("test instance id must be valid");
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_heartbeat_age(mut self, age: std::time::Duration) -> Self {
        self.last_heartbeat = Utc::now() - chrono::Duration::from_std(age).expect("age fits in a chrono duration");
        self
    }

    pub fn with_sticky_status(mut self, status: StickyActiveStatus) -> Self {
        self.sticky_active_status = Some(status);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> ServiceInstance {
        ServiceInstance {
            service_name: self.service_name,
            instance_id: self.instance_id,
            version: self.version,
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            sticky_active_status: self.sticky_active_status,
            metadata: self.metadata,
        }
    }
}

/// Builds a [`LeaderRecord`] for tests.
pub struct LeaderRecordBuilder {
    instance_id: InstanceId,
    elected_at: chrono::DateTime<Utc>,
    last_heartbeat: chrono::DateTime<Utc>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for LeaderRecordBuilder {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            instance_id: InstanceId::new("orders-1").expect("literal is valid"),
            elected_at: now,
            last_heartbeat: now,
            metadata: BTreeMap::new(),
        }
    }
}

impl LeaderRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = InstanceId::new(instance_id).expect("test instance id must be valid");
        self
    }

    pub fn with_heartbeat_age(mut self, age: std::time::Duration) -> Self {
        self.last_heartbeat = Utc::now() - chrono::Duration::from_std(age).expect("age fits in a chrono duration");
        self
    }

    pub fn build(self) -> LeaderRecord {
        LeaderRecord {
            instance_id: self.instance_id,
            elected_at: self.elected_at,
            last_heartbeat: self.last_heartbeat,
            metadata: self.metadata,
        }
    }
}

/// Builds an [`RPCRequest`] for tests. Defaults to a 5s timeout targeting
/// `orders.create_order`, matching the Python builder's defaults.
pub struct RpcRequestBuilder {
    method: MethodName,
    params: serde_json::Value,
    timeout: Duration,
    source: InstanceId,
    target: ServiceName,
}

impl Default for RpcRequestBuilder {
    fn default() -> Self {
        Self {
            method: MethodName::new("create_order").expect("literal is valid"),
            params: serde_json::json!({}),
            timeout: Duration::from_secs(5),
            source: InstanceId::new("test-client").expect("literal is valid"),
            target: ServiceName::new("orders").expect("literal is valid"),
        }
    }
}

impl RpcRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = MethodName::new(method).expect("test method name must be valid");
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = ServiceName::new(target).expect("test target name must be valid");
        self
    }

    pub fn build(self) -> RPCRequest {
        RPCRequest {
            message_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            method: self.method,
            params: self.params,
            timeout: self.timeout,
            source: self.source,
            target: self.target,
        }
    }
}

/// Builds an [`Event`] for tests.
pub struct EventBuilder {
    domain: String,
    event_type: EventType,
    payload: serde_json::Value,
    source: InstanceId,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self {
            domain: "test".to_string(),
            event_type: EventType::new("created").expect("literal is valid"),
            payload: serde_json::json!({}),
            source: InstanceId::new("test-service").expect("literal is valid"),
        }
    }
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn with_type(mut self, event_type: &str) -> Self {
        self.event_type = EventType::new(event_type).expect("test event type must be valid");
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Event {
        Event {
            domain: self.domain,
            event_type: self.event_type,
            payload: self.payload,
            version: 1,
            source: self.source,
            timestamp: Utc::now(),
        }
    }
}

/// Builds a [`Command`] for tests.
pub struct CommandBuilder {
    command: String,
    payload: serde_json::Value,
    priority: CommandPriority,
    max_retries: u32,
    timeout: Duration,
    target: ServiceName,
    source: InstanceId,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            command: "process".to_string(),
            payload: serde_json::json!({}),
            priority: CommandPriority::Normal,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            target: ServiceName::new("orders").expect("literal is valid"),
            source: InstanceId::new("test-client").expect("literal is valid"),
        }
    }
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = ServiceName::new(target).expect("test target name must be valid");
        self
    }

    pub fn build(self) -> Command {
        Command {
            command_id: uuid::Uuid::new_v4().to_string(),
            command: self.command,
            payload: self.payload,
            priority: self.priority,
            max_retries: self.max_retries,
            timeout: self.timeout,
            target: self.target,
            source: self.source,
        }
    }
}

pub fn group(name: &str) -> GroupId {
    GroupId::new(name).expect("test group id must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_instance_builder_defaults() {
        let instance = ServiceInstanceBuilder::new().build();
        assert_eq!(instance.service_name.as_str(), "orders");
        assert_eq!(instance.status, InstanceStatus::Active);
    }

    #[test]
    fn service_instance_builder_overrides_heartbeat_age() {
        let instance = ServiceInstanceBuilder::new()
            .with_heartbeat_age(std::time::Duration::from_secs(40))
            .build();
        let age = Utc::now().signed_duration_since(instance.last_heartbeat);
        assert!(age.num_seconds() >= 40);
    }

    #[test]
    fn rpc_request_builder_defaults() {
        let request = RpcRequestBuilder::new().build();
        assert_eq!(request.method.as_str(), "create_order");
        assert_eq!(request.target.as_str(), "orders");
    }
}
