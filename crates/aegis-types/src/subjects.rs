//! Subject and KV-key builders (spec §6 "Subject space").
//!
//! Centralizing the string templates here means the bus, KV, registry,
//! election, discovery, and RPC crates all agree on the wire layout without
//! any of them hand-formatting subjects themselves.

use crate::ids::{EventType, GroupId, InstanceId, MethodName, ServiceName};

/// `rpc.<service>.<method>` — queue-grouped RPC request subject.
pub fn rpc_subject(service: &ServiceName, method: &MethodName) -> String {
    format!("rpc.{service}.{method}")
}

/// `events.<domain>.<event_type>` — JetStream event publish subject.
pub fn event_subject(domain: &str, event_type: &EventType) -> String {
    format!("events.{domain}.{event_type}")
}

/// `events.<domain>.>` — wildcard subscription covering every event type in
/// a domain.
pub fn event_domain_wildcard(domain: &str) -> String {
    format!("events.{domain}.>")
}

/// `commands.<service>.<command>` — JetStream durable command subject.
pub fn command_subject(service: &ServiceName, command: &str) -> String {
    format!("commands.{service}.{command}")
}

/// `commands.progress.<command_id>` — back-channel a command handler
/// publishes progress updates to while it runs (spec §6).
pub fn command_progress_subject(command_id: &str) -> String {
    format!("commands.progress.{command_id}")
}

/// `commands.callback.<command_id>` — completion subject the caller of
/// `send_command` waits on (spec §6).
pub fn command_callback_subject(command_id: &str) -> String {
    format!("commands.callback.{command_id}")
}

/// `internal.heartbeat.<service>` — periodic service-level liveness publish
/// (spec §6). Distinct from the per-group leader heartbeat, which lives
/// inside the `LeaderRecord` renewed by the election coordinator.
pub fn internal_heartbeat_subject(service: &ServiceName) -> String {
    format!("internal.heartbeat.{service}")
}

/// `internal.registry.register` / `internal.registry.unregister` — best-
/// effort notification subjects observers may listen on for registry
/// changes, independent of the KV watch stream (spec §6).
pub fn registry_register_subject() -> &'static str {
    "internal.registry.register"
}

pub fn registry_unregister_subject() -> &'static str {
    "internal.registry.unregister"
}

/// KV bucket name for the service registry (one bucket shared by all
/// services, spec §6 "KV buckets").
pub const SERVICE_REGISTRY_BUCKET: &str = "service_registry";

/// KV key for a registered instance:
/// `service-instances.<service>.<instance_id>`.
pub fn service_instance_key(service: &ServiceName, instance_id: &InstanceId) -> String {
    format!("service-instances.{service}.{instance_id}")
}

/// KV key prefix used to list every instance of a service.
pub fn service_instance_prefix(service: &ServiceName) -> String {
    format!("service-instances.{service}.")
}

/// KV bucket name for a service's election keys: `election_<service>` (spec
/// §6 "KV buckets" — one bucket per service, not shared across services like
/// the registry bucket, so a noisy election on one service never affects
/// another's watch traffic).
pub fn election_bucket(service: &ServiceName) -> String {
    format!("election_{service}")
}

/// KV key for a group's leader record:
/// `sticky-active.<service>.<group>.leader`.
pub fn leader_key(service: &ServiceName, group: &GroupId) -> String {
    format!("sticky-active.{service}.{group}.leader")
}

/// KV key prefix used to watch every leader key of a service across groups.
pub fn leader_key_prefix(service: &ServiceName) -> String {
    format!("sticky-active.{service}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_match_documented_templates() {
        let service = ServiceName::new("orders").unwrap();
        let method = MethodName::new("create_order").unwrap();
        let instance = InstanceId::new("orders-1").unwrap();
        let group = GroupId::new("default").unwrap();

        assert_eq!(rpc_subject(&service, &method), "rpc.orders.create_order");
        assert_eq!(
            internal_heartbeat_subject(&service),
            "internal.heartbeat.orders"
        );
        assert_eq!(
            service_instance_key(&service, &instance),
            "service-instances.orders.orders-1"
        );
        assert_eq!(leader_key(&service, &group), "sticky-active.orders.default.leader");
        assert_eq!(election_bucket(&service), "election_orders");
        assert_eq!(command_progress_subject("cmd-1"), "commands.progress.cmd-1");
        assert_eq!(command_callback_subject("cmd-1"), "commands.callback.cmd-1");
        assert!(service_instance_key(&service, &instance).starts_with(&service_instance_prefix(&service)));
        assert!(leader_key(&service, &group).starts_with(&leader_key_prefix(&service)));
    }
}
