//! Wire/persisted record shapes (spec §3, §6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::Duration;
use crate::ids::{EventType, InstanceId, MethodName, ServiceName};

/// Lifecycle status of a [`ServiceInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Active,
    Unhealthy,
    Standby,
    Shutdown,
}

/// Sticky-active role, set only on instances participating in an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StickyActiveStatus {
    Active,
    Standby,
    Electing,
}

/// A registered service instance (the value stored under
/// `service-instances.<service>.<instance_id>`).
///
/// `metadata` is a `BTreeMap` rather than a `HashMap` so that two peers
/// serializing the same logical record produce byte-identical output —
/// required for the registry's watch stream to be diffable and for
/// cross-language (MessagePack/JSON) consumers to agree on field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub version: String,
    pub status: InstanceStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub sticky_active_status: Option<StickyActiveStatus>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ServiceInstance {
    /// `true` when `now - last_heartbeat > ttl + buffer` (spec §3 invariant 5,
    /// §4.3 stale filter).
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration, buffer: Duration) -> bool {
        let age = now.signed_duration_since(self.last_heartbeat);
        let threshold = ttl + buffer;
        match age.to_std() {
            Ok(age) => age > threshold.as_std(),
            // `age` negative (clock skew put heartbeat in the future): never stale.
            Err(_) => false,
        }
    }
}

/// The value stored at a leader key (`sticky-active.<service>.<group>.leader`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub instance_id: InstanceId,
    pub elected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LeaderRecord {
    pub fn new(instance_id: InstanceId, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            elected_at: now,
            last_heartbeat: now,
            metadata: BTreeMap::new(),
        }
    }

    /// `true` when `now - last_heartbeat > leader_ttl` (spec §3 invariant 2).
    pub fn is_expired(&self, now: DateTime<Utc>, leader_ttl: Duration) -> bool {
        match now.signed_duration_since(self.last_heartbeat).to_std() {
            Ok(age) => age > leader_ttl.as_std(),
            Err(_) => false,
        }
    }
}

/// A KV entry as returned by `get`/`watch`/`history` (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct KVEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ttl: Option<Duration>,
}

/// RPC request envelope (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RPCRequest {
    pub message_id: String,
    pub correlation_id: String,
    pub method: MethodName,
    pub params: serde_json::Value,
    pub timeout: Duration,
    pub source: InstanceId,
    pub target: ServiceName,
}

/// RPC response envelope. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RPCResponse {
    pub correlation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RPCResponse {
    pub fn ok(correlation_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// `true` when the response's error is the well-known `NOT_ACTIVE`
    /// sentinel that triggers client-side re-resolution (spec §4.8).
    pub fn is_not_active(&self) -> bool {
        !self.success && self.error.as_deref() == Some("NOT_ACTIVE")
    }
}

/// A domain event (subject `events.<domain>.<event_type>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub domain: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub version: u32,
    pub source: InstanceId,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// The JetStream subject this event publishes to (spec §6).
    pub fn subject(&self) -> String {
        format!("events.{}.{}", self.domain, self.event_type)
    }
}

/// Command execution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Normal,
    High,
    Critical,
}

/// A command request (subject `commands.<service>.<command>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub command: String,
    pub payload: serde_json::Value,
    pub priority: CommandPriority,
    pub max_retries: u32,
    pub timeout: Duration,
    pub target: ServiceName,
    pub source: InstanceId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn instance(status: InstanceStatus, heartbeat_age_secs: i64) -> ServiceInstance {
        ServiceInstance {
            service_name: ServiceName::new("orders").unwrap(),
            instance_id: InstanceId::new("orders-1").unwrap(),
            version: "1.0.0".into(),
            status,
            last_heartbeat: Utc::now() - ChronoDuration::seconds(heartbeat_age_secs),
            sticky_active_status: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn stale_filter_respects_ttl_plus_buffer() {
        let ttl = Duration::from_secs(30);
        let buffer = Duration::from_secs(5);

        let fresh = instance(InstanceStatus::Active, 5);
        assert!(!fresh.is_stale(Utc::now(), ttl, buffer));

        let stale = instance(InstanceStatus::Active, 36);
        assert!(stale.is_stale(Utc::now(), ttl, buffer));
    }

    #[test]
    fn leader_record_expires_after_ttl() {
        let record = LeaderRecord {
            instance_id: InstanceId::new("orders-1").unwrap(),
            elected_at: Utc::now() - ChronoDuration::seconds(10),
            last_heartbeat: Utc::now() - ChronoDuration::seconds(6),
            metadata: BTreeMap::new(),
        };
        assert!(record.is_expired(Utc::now(), Duration::from_secs(5)));
        assert!(!record.is_expired(Utc::now(), Duration::from_secs(10)));
    }

    #[test]
    fn rpc_response_not_active_detection() {
        let resp = RPCResponse::err("c1", "NOT_ACTIVE");
        assert!(resp.is_not_active());
        let ok = RPCResponse::ok("c1", serde_json::json!({"x": 1}));
        assert!(!ok.is_not_active());
    }

    #[test]
    fn event_subject_formatting() {
        let event = Event {
            domain: "election".into(),
            event_type: EventType::new("won").unwrap(),
            payload: serde_json::json!({}),
            version: 1,
            source: InstanceId::new("orders-1").unwrap(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.subject(), "events.election.won");
    }
}
