//! Core value types for AegisSDK.
//!
//! This crate has no knowledge of NATS, tokio, or any transport — it only
//! defines the identifiers, records, wire subjects, and error taxonomy that
//! every other `aegis-*` crate builds on. Keeping it dependency-light means
//! it can be unit tested without an async runtime at all.

pub mod duration;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod records;
pub mod subjects;

pub use duration::Duration;
pub use error::{CoreError, ErrorCode};
pub use ids::{EventType, GroupId, InstanceId, MethodName, ServiceName};
pub use metrics::{MetricsSink, NoopMetrics};
pub use records::{
    Command, CommandPriority, Event, InstanceStatus, KVEntry, LeaderRecord, RPCRequest,
    RPCResponse, ServiceInstance, StickyActiveStatus,
};
