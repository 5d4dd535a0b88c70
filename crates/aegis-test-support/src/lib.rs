//! Test fixtures shared across AegisSDK crates: fluent record builders, an
//! in-memory metrics sink, an in-memory `ElectionRepository` double
//! (`FakeKvStore`), and a local `nats-server` harness for integration tests
//! that need a real JetStream backend.
//!
//! Not part of the public SDK surface — `publish = false`, consumed only as
//! a workspace dev-dependency.

mod fake_kv;
mod fixtures;
mod metrics;
mod nats_harness;

pub use fake_kv::FakeKvStore;
pub use fixtures::{
    group, CommandBuilder, EventBuilder, LeaderRecordBuilder, RpcRequestBuilder, ServiceInstanceBuilder,
};
pub use metrics::{InMemoryMetrics, Series};
pub use nats_harness::NatsServerHarness;
