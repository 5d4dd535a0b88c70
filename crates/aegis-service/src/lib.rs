//! Service Lifecycle: binds the Message Bus Adapter, Service Registry,
//! Discovery, RPC client, and (optionally) Sticky Single-Active failover
//! monitoring into one `start`/`stop` unit with a handler registry that
//! freezes at `start()` (spec §2, §5).

mod builder;
mod error;
mod handlers;
mod service;

pub use builder::ServiceBuilder;
pub use error::ServiceError;
pub use handlers::{AcceptingGate, GuardedCommandHandler, GuardedEventHandler, GuardedRpcHandler};
pub use service::{Service, SHUTDOWN_GRACE_PERIOD};
