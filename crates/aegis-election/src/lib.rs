//! Sticky-active leader election (spec §4.4, §4.5): the Heartbeat Monitor
//! and Election Coordinator. Composed by `aegis-failover` into the
//! Failover Monitoring Use Case; neither half owns the other — they
//! communicate only via the channels in [`monitor::MonitorEvent`] and
//! [`coordinator::ElectionEvent`], per spec §9's "avoid cyclic ownership
//! between Monitor <-> Coordinator" guidance.

mod coordinator;
mod error;
mod monitor;
mod repository;

pub use coordinator::{ElectionCoordinator, ElectionControl, ElectionEvent, ElectionState};
pub use error::ElectionError;
pub use monitor::{HeartbeatMonitor, MonitorEvent};
pub use repository::ElectionRepository;
