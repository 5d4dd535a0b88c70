//! Failover Monitoring Use Case (spec §4.6): composes the Heartbeat Monitor
//! and Election Coordinator per `(service, instance, group)`, bridging their
//! internal events onto the bus as domain events for observers. Monitor and
//! coordinator never hold a reference to each other — they only share the
//! `mpsc`/`watch` channels wired up here, per spec §9's "avoid cyclic
//! ownership between Monitor <-> Coordinator" guidance.

mod error;

pub use error::FailoverError;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use aegis_bus::MessageBus;
use aegis_config::FailoverPolicy;
use aegis_election::{
    ElectionControl, ElectionCoordinator, ElectionError, ElectionEvent, ElectionState, HeartbeatMonitor, MonitorEvent,
};
use aegis_kv::{to_wire_key, KvStore};
use aegis_types::{subjects, Duration, Event, EventType, GroupId, InstanceId, LeaderRecord, ServiceName};

/// Identifies one supervised `(service, instance, group)` monitoring task.
pub type MonitorKey = (ServiceName, InstanceId, GroupId);

struct MonitoringHandle {
    cancellation: CancellationToken,
    state_rx: watch::Receiver<ElectionState>,
    control_tx: mpsc::Sender<ElectionControl>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every running Monitor + Coordinator pair for a process, and the
/// per-service election KV buckets they share.
pub struct FailoverMonitor {
    js: async_nats::jetstream::Context,
    bus: Arc<MessageBus>,
    instances: AsyncMutex<HashMap<MonitorKey, MonitoringHandle>>,
    buckets: AsyncMutex<HashMap<ServiceName, Arc<KvStore>>>,
}

impl FailoverMonitor {
    pub fn new(js: async_nats::jetstream::Context, bus: Arc<MessageBus>) -> Self {
        Self {
            js,
            bus,
            instances: AsyncMutex::new(HashMap::new()),
            buckets: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn bucket_for(&self, service: &ServiceName, leader_ttl: Duration) -> Result<Arc<KvStore>, FailoverError> {
        let mut buckets = self.buckets.lock().await;
        if let Some(kv) = buckets.get(service) {
            return Ok(Arc::clone(kv));
        }
        let kv = Arc::new(KvStore::connect(&self.js, &subjects::election_bucket(service), leader_ttl).await?);
        buckets.insert(service.clone(), Arc::clone(&kv));
        Ok(kv)
    }

    /// Instantiates a Monitor + Coordinator pair for `service/instance/group`
    /// and launches its supervision tasks.
    pub async fn start_monitoring(
        &self,
        service: ServiceName,
        instance_id: InstanceId,
        group: GroupId,
        heartbeat_interval: Duration,
        leader_ttl: Duration,
        policy: FailoverPolicy,
    ) -> Result<(), FailoverError> {
        let key = (service.clone(), instance_id.clone(), group.clone());
        if self.instances.lock().await.contains_key(&key) {
            return Err(already_monitoring(&key));
        }

        let timing = policy.timing();
        let kv = self.bucket_for(&service, leader_ttl).await?;
        let leader_key = to_wire_key(&subjects::leader_key(&service, &group));

        let monitor = HeartbeatMonitor::new(Arc::clone(&kv), leader_key.clone(), timing, policy.miss_quorum());
        let (coordinator, state_rx) = ElectionCoordinator::new(
            Arc::clone(&kv),
            leader_key,
            instance_id.clone(),
            heartbeat_interval,
            leader_ttl,
            timing.election_delay,
            timing.enable_pre_election,
        );

        let (raw_monitor_tx, mut raw_monitor_rx) = mpsc::channel::<MonitorEvent>(32);
        let (coordinator_monitor_tx, coordinator_monitor_rx) = mpsc::channel::<MonitorEvent>(32);
        let (control_tx, control_rx) = mpsc::channel::<ElectionControl>(8);
        let (events_tx, mut events_rx) = mpsc::channel::<ElectionEvent>(32);

        let cancellation = CancellationToken::new();
        let tick_interval = heartbeat_interval * 0.5;

        let monitor_handle = tokio::spawn(monitor.run(tick_interval, raw_monitor_tx, cancellation.clone()));
        let coordinator_handle =
            tokio::spawn(coordinator.run(coordinator_monitor_rx, control_rx, events_tx, cancellation.clone()));

        let bus = Arc::clone(&self.bus);
        let tee_service = service.clone();
        let tee_group = group.clone();
        let tee_instance = instance_id.clone();
        let tee_cancellation = cancellation.clone();
        let tee_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tee_cancellation.cancelled() => break,
                    event = raw_monitor_rx.recv() => {
                        let Some(event) = event else { break };
                        let domain_event_type = match &event {
                            MonitorEvent::LeaderVacant => Some("expired"),
                            MonitorEvent::LeaderHealthy(_) => Some("heartbeat_updated"),
                            _ => None,
                        };
                        if let Some(event_type) = domain_event_type {
                            publish_leader_event(&bus, &tee_service, &tee_group, &tee_instance, event_type).await;
                        }
                        if coordinator_monitor_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let bus = Arc::clone(&self.bus);
        let bridge_service = service.clone();
        let bridge_group = group.clone();
        let bridge_instance = instance_id.clone();
        let bridge_handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    ElectionEvent::Won => {
                        publish_election_event(&bus, &bridge_service, &bridge_group, &bridge_instance, "won", None)
                            .await
                    }
                    ElectionEvent::Lost { winner } => {
                        publish_election_event(
                            &bus,
                            &bridge_service,
                            &bridge_group,
                            &bridge_instance,
                            "lost",
                            Some(winner.to_string()),
                        )
                        .await
                    }
                    ElectionEvent::SteppedDown { reason } => {
                        publish_leader_event_with_reason(
                            &bus,
                            &bridge_service,
                            &bridge_group,
                            &bridge_instance,
                            "stepped_down",
                            &reason,
                        )
                        .await
                    }
                }
            }
        });

        self.instances.lock().await.insert(
            key,
            MonitoringHandle {
                cancellation,
                state_rx,
                control_tx,
                tasks: vec![monitor_handle, coordinator_handle, tee_handle, bridge_handle],
            },
        );
        Ok(())
    }

    /// Cancels the supervision tasks for one `(service, instance, group)`.
    /// If this instance currently holds leadership, the coordinator releases
    /// it (best-effort CAS delete) as part of shutting down.
    pub async fn stop_monitoring(
        &self,
        service: &ServiceName,
        instance_id: &InstanceId,
        group: &GroupId,
    ) -> Result<(), FailoverError> {
        let key = (service.clone(), instance_id.clone(), group.clone());
        let handle = self.instances.lock().await.remove(&key);
        let Some(handle) = handle else {
            return Err(not_monitoring(&key));
        };
        handle.cancellation.cancel();
        for task in handle.tasks {
            let _ = task.await;
        }
        Ok(())
    }

    pub async fn stop_all_monitoring(&self) {
        let keys: Vec<MonitorKey> = self.instances.lock().await.keys().cloned().collect();
        for (service, instance_id, group) in keys {
            if let Err(e) = self.stop_monitoring(&service, &instance_id, &group).await {
                warn!(%service, %instance_id, %group, error = %e, "failed to stop monitoring during shutdown");
            }
        }
    }

    pub async fn get_status(
        &self,
        service: &ServiceName,
        instance_id: &InstanceId,
        group: &GroupId,
    ) -> Option<ElectionState> {
        let key = (service.clone(), instance_id.clone(), group.clone());
        self.instances.lock().await.get(&key).map(|handle| *handle.state_rx.borrow())
    }

    /// Administrative manual election trigger (spec §4.6). Validates no
    /// healthy leader exists by reading the leader key directly — the
    /// coordinator itself does not re-check before racing for the key.
    pub async fn trigger_manual_election(
        &self,
        service: &ServiceName,
        instance_id: &InstanceId,
        group: &GroupId,
        leader_ttl: Duration,
        policy: FailoverPolicy,
    ) -> Result<(), FailoverError> {
        let key = (service.clone(), instance_id.clone(), group.clone());
        let control_tx = {
            let instances = self.instances.lock().await;
            instances.get(&key).ok_or_else(|| not_monitoring(&key))?.control_tx.clone()
        };

        let kv = self.bucket_for(service, leader_ttl).await?;
        let leader_key = to_wire_key(&subjects::leader_key(service, group));
        if let Some(entry) = kv.get(&leader_key).await? {
            let record: LeaderRecord = serde_json::from_slice(&entry.value)
                .map_err(|source| ElectionError::MalformedRecord { key: leader_key.clone(), source })?;
            if !record.is_expired(Utc::now(), policy.timing().detection_threshold) {
                return Err(FailoverError::LeaderAlreadyHealthy);
            }
        }

        control_tx.send(ElectionControl::TriggerElection).await.map_err(|_| not_monitoring(&key))
    }
}

fn already_monitoring(key: &MonitorKey) -> FailoverError {
    FailoverError::AlreadyMonitoring {
        service: key.0.to_string(),
        instance_id: key.1.to_string(),
        group: key.2.to_string(),
    }
}

fn not_monitoring(key: &MonitorKey) -> FailoverError {
    FailoverError::NotMonitoring {
        service: key.0.to_string(),
        instance_id: key.1.to_string(),
        group: key.2.to_string(),
    }
}

async fn publish_election_event(
    bus: &MessageBus,
    service: &ServiceName,
    group: &GroupId,
    instance_id: &InstanceId,
    event_type: &str,
    winner: Option<String>,
) {
    let mut payload = serde_json::json!({ "service": service.to_string(), "group": group.to_string() });
    if let Some(winner) = winner {
        payload["winner"] = serde_json::Value::String(winner);
    }
    publish(bus, "election", instance_id, event_type, payload).await;
}

async fn publish_leader_event(bus: &MessageBus, service: &ServiceName, group: &GroupId, instance_id: &InstanceId, event_type: &str) {
    let payload = serde_json::json!({ "service": service.to_string(), "group": group.to_string() });
    publish(bus, "leader", instance_id, event_type, payload).await;
}

async fn publish_leader_event_with_reason(
    bus: &MessageBus,
    service: &ServiceName,
    group: &GroupId,
    instance_id: &InstanceId,
    event_type: &str,
    reason: &str,
) {
    let payload = serde_json::json!({ "service": service.to_string(), "group": group.to_string(), "reason": reason });
    publish(bus, "leader", instance_id, event_type, payload).await;
}

async fn publish(bus: &MessageBus, domain: &str, instance_id: &InstanceId, event_type: &str, payload: serde_json::Value) {
    let Ok(event_type) = EventType::new(event_type) else {
        return;
    };
    let event = Event {
        domain: domain.to_string(),
        event_type,
        payload,
        version: 1,
        source: instance_id.clone(),
        timestamp: Utc::now(),
    };
    if let Err(e) = bus.publish_event(&event).await {
        warn!(domain, error = %e, "failed to publish failover domain event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_key_equality_is_by_value() {
        let a: MonitorKey = (
            ServiceName::new("orders").unwrap(),
            InstanceId::new("orders-1").unwrap(),
            GroupId::new("default").unwrap(),
        );
        let b = a.clone();
        assert_eq!(a, b);
    }
}
