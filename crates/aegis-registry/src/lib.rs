//! Service Registry (spec §4.3): a schema and set of semantics layered on
//! top of [`aegis_kv::KvStore`]. Writes/refreshes `ServiceInstance` records
//! with TTL, lists/filters them, applies the stale filter client-side, and
//! runs a periodic cleanup task that reaps records the KV layer has not yet
//! expired.

mod error;

pub use error::RegistryError;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aegis_kv::{to_wire_key, KvStore, PutMode, PutOptions, WatchOp};
use aegis_types::{
    subjects, CoreError, Duration, InstanceId, InstanceStatus, ServiceInstance, ServiceName,
};

/// Default buffer added on top of an instance's TTL before the stale filter
/// excludes it from "healthy" queries (spec §4.3).
pub const DEFAULT_STALE_BUFFER: StdDuration = StdDuration::from_secs(5);

/// Default interval of the background cleanup task (spec §4.3).
pub const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// A registry change, as observed on the KV watch stream.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(ServiceInstance),
    Deregistered { service: ServiceName, instance_id: InstanceId },
}

/// Wraps a [`KvStore`] bucket with service-registry schema and semantics.
pub struct ServiceRegistry {
    kv: Arc<KvStore>,
    stale_buffer: Duration,
}

impl ServiceRegistry {
    /// Opens the shared `service_registry` bucket with bucket-level TTL
    /// `default_ttl` (spec §6 default 30s).
    pub async fn connect(
        js: &async_nats::jetstream::Context,
        default_ttl: Duration,
    ) -> Result<Self, RegistryError> {
        let kv = KvStore::connect(js, subjects::SERVICE_REGISTRY_BUCKET, default_ttl).await?;
        Ok(Self {
            kv: Arc::new(kv),
            stale_buffer: Duration::from(DEFAULT_STALE_BUFFER),
        })
    }

    pub fn with_stale_buffer(mut self, buffer: Duration) -> Self {
        self.stale_buffer = buffer;
        self
    }

    /// Writes `instance`'s record with a TTL of `ttl_seconds`. Always an
    /// upsert — re-registration (e.g. after a restart with the same
    /// instance id) is idempotent, never `create_only` (spec §4.3).
    pub async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<u64, RegistryError> {
        let key = to_wire_key(&subjects::service_instance_key(
            &instance.service_name,
            &instance.instance_id,
        ));
        let value = serde_json::to_vec(instance)
            .map_err(|e| RegistryError::Validation(CoreError::Validation(e.to_string())))?;
        let revision = self
            .kv
            .put(&key, value, PutOptions { mode: PutMode::Upsert, ttl: Some(ttl) })
            .await?;
        debug!(service = %instance.service_name, instance = %instance.instance_id, revision, "instance registered");
        Ok(revision)
    }

    /// Refreshes `instance`'s record with an advanced `last_heartbeat` and a
    /// renewed TTL (spec §4.3 "heartbeat() is realised by re-writing the
    /// record"). The caller is expected to have advanced
    /// `instance.last_heartbeat` to `Utc::now()` before calling this.
    pub async fn heartbeat(&self, instance: &ServiceInstance, ttl: Duration) -> Result<u64, RegistryError> {
        self.register(instance, ttl).await
    }

    /// Unconditional delete — deregistration never races on revision.
    pub async fn deregister(&self, service: &ServiceName, instance_id: &InstanceId) -> Result<bool, RegistryError> {
        let key = to_wire_key(&subjects::service_instance_key(service, instance_id));
        let deleted = self.kv.delete(&key, None).await?;
        debug!(%service, %instance_id, deleted, "instance deregistered");
        Ok(deleted)
    }

    pub async fn get_instance(
        &self,
        service: &ServiceName,
        instance_id: &InstanceId,
    ) -> Result<Option<ServiceInstance>, RegistryError> {
        let key = to_wire_key(&subjects::service_instance_key(service, instance_id));
        match self.kv.get(&key).await? {
            Some(entry) => Ok(Some(decode_instance(&entry.value)?)),
            None => Ok(None),
        }
    }

    /// Every registered instance, across every service, keyed by service
    /// name. Does **not** apply the stale filter — callers that want only
    /// healthy instances should filter with [`ServiceInstance::is_stale`] or
    /// use [`Self::get_instances_by_status`].
    pub async fn list_all_services(&self) -> Result<BTreeMap<String, Vec<ServiceInstance>>, RegistryError> {
        let instances = self.list_raw().await?;
        let mut grouped: BTreeMap<String, Vec<ServiceInstance>> = BTreeMap::new();
        for instance in instances {
            grouped.entry(instance.service_name.to_string()).or_default().push(instance);
        }
        Ok(grouped)
    }

    /// All instances across all services whose `status` matches, with the
    /// stale filter applied (spec §4.3 invariant 5): an instance whose
    /// `last_heartbeat` age exceeds `ttl + buffer` is excluded even if the
    /// KV layer has not yet reaped its key.
    pub async fn get_instances_by_status(
        &self,
        status: InstanceStatus,
        ttl: Duration,
    ) -> Result<Vec<ServiceInstance>, RegistryError> {
        let now = Utc::now();
        let instances = self.list_raw().await?;
        Ok(instances
            .into_iter()
            .filter(|instance| instance.status == status)
            .filter(|instance| !instance.is_stale(now, ttl, self.stale_buffer))
            .collect())
    }

    pub async fn count_active_instances(&self, ttl: Duration) -> Result<usize, RegistryError> {
        Ok(self.get_instances_by_status(InstanceStatus::Active, ttl).await?.len())
    }

    /// Watches every instance key, yielding [`RegistryEvent`]s as the KV
    /// layer sees puts/deletes. Subjects upstream (discovery, failover
    /// monitoring) use this to invalidate caches without polling.
    pub async fn watch_changes(&self) -> Result<impl Stream<Item = RegistryEvent> + Send, RegistryError> {
        let prefix = to_wire_key("service-instances.");
        let stream = self.kv.watch(&format!("{prefix}>")).await?;
        Ok(stream.filter_map(|op| async move {
            match op {
                WatchOp::Put(entry) => match decode_instance(&entry.value) {
                    Ok(instance) => Some(RegistryEvent::Registered(instance)),
                    Err(e) => {
                        warn!(error = %e, "failed to decode registry watch entry, skipping");
                        None
                    }
                },
                WatchOp::Delete(key) | WatchOp::Purge(key) => parse_instance_key(&key).map(|(service, instance_id)| {
                    RegistryEvent::Deregistered { service, instance_id }
                }),
            }
        }))
    }

    /// Spawns the periodic cleanup task (spec §4.3): every `interval`, scans
    /// every record and deletes the ones whose heartbeat age exceeds
    /// `ttl + stale_buffer`, or whose status is `UNHEALTHY`/`SHUTDOWN`.
    /// Cancel via the returned token (or drop it — the task keeps running
    /// using its own clone until explicitly cancelled).
    pub fn spawn_cleanup_task(self: &Arc<Self>, ttl: Duration, interval: StdDuration) -> (JoinHandle<()>, CancellationToken) {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let registry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = registry.run_cleanup_pass(ttl).await {
                            warn!(error = %e, "registry cleanup pass failed");
                        }
                    }
                }
            }
        });

        (handle, token)
    }

    async fn run_cleanup_pass(&self, ttl: Duration) -> Result<(), RegistryError> {
        let now = Utc::now();
        let mut reaped = 0u32;
        for instance in self.list_raw().await? {
            let expired_status = matches!(instance.status, InstanceStatus::Unhealthy | InstanceStatus::Shutdown);
            if expired_status || instance.is_stale(now, ttl, self.stale_buffer) {
                if self.deregister(&instance.service_name, &instance.instance_id).await? {
                    reaped += 1;
                }
            }
        }
        if reaped > 0 {
            info!(reaped, "registry cleanup pass reaped stale instances");
        }
        Ok(())
    }

    async fn list_raw(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
        let prefix = to_wire_key("service-instances.");
        let keys = self.kv.keys(Some(&prefix)).await?;
        let mut instances = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.kv.get(&key).await? {
                match decode_instance(&entry.value) {
                    Ok(instance) => instances.push(instance),
                    Err(e) => warn!(key, error = %e, "skipping unparsable registry entry"),
                }
            }
        }
        Ok(instances)
    }
}

fn decode_instance(bytes: &[u8]) -> Result<ServiceInstance, RegistryError> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Validation(CoreError::Validation(e.to_string())))
}

/// Recovers `(service, instance_id)` from a wire-escaped
/// `service-instances_<service>_<instance_id>` key. Best-effort: used only
/// for watch-stream delete events, where we have no value to decode from.
fn parse_instance_key(wire_key: &str) -> Option<(ServiceName, InstanceId)> {
    let rest = wire_key.strip_prefix("service-instances_")?;
    let (service, instance_id) = rest.split_once('_')?;
    let service = ServiceName::new(service).ok()?;
    let instance_id = InstanceId::new(instance_id).ok()?;
    Some((service, instance_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(status: InstanceStatus) -> ServiceInstance {
        ServiceInstance {
            service_name: ServiceName::new("orders").unwrap(),
            instance_id: InstanceId::new("orders-1").unwrap(),
            version: "1.0.0".into(),
            status,
            last_heartbeat: Utc::now(),
            sticky_active_status: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn instance_key_parses_and_round_trips() {
        let service = ServiceName::new("orders").unwrap();
        let instance_id = InstanceId::new("orders-1").unwrap();
        let wire = to_wire_key(&subjects::service_instance_key(&service, &instance_id));
        let (parsed_service, parsed_instance) = parse_instance_key(&wire).expect("must parse");
        assert_eq!(parsed_service, service);
        assert_eq!(parsed_instance, instance_id);
    }

    #[test]
    fn decode_instance_round_trips_json() {
        let original = instance(InstanceStatus::Active);
        let bytes = serde_json::to_vec(&original).unwrap();
        let decoded = decode_instance(&bytes).unwrap();
        assert_eq!(decoded, original);
    }
}
