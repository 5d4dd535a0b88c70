//! Service Discovery (spec §4.7): healthy-instance listing over the
//! registry's stale filter, a pluggable instance selector, and an
//! LRU-bounded cache that serves stale data rather than failing outright on
//! a transient registry error.

mod error;

pub use error::DiscoveryError;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;
use rand::Rng;
use tracing::warn;

use aegis_registry::ServiceRegistry;
use aegis_types::{Duration, InstanceId, InstanceStatus, ServiceInstance, ServiceName};

/// How [`ServiceDiscovery::select_instance`] picks among healthy candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Per-service monotonically incrementing counter mod N, deterministic
    /// within this process.
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Returns `preferred` if it is currently healthy; otherwise the first
    /// healthy instance.
    Sticky,
}

const DEFAULT_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(5);
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Cache key per spec §9 Open Question 1: dedupe by `(service,
/// only_healthy)` only. Selection strategy is applied on top of whatever
/// snapshot this key resolves to, not baked into the key itself.
type CacheKey = (ServiceName, bool);

struct CacheEntry {
    instances: Vec<ServiceInstance>,
    fetched_at: Instant,
}

/// Lists and selects among healthy instances of a service.
pub struct ServiceDiscovery {
    registry: Arc<ServiceRegistry>,
    registry_ttl: Duration,
    cache_ttl: std::time::Duration,
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
    round_robin: Mutex<HashMap<ServiceName, usize>>,
}

impl ServiceDiscovery {
    /// `registry_ttl` is the registry's configured TTL, used to compute the
    /// stale filter when listing "healthy" instances.
    pub fn new(registry: Arc<ServiceRegistry>, registry_ttl: Duration) -> Self {
        Self {
            registry,
            registry_ttl,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("capacity is a non-zero constant"),
            )),
            round_robin: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache = Mutex::new(LruCache::new(capacity));
        self
    }

    /// Lists instances of `service`, optionally restricted to healthy
    /// (`ACTIVE`, unexpired-heartbeat) ones, serving a cached value when
    /// fresher than `cache_ttl`. On a cache miss that then fails against the
    /// registry, a stale cached value (of any age) is returned with a
    /// warning; the underlying error only surfaces if no cached value
    /// exists at all (spec §4.7 "Cache policy").
    pub async fn discover_instances(
        &self,
        service: &ServiceName,
        only_healthy: bool,
    ) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let key: CacheKey = (service.clone(), only_healthy);

        if let Some(entry) = self.cache.lock().expect("cache mutex poisoned").get(&key) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(entry.instances.clone());
            }
        }

        match self.fetch(service, only_healthy).await {
            Ok(instances) => {
                self.cache.lock().expect("cache mutex poisoned").put(
                    key,
                    CacheEntry { instances: instances.clone(), fetched_at: Instant::now() },
                );
                Ok(instances)
            }
            Err(e) => {
                if let Some(entry) = self.cache.lock().expect("cache mutex poisoned").peek(&key) {
                    warn!(service = %service, error = %e, "discovery refresh failed, serving stale cache entry");
                    return Ok(entry.instances.clone());
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, service: &ServiceName, only_healthy: bool) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        if only_healthy {
            Ok(self
                .registry
                .get_instances_by_status(InstanceStatus::Active, self.registry_ttl)
                .await?
                .into_iter()
                .filter(|instance| &instance.service_name == service)
                .collect())
        } else {
            let grouped = self.registry.list_all_services().await?;
            Ok(grouped.get(service.as_str()).cloned().unwrap_or_default())
        }
    }

    /// Selects one healthy instance of `service` per `strategy`. `preferred`
    /// is only consulted by [`SelectionStrategy::Sticky`].
    pub async fn select_instance(
        &self,
        service: &ServiceName,
        strategy: SelectionStrategy,
        preferred: Option<&InstanceId>,
    ) -> Result<Option<ServiceInstance>, DiscoveryError> {
        let instances = self.discover_instances(service, true).await?;
        if instances.is_empty() {
            return Ok(None);
        }

        Ok(Some(match strategy {
            SelectionStrategy::RoundRobin => {
                let mut counters = self.round_robin.lock().expect("round-robin mutex poisoned");
                let counter = counters.entry(service.clone()).or_insert(0);
                let idx = *counter % instances.len();
                *counter = counter.wrapping_add(1);
                instances[idx].clone()
            }
            SelectionStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..instances.len());
                instances[idx].clone()
            }
            SelectionStrategy::Sticky => preferred
                .and_then(|preferred| instances.iter().find(|i| &i.instance_id == preferred))
                .cloned()
                .unwrap_or_else(|| instances[0].clone()),
        }))
    }

    /// Invalidates the cache for one service (both `only_healthy` variants),
    /// or the whole cache if `service` is `None`.
    pub fn invalidate_cache(&self, service: Option<&ServiceName>) {
        let mut cache = self.cache.lock().expect("cache mutex poisoned");
        match service {
            Some(service) => {
                cache.pop(&(service.clone(), true));
                cache.pop(&(service.clone(), false));
            }
            None => cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_indices() {
        let counters: Mutex<HashMap<ServiceName, usize>> = Mutex::new(HashMap::new());
        let service = ServiceName::new("orders").unwrap();
        let len = 3usize;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let mut guard = counters.lock().unwrap();
            let counter = guard.entry(service.clone()).or_insert(0);
            let idx = *counter % len;
            *counter = counter.wrapping_add(1);
            seen.push(idx);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn sticky_falls_back_to_first_when_preferred_absent() {
        let preferred = InstanceId::new("missing").unwrap();
        let candidates = vec![InstanceId::new("a").unwrap(), InstanceId::new("b").unwrap()];
        let chosen = candidates.iter().find(|c| **c == preferred).unwrap_or(&candidates[0]);
        assert_eq!(chosen.as_str(), "a");
    }
}
