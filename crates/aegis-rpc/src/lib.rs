//! RPC Call Use Case (spec §4.8): a client-side policy layer over the
//! Message Bus Adapter. Resolves a target through Service Discovery,
//! dispatches the RPC, and retries on `NOT_ACTIVE` with backoff/jitter and
//! re-resolution — the client's way of riding out a leader transition
//! without the caller having to know one happened.

mod error;

pub use error::RpcError;

use std::sync::Arc;

use tracing::{debug, warn};

use aegis_bus::MessageBus;
use aegis_discovery::{SelectionStrategy, ServiceDiscovery};
use aegis_types::{CoreError, Duration, InstanceId, MetricsSink, MethodName, NoopMetrics, RPCRequest, RPCResponse, ServiceName};

/// Backoff schedule applied between `NOT_ACTIVE` retries (spec §4.8).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs_f64(0.1).expect("positive literal"),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs_f64(5.0).expect("positive literal"),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry (0-based): `initial_delay *
    /// backoff_multiplier^attempt`, capped at `max_delay`, jittered by up to
    /// `+/- jitter_factor` of the capped value.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::random::<f64>() * 2.0 * self.jitter_factor - self.jitter_factor;
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered).unwrap_or(Duration::ZERO)
    }
}

/// One RPC invocation's parameters, independent of retry policy.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub service: ServiceName,
    pub method: MethodName,
    pub params: serde_json::Value,
    pub timeout: Duration,
    pub source: InstanceId,
    /// Instance to prefer when discovery resolves the target with the
    /// `STICKY` strategy. Carried across retries and updated as discovery
    /// learns of a new leader.
    pub preferred: Option<InstanceId>,
}

/// Client-side RPC policy layer: discovery resolution + `NOT_ACTIVE` retry.
pub struct RpcClient {
    bus: Arc<MessageBus>,
    discovery: Arc<ServiceDiscovery>,
    metrics: Arc<dyn MetricsSink>,
}

impl RpcClient {
    pub fn new(bus: Arc<MessageBus>, discovery: Arc<ServiceDiscovery>) -> Self {
        Self { bus, discovery, metrics: Arc::new(NoopMetrics) }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Performs `call` under `retry`. On `NOT_ACTIVE`, sleeps per
    /// [`RetryPolicy::delay_for_attempt`], invalidates the discovery cache so
    /// the next resolution can observe a newly elected leader, and retries.
    /// Any other response (including a per-attempt timeout) is returned
    /// as-is without retrying; retry exhaustion raises
    /// [`CoreError::AfterNRetries`].
    pub async fn call(&self, call: RpcCall, retry: &RetryPolicy) -> Result<RPCResponse, CoreError> {
        let metric_prefix = format!("rpc.client.{}.{}", call.service.as_str(), call.method.as_str());
        let mut preferred = call.preferred.clone();
        let mut last_error: Option<CoreError> = None;

        for attempt in 0.. {
            if let Ok(Some(instance)) = self
                .discovery
                .select_instance(&call.service, SelectionStrategy::Sticky, preferred.as_ref())
                .await
            {
                preferred = Some(instance.instance_id);
            }

            let request = RPCRequest {
                message_id: uuid::Uuid::new_v4().to_string(),
                correlation_id: uuid::Uuid::new_v4().to_string(),
                method: call.method.clone(),
                params: call.params.clone(),
                timeout: call.timeout,
                source: call.source.clone(),
                target: call.service.clone(),
            };

            let response = match self.bus.call_rpc(&request).await {
                Ok(response) => response,
                Err(e) => {
                    self.metrics.incr(&format!("{metric_prefix}.error"), 1, &[]);
                    return Err(e.into());
                }
            };

            if response.success {
                self.metrics.incr(&format!("{metric_prefix}.success"), 1, &[]);
                return Ok(response);
            }

            if response.error.as_deref() == Some("Timeout") {
                self.metrics.incr(&format!("{metric_prefix}.timeout"), 1, &[]);
                return Ok(response);
            }

            if !response.is_not_active() {
                self.metrics.incr(&format!("{metric_prefix}.error"), 1, &[]);
                return Ok(response);
            }

            last_error = Some(CoreError::NotActive);
            if attempt >= retry.max_retries {
                break;
            }

            self.metrics.incr(&format!("{metric_prefix}.retry"), 1, &[]);
            let delay = retry.delay_for_attempt(attempt);
            debug!(service = %call.service, method = %call.method.as_str(), attempt, delay_ms = delay.as_std().as_millis(), "NOT_ACTIVE, retrying after backoff");
            tokio::time::sleep(delay.as_std()).await;
            self.discovery.invalidate_cache(Some(&call.service));
        }

        warn!(service = %call.service, method = %call.method.as_str(), retries = retry.max_retries, "rpc call exhausted retries");
        self.metrics.incr(&format!("{metric_prefix}.error"), 1, &[]);
        Err(CoreError::AfterNRetries {
            attempts: retry.max_retries + 1,
            last: Box::new(last_error.unwrap_or(CoreError::NotActive)),
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_retry_policy_matches_spec_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs_f64(0.1).unwrap(),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs_f64(1.0).unwrap(),
            jitter_factor: 0.0,
        };
        assert!((policy.delay_for_attempt(0).as_secs_f64() - 0.1).abs() < 1e-9);
        assert!((policy.delay_for_attempt(1).as_secs_f64() - 0.2).abs() < 1e-9);
        assert!((policy.delay_for_attempt(10).as_secs_f64() - 1.0).abs() < 1e-9);
    }

    proptest::proptest! {
        /// Property 8 (retry policy arithmetic, spec §8): for any policy with
        /// a multiplier >= 1 and any attempt number, the jittered delay never
        /// exceeds `max_delay` by more than the jitter factor and never goes
        /// negative, however the unjittered exponential term grows.
        #[test]
        fn delay_for_attempt_never_exceeds_jittered_cap(
            initial_ms in 1u64..2_000,
            multiplier in 1.0f64..4.0,
            max_ms in 1u64..10_000,
            jitter_factor in 0.0f64..0.5,
            attempt in 0u32..40,
        ) {
            let policy = RetryPolicy {
                max_retries: attempt + 1,
                initial_delay: Duration::from_millis(initial_ms),
                backoff_multiplier: multiplier,
                max_delay: Duration::from_millis(max_ms),
                jitter_factor,
            };
            let delay = policy.delay_for_attempt(attempt).as_secs_f64();
            let cap = policy.max_delay.as_secs_f64() * (1.0 + jitter_factor);
            prop_assert!(delay >= 0.0);
            prop_assert!(delay <= cap + 1e-9);
        }

        /// With jitter disabled the schedule is exactly the closed-form
        /// `initial * multiplier^attempt`, capped — monotonically
        /// non-decreasing until it hits the cap.
        #[test]
        fn delay_for_attempt_matches_closed_form_without_jitter(
            initial_ms in 1u64..2_000,
            multiplier in 1.0f64..4.0,
            max_ms in 1u64..10_000,
            attempt in 0u32..40,
        ) {
            let policy = RetryPolicy {
                max_retries: attempt + 1,
                initial_delay: Duration::from_millis(initial_ms),
                backoff_multiplier: multiplier,
                max_delay: Duration::from_millis(max_ms),
                jitter_factor: 0.0,
            };
            let expected = (policy.initial_delay.as_secs_f64() * multiplier.powi(attempt as i32))
                .min(policy.max_delay.as_secs_f64());
            let actual = policy.delay_for_attempt(attempt).as_secs_f64();
            prop_assert!((actual - expected).abs() < 1e-6);
        }
    }
}
