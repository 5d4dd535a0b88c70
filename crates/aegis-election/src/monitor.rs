//! Heartbeat Monitor (spec §4.4): watches a single leader key and signals
//! suspected failure with hysteresis, to avoid a transient watch-lag hiccup
//! triggering a needless election.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use aegis_config::FailoverTiming;
use aegis_types::{Duration, InstanceId, LeaderRecord};

use crate::repository::ElectionRepository;

/// Transitions the monitor reports upstream to the election coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// No leader key present at all.
    LeaderVacant,
    /// Exactly one missed heartbeat observed; reported only when
    /// `enable_pre_election` is set, so the coordinator can speculatively
    /// race for the key before the full detection threshold elapses (spec
    /// §9 "Pre-election optimisation").
    LeaderPreElection(InstanceId),
    /// `miss_quorum` consecutive missed heartbeats observed.
    LeaderSuspected(InstanceId),
    /// The leader key is present and fresh. Reported only on the
    /// vacant/suspected → healthy transition, not on every tick.
    LeaderHealthy(InstanceId),
}

#[derive(Debug, Default)]
struct MonitorState {
    last_seen_leader: Option<InstanceId>,
    consecutive_misses: u32,
    was_unhealthy: bool,
}

/// Observes one `(service, group)`'s leader key.
pub struct HeartbeatMonitor {
    kv: Arc<dyn ElectionRepository>,
    leader_key: String,
    timing: FailoverTiming,
    miss_quorum: u32,
    state: MonitorState,
}

impl HeartbeatMonitor {
    pub fn new(kv: Arc<dyn ElectionRepository>, leader_key: String, timing: FailoverTiming, miss_quorum: u32) -> Self {
        Self {
            kv,
            leader_key,
            timing,
            miss_quorum,
            state: MonitorState::default(),
        }
    }

    /// Runs the coarse tick loop at `tick_interval` (spec §4.4: typically
    /// `heartbeat_interval / 2`) until cancelled, forwarding transitions on
    /// `events`. A full receiver (upstream too slow) drops the oldest event
    /// rather than stalling the watch loop.
    pub async fn run(
        mut self,
        tick_interval: Duration,
        events: mpsc::Sender<MonitorEvent>,
        cancellation: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(tick_interval.as_std());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(event) = self.tick().await {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Performs a single read-and-classify pass. Exposed directly (beyond
    /// [`Self::run`]) so tests can drive it deterministically without a real
    /// timer.
    pub async fn tick(&mut self) -> Option<MonitorEvent> {
        let entry = match self.kv.get(&self.leader_key).await {
            Ok(entry) => entry,
            Err(e) => {
                trace!(error = %e, "heartbeat monitor read failed, tolerating as transient watch lag");
                return None;
            }
        };

        let Some(entry) = entry else {
            self.state.consecutive_misses = 0;
            self.state.last_seen_leader = None;
            self.state.was_unhealthy = true;
            return Some(MonitorEvent::LeaderVacant);
        };

        let record: LeaderRecord = match serde_json::from_slice(&entry.value) {
            Ok(record) => record,
            Err(_) => return None,
        };

        let now = Utc::now();
        let fresh = !record.is_expired(now, self.timing.detection_threshold);
        self.state.last_seen_leader = Some(record.instance_id.clone());

        if fresh {
            let transitioned = self.state.was_unhealthy || self.state.consecutive_misses > 0;
            self.state.consecutive_misses = 0;
            self.state.was_unhealthy = false;
            if transitioned {
                debug!(leader = %record.instance_id, "leader heartbeat healthy");
                return Some(MonitorEvent::LeaderHealthy(record.instance_id));
            }
            return None;
        }

        self.state.consecutive_misses += 1;
        let misses = self.state.consecutive_misses;

        if misses >= self.miss_quorum {
            self.state.was_unhealthy = true;
            debug!(leader = %record.instance_id, misses, "leader suspected");
            return Some(MonitorEvent::LeaderSuspected(record.instance_id));
        }

        if misses == 1 && self.timing.enable_pre_election {
            return Some(MonitorEvent::LeaderPreElection(record.instance_id));
        }

        None
    }
}
