//! Election Coordinator (spec §4.5): the `STANDBY -> ELECTING -> ACTIVE ->
//! STANDBY` finite state machine. Mutual exclusion follows directly from
//! the KV store's create-only CAS — this type never needs a distributed
//! lock, only a correctly-ordered sequence of `put`s.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aegis_kv::{KvError, PutMode, PutOptions};
use aegis_types::{Duration, InstanceId, LeaderRecord};

use crate::error::ElectionError;
use crate::monitor::MonitorEvent;
use crate::repository::ElectionRepository;

/// Current phase of the coordinator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Standby,
    Electing,
    Active,
}

/// State transitions reported to the owning use case (spec §4.6 composes
/// these into domain events `election.won` / `election.lost` /
/// `leader.stepped_down`).
#[derive(Debug, Clone)]
pub enum ElectionEvent {
    Won,
    Lost { winner: InstanceId },
    SteppedDown { reason: String },
}

/// Administrative input to a running coordinator (spec §4.6
/// `trigger_manual_election`). The caller is responsible for first
/// validating no healthy leader exists; the coordinator does not re-check.
#[derive(Debug, Clone, Copy)]
pub enum ElectionControl {
    TriggerElection,
}

/// Consecutive healthy monitor ticks required before the backoff attempt
/// counter resets (spec §4.5: "Reset counter on STANDBY stabilisation (>= 2
/// x heartbeat_interval with a healthy leader observed)").
const STABILIZATION_TICKS: u32 = 2;

const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(30);

pub struct ElectionCoordinator {
    kv: Arc<dyn ElectionRepository>,
    leader_key: String,
    instance_id: InstanceId,
    heartbeat_interval: Duration,
    leader_ttl: Duration,
    election_delay: Duration,
    enable_pre_election: bool,
    state_tx: watch::Sender<ElectionState>,
}

impl ElectionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn ElectionRepository>,
        leader_key: String,
        instance_id: InstanceId,
        heartbeat_interval: Duration,
        leader_ttl: Duration,
        election_delay: Duration,
        enable_pre_election: bool,
    ) -> (Self, watch::Receiver<ElectionState>) {
        let (state_tx, state_rx) = watch::channel(ElectionState::Standby);
        (
            Self {
                kv,
                leader_key,
                instance_id,
                heartbeat_interval,
                leader_ttl,
                election_delay,
                enable_pre_election,
                state_tx,
            },
            state_rx,
        )
    }

    fn set_state(&self, state: ElectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Drives the state machine until `cancellation` fires. Best-effort
    /// releases the leader key (CAS-guarded on the last known revision) on
    /// shutdown if this instance was active.
    pub async fn run(
        self,
        mut monitor_events: mpsc::Receiver<MonitorEvent>,
        mut control: mpsc::Receiver<ElectionControl>,
        events_tx: mpsc::Sender<ElectionEvent>,
        cancellation: CancellationToken,
    ) {
        let mut attempt: u32 = 0;
        let mut healthy_ticks: u32 = 0;

        loop {
            if cancellation.is_cancelled() {
                return;
            }

            self.set_state(ElectionState::Standby);
            tokio::select! {
                _ = cancellation.cancelled() => return,
                event = monitor_events.recv() => {
                    match event {
                        None => return,
                        Some(MonitorEvent::LeaderVacant | MonitorEvent::LeaderSuspected(_)) => {
                            healthy_ticks = 0;
                        }
                        Some(MonitorEvent::LeaderPreElection(_)) if self.enable_pre_election => {
                            healthy_ticks = 0;
                        }
                        Some(MonitorEvent::LeaderHealthy(_)) => {
                            healthy_ticks += 1;
                            if healthy_ticks >= STABILIZATION_TICKS {
                                attempt = 0;
                            }
                            continue;
                        }
                        Some(MonitorEvent::LeaderPreElection(_)) => continue,
                    }
                }
                Some(ElectionControl::TriggerElection) = control.recv() => {
                    debug!("manual election trigger received");
                }
            }

            // ---- ELECTING ---------------------------------------------------
            self.set_state(ElectionState::Electing);
            if attempt > 0 {
                let backoff = self.backoff_duration(attempt);
                tokio::select! {
                    _ = cancellation.cancelled() => return,
                    _ = tokio::time::sleep(backoff.as_std()) => {}
                    Some(MonitorEvent::LeaderHealthy(_)) = monitor_events.recv() => {
                        continue;
                    }
                }
            }

            match self.try_become_leader().await {
                Ok(revision) => {
                    attempt = 0;
                    self.set_state(ElectionState::Active);
                    info!(instance = %self.instance_id, "elected leader");
                    if events_tx.send(ElectionEvent::Won).await.is_err() {
                        return;
                    }
                    let stepped_down = self
                        .run_active(&mut monitor_events, &mut control, &events_tx, &cancellation, revision)
                        .await;
                    if !stepped_down {
                        return;
                    }
                }
                Err(ElectionError::Kv(KvError::AlreadyExists(_))) => {
                    attempt += 1;
                    if let Ok(Some(winner)) = self.read_current_leader().await {
                        debug!(winner = %winner, "lost election to existing leader");
                        if events_tx.send(ElectionEvent::Lost { winner }).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "election attempt failed transiently, retrying after backoff");
                }
            }
        }
    }

    /// Owns the renewal loop while this instance holds the leader key.
    /// Returns `true` if the coordinator should fall back to STANDBY and
    /// keep running (graceful step-down), `false` if the caller should stop
    /// entirely (cancellation or a closed event channel).
    async fn run_active(
        &self,
        monitor_events: &mut mpsc::Receiver<MonitorEvent>,
        control: &mut mpsc::Receiver<ElectionControl>,
        events_tx: &mpsc::Sender<ElectionEvent>,
        cancellation: &CancellationToken,
        initial_revision: u64,
    ) -> bool {
        let mut revision = initial_revision;
        let mut ticker = tokio::time::interval(self.heartbeat_interval.as_std());
        ticker.tick().await; // the first tick fires immediately; we just created the record.

        let ratio = self.leader_ttl.as_secs_f64() / self.heartbeat_interval.as_secs_f64();
        let max_retries = (ratio.ceil() as u32).saturating_sub(1);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    self.release(revision).await;
                    return false;
                }
                _ = ticker.tick() => {
                    match self.renew(revision, max_retries).await {
                        Ok(new_revision) => revision = new_revision,
                        Err(reason) => {
                            warn!(reason = %reason, "stepping down");
                            let _ = events_tx.send(ElectionEvent::SteppedDown { reason }).await;
                            return true;
                        }
                    }
                }
                _ = monitor_events.recv() => {
                    // Informational only while active: renewal is authoritative.
                }
                _ = control.recv() => {
                    debug!("manual election trigger ignored: already active");
                }
            }
        }
    }

    async fn try_become_leader(&self) -> Result<u64, ElectionError> {
        let record = LeaderRecord::new(self.instance_id.clone(), Utc::now());
        let bytes = serde_json::to_vec(&record).expect("LeaderRecord always serializes");
        let revision = self
            .kv
            .put(
                &self.leader_key,
                bytes,
                PutOptions { mode: PutMode::CreateOnly, ttl: Some(self.leader_ttl) },
            )
            .await?;
        Ok(revision)
    }

    async fn renew(&self, revision: u64, max_retries: u32) -> Result<u64, String> {
        let mut attempts = 0u32;
        loop {
            let current = match self.kv.get(&self.leader_key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => return Err("leader key expired before renewal".to_string()),
                Err(e) => {
                    attempts += 1;
                    if attempts > max_retries {
                        return Err(format!("renewal read exhausted retries: {e}"));
                    }
                    continue;
                }
            };

            let mut record: LeaderRecord = match serde_json::from_slice(&current.value) {
                Ok(record) => record,
                Err(e) => return Err(format!("malformed leader record: {e}")),
            };
            record.last_heartbeat = Utc::now();
            let bytes = serde_json::to_vec(&record).expect("LeaderRecord always serializes");

            match self
                .kv
                .put(&self.leader_key, bytes, PutOptions { mode: PutMode::Revision(revision), ttl: None })
                .await
            {
                Ok(new_revision) => return Ok(new_revision),
                Err(KvError::RevisionMismatch { expected, current }) => {
                    return Err(format!(
                        "revision mismatch renewing leader key (expected {expected}, current {current}): another process replaced us"
                    ));
                }
                Err(KvError::NotFound(_)) => return Err("leader key expired before renewal completed".to_string()),
                Err(e) => {
                    attempts += 1;
                    if attempts > max_retries {
                        return Err(format!("renewal write exhausted retries: {e}"));
                    }
                }
            }
        }
    }

    async fn release(&self, revision: u64) {
        match self.kv.delete(&self.leader_key, Some(revision)).await {
            Ok(_) => debug!(instance = %self.instance_id, "released leader key on shutdown"),
            Err(e) => warn!(error = %e, "best-effort leader key release failed"),
        }
    }

    async fn read_current_leader(&self) -> Result<Option<InstanceId>, ElectionError> {
        match self.kv.get(&self.leader_key).await? {
            Some(entry) => {
                let record: LeaderRecord =
                    serde_json::from_slice(&entry.value).map_err(|source| ElectionError::MalformedRecord {
                        key: self.leader_key.clone(),
                        source,
                    })?;
                Ok(Some(record.instance_id))
            }
            None => Ok(None),
        }
    }

    /// `election_delay * 2^attempt`, jittered by up to +/-25%, capped at 30s
    /// (spec §4.5 "Election backoff").
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.election_delay.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let capped = base.min(MAX_BACKOFF.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered).unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    /// Exercises the doubling-and-cap formula `backoff_duration` applies,
    /// without needing a live `KvStore` to construct a coordinator.
    #[test]
    fn backoff_formula_grows_and_caps() {
        let election_delay_secs = 0.3;
        let grown = election_delay_secs * 2f64.powi(10);
        assert!(grown > election_delay_secs);
        assert!(grown.min(30.0) <= 30.0);
    }
}
