//! An in-memory, single-process stand-in for `aegis_kv::KvStore` that
//! implements `aegis-election`'s `ElectionRepository` port, honoring the
//! same create-only-CAS / revision / TTL semantics as the real JetStream KV
//! bucket. Lets the election coordinator's FSM run as deterministic
//! `#[tokio::test]`s (properties 1, 2, 4, 6 and scenarios S1, S2, S5, S6)
//! without a live NATS server — mirroring the Python original's
//! `NatsKvElectionRepository` port/adapter split.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aegis_election::ElectionRepository;
use aegis_kv::{KvError, PutMode, PutOptions};
use aegis_types::KVEntry;

struct Record {
    value: Vec<u8>,
    revision: u64,
    created_at: DateTime<Utc>,
    /// `None` means no TTL; `Some` is checked against `tokio::time::Instant`
    /// so tests driving `tokio::time::{pause, advance}` control expiry.
    expires_at: Option<tokio::time::Instant>,
}

impl Record {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(expiry) => tokio::time::Instant::now() < expiry,
            None => true,
        }
    }
}

/// An in-memory KV bucket shared (via `Arc`) across every coordinator/monitor
/// under test, so they race on the same keys exactly as they would against a
/// real JetStream bucket.
#[derive(Default)]
pub struct FakeKvStore {
    records: Mutex<HashMap<String, Record>>,
    revision_seq: AtomicU64,
}

impl FakeKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.revision_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn to_entry(key: &str, record: &Record) -> KVEntry {
        KVEntry {
            key: key.to_string(),
            value: record.value.clone(),
            revision: record.revision,
            created_at: record.created_at,
            updated_at: record.created_at,
            ttl: None,
        }
    }
}

#[async_trait]
impl ElectionRepository for FakeKvStore {
    async fn get(&self, key: &str) -> Result<Option<KVEntry>, KvError> {
        let records = self.records.lock().expect("fake kv lock poisoned");
        Ok(records.get(key).filter(|r| r.is_live()).map(|r| Self::to_entry(key, r)))
    }

    async fn put(&self, key: &str, value: Vec<u8>, opts: PutOptions) -> Result<u64, KvError> {
        let mut records = self.records.lock().expect("fake kv lock poisoned");
        let live_current = records.get(key).filter(|r| r.is_live()).map(|r| r.revision);

        match opts.mode {
            PutMode::Upsert => {}
            PutMode::CreateOnly => {
                if live_current.is_some() {
                    return Err(KvError::AlreadyExists(key.to_string()));
                }
            }
            PutMode::UpdateOnly { revision } => {
                let current = live_current.ok_or_else(|| KvError::NotFound(key.to_string()))?;
                if let Some(expected) = revision {
                    if current != expected {
                        return Err(KvError::RevisionMismatch { expected, current });
                    }
                }
            }
            PutMode::Revision(expected) => match live_current {
                Some(current) if current != expected => {
                    return Err(KvError::RevisionMismatch { expected, current });
                }
                Some(_) => {}
                None => return Err(KvError::NotFound(key.to_string())),
            },
        }

        let revision = self.next_revision();
        let expires_at = opts.ttl.map(|ttl| tokio::time::Instant::now() + ttl.as_std());
        records.insert(
            key.to_string(),
            Record { value, revision, created_at: Utc::now(), expires_at },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str, revision: Option<u64>) -> Result<bool, KvError> {
        let mut records = self.records.lock().expect("fake kv lock poisoned");
        let Some(current) = records.get(key).filter(|r| r.is_live()).map(|r| r.revision) else {
            return Ok(false);
        };
        if let Some(expected) = revision {
            if current != expected {
                return Err(KvError::RevisionMismatch { expected, current });
            }
        }
        records.remove(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_only_fails_on_second_writer() {
        let kv = FakeKvStore::new();
        kv.put("leader", b"a".to_vec(), PutOptions { mode: PutMode::CreateOnly, ttl: None })
            .await
            .expect("first create succeeds");
        let err = kv
            .put("leader", b"b".to_vec(), PutOptions { mode: PutMode::CreateOnly, ttl: None })
            .await
            .expect_err("second create must lose the race");
        assert!(matches!(err, KvError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn revision_cas_detects_conflict() {
        let kv = FakeKvStore::new();
        let r1 = kv
            .put("k", b"v1".to_vec(), PutOptions { mode: PutMode::CreateOnly, ttl: None })
            .await
            .unwrap();
        kv.put("k", b"v2".to_vec(), PutOptions { mode: PutMode::Revision(r1), ttl: None })
            .await
            .expect("cas against the current revision succeeds");
        let err = kv
            .put("k", b"v3".to_vec(), PutOptions { mode: PutMode::Revision(r1), ttl: None })
            .await
            .expect_err("stale revision must be rejected");
        assert!(matches!(err, KvError::RevisionMismatch { expected, current } if expected == r1 && current == r1 + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_reclaims_the_key() {
        use aegis_types::Duration;

        let kv = FakeKvStore::new();
        kv.put(
            "leader",
            b"a".to_vec(),
            PutOptions { mode: PutMode::CreateOnly, ttl: Some(Duration::from_secs(2)) },
        )
        .await
        .unwrap();

        assert!(kv.get("leader").await.unwrap().is_some());
        tokio::time::advance(std::time::Duration::from_millis(2500)).await;
        assert!(kv.get("leader").await.unwrap().is_none());

        kv.put("leader", b"b".to_vec(), PutOptions { mode: PutMode::CreateOnly, ttl: None })
            .await
            .expect("create-only succeeds again once the old entry has expired");
    }
}
