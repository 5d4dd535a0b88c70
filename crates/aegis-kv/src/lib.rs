//! A typed, revisioned key-value layer over JetStream KV buckets (spec
//! §4.2). Every other stateful component — registry, election — builds on
//! this rather than touching `async_nats::jetstream::kv` directly.

mod error;
mod key;

pub use error::KvError;
pub use key::to_wire_key;

use async_nats::jetstream::kv::{Config as KvConfig, Operation as NatsKvOp, Store};
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::HeaderMap;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{info, warn};

use aegis_types::{Duration, KVEntry};

use crate::key::validate_key;

/// How a [`KvStore::put`] should reconcile with an existing value.
#[derive(Debug, Clone, Copy, Default)]
pub enum PutMode {
    /// Plain upsert: always succeeds, returns the new revision.
    #[default]
    Upsert,
    /// Atomic create: fails with [`KvError::AlreadyExists`] if the key is
    /// already present.
    CreateOnly,
    /// Fails with [`KvError::NotFound`] if absent. If `revision` is `Some`,
    /// CAS against it; if `None`, CAS against whatever revision is current
    /// at call time (a single round trip to read-then-write).
    UpdateOnly { revision: Option<u64> },
    /// CAS against an explicit, caller-observed revision.
    Revision(u64),
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub mode: PutMode,
    /// Per-key TTL hint (spec §4.2: "written via message header; stream
    /// must be created with TTL support enabled").
    pub ttl: Option<Duration>,
}

/// A single entry in a key's watch/history stream.
#[derive(Debug, Clone)]
pub enum WatchOp {
    Put(KVEntry),
    Delete(String),
    Purge(String),
}

/// Bucket metadata (spec §4.2 `status()`).
#[derive(Debug, Clone)]
pub struct BucketStatus {
    pub bucket: String,
    pub values: u64,
    pub history: i64,
    pub ttl_supported: bool,
}

/// A connected JetStream KV bucket.
pub struct KvStore {
    js: JetStreamContext,
    store: Store,
    bucket: String,
    ttl_supported: bool,
}

impl KvStore {
    /// Opens (creating if absent) the bucket named `bucket`, with bucket-
    /// level TTL `default_ttl` and per-key TTL support requested
    /// (`allow_msg_ttl` on the backing stream). If the NATS server is too
    /// old to support per-message TTL, the backing stream comes back with
    /// `allow_msg_ttl` unset: `ttl_supported` is recorded `false` and later
    /// `put` calls carrying a `ttl` fail with [`KvError::TtlNotSupported`]
    /// rather than silently dropping the TTL (spec §9 Open Question 3).
    pub async fn connect(
        js: &JetStreamContext,
        bucket: &str,
        default_ttl: Duration,
    ) -> Result<Self, KvError> {
        let config = KvConfig {
            bucket: bucket.to_string(),
            max_age: default_ttl.as_std(),
            allow_msg_ttl: true,
            ..Default::default()
        };

        let store = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => js
                .create_key_value(config)
                .await
                .map_err(|e| KvError::Transport(e.to_string()))?,
        };

        let stream_name = format!("KV_{bucket}");
        let ttl_supported = match js.get_stream(&stream_name).await {
            Ok(mut stream) => stream
                .info()
                .await
                .map(|info| info.config.allow_msg_ttl)
                .unwrap_or(false),
            Err(_) => false,
        };

        if !ttl_supported {
            warn!(bucket, "per-key TTL is not supported by this server (stream lacks allow_msg_ttl)");
        }
        info!(bucket, ttl_supported, "kv bucket ready");

        Ok(Self {
            js: js.clone(),
            store,
            bucket: bucket.to_string(),
            ttl_supported,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn get(&self, key: &str) -> Result<Option<KVEntry>, KvError> {
        validate_key(key)?;
        match self.store.entry(key).await {
            Ok(Some(entry)) => Ok(Some(to_kv_entry(key, entry))),
            Ok(None) => Ok(None),
            Err(e) => Err(KvError::Transport(e.to_string())),
        }
    }

    /// Writes `value` at `key` according to `opts.mode`; `opts.ttl`, if set,
    /// requires the bucket was opened with TTL support and is carried as a
    /// `Nats-TTL` header on a raw JetStream publish rather than through
    /// `Store`'s convenience methods, none of which expose per-message
    /// headers.
    pub async fn put(&self, key: &str, value: Vec<u8>, opts: PutOptions) -> Result<u64, KvError> {
        validate_key(key)?;

        if let Some(ttl) = opts.ttl {
            if !self.ttl_supported {
                return Err(KvError::TtlNotSupported(self.bucket.clone()));
            }
            return self.put_with_ttl(key, value, opts.mode, ttl).await;
        }

        match opts.mode {
            PutMode::Upsert => self
                .store
                .put(key, value.into())
                .await
                .map_err(|e| KvError::Transport(e.to_string())),
            PutMode::CreateOnly => match self.store.create(key, value.into()).await {
                Ok(revision) => Ok(revision),
                Err(e) if e.to_string().to_lowercase().contains("exist") => {
                    Err(KvError::AlreadyExists(key.to_string()))
                }
                Err(e) => Err(KvError::Transport(e.to_string())),
            },
            PutMode::UpdateOnly { revision: Some(revision) } => {
                self.cas(key, value, revision).await
            }
            PutMode::UpdateOnly { revision: None } => {
                let current = self
                    .get(key)
                    .await?
                    .ok_or_else(|| KvError::NotFound(key.to_string()))?;
                self.cas(key, value, current.revision).await
            }
            PutMode::Revision(expected) => self.cas(key, value, expected).await,
        }
    }

    /// Publishes directly to the bucket's `$KV.<bucket>.<key>` subject with
    /// a `Nats-TTL` header (seconds) so the server expires the message
    /// independent of the bucket's own `max_age`. CAS semantics are
    /// reproduced with `Nats-Expected-Last-Subject-Sequence`, matching the
    /// header JetStream's own KV client sends for `create`/`update`.
    async fn put_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        mode: PutMode,
        ttl: Duration,
    ) -> Result<u64, KvError> {
        let expected_sequence = match mode {
            PutMode::Upsert => None,
            PutMode::CreateOnly => Some(0),
            PutMode::UpdateOnly { revision: Some(revision) } => Some(revision),
            PutMode::UpdateOnly { revision: None } => {
                let current = self
                    .get(key)
                    .await?
                    .ok_or_else(|| KvError::NotFound(key.to_string()))?;
                Some(current.revision)
            }
            PutMode::Revision(expected) => Some(expected),
        };

        let mut headers = HeaderMap::new();
        headers.insert("Nats-TTL", ttl.as_std().as_secs().to_string());
        if let Some(expected) = expected_sequence {
            headers.insert("Nats-Expected-Last-Subject-Sequence", expected.to_string());
        }

        let subject = format!("$KV.{}.{key}", self.bucket);
        let result = self
            .js
            .publish_with_headers(subject, headers, value.into())
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?
            .await;

        match result {
            Ok(ack) => Ok(ack.sequence),
            Err(e) => Err(self.classify_sequence_error(key, mode, expected_sequence, e.to_string()).await),
        }
    }

    /// Maps a failed `Nats-Expected-Last-Subject-Sequence` publish back onto
    /// the same error taxonomy [`Self::cas`] produces for `Store::update`
    /// failures.
    async fn classify_sequence_error(
        &self,
        key: &str,
        mode: PutMode,
        expected: Option<u64>,
        err: String,
    ) -> KvError {
        if !err.to_lowercase().contains("sequence") {
            return KvError::Transport(err);
        }
        if matches!(mode, PutMode::CreateOnly) {
            return KvError::AlreadyExists(key.to_string());
        }
        let current = self.get(key).await.ok().flatten().map(|entry| entry.revision);
        match current {
            Some(current_revision) => KvError::RevisionMismatch {
                expected: expected.unwrap_or_default(),
                current: current_revision,
            },
            None => KvError::NotFound(key.to_string()),
        }
    }

    async fn cas(&self, key: &str, value: Vec<u8>, expected: u64) -> Result<u64, KvError> {
        match self.store.update(key, value.into(), expected).await {
            Ok(revision) => Ok(revision),
            Err(e) => {
                let current = self.get(key).await.ok().flatten().map(|entry| entry.revision);
                match current {
                    Some(current_revision) if current_revision != expected => {
                        Err(KvError::RevisionMismatch { expected, current: current_revision })
                    }
                    None => Err(KvError::NotFound(key.to_string())),
                    _ => Err(KvError::Transport(e.to_string())),
                }
            }
        }
    }

    /// Deletes `key`, optionally CAS-guarded by `revision`. Returns `false`
    /// if the key was already absent.
    pub async fn delete(&self, key: &str, revision: Option<u64>) -> Result<bool, KvError> {
        validate_key(key)?;
        if self.get(key).await?.is_none() {
            return Ok(false);
        }

        let result = match revision {
            Some(expected) => self.store.delete_expect_revision(key, Some(expected)).await,
            None => self.store.delete(key).await,
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.to_string().to_lowercase().contains("wrong last sequence") => {
                let current = self.get(key).await.ok().flatten().map(|entry| entry.revision);
                Err(KvError::RevisionMismatch {
                    expected: revision.unwrap_or_default(),
                    current: current.unwrap_or_default(),
                })
            }
            Err(e) => Err(KvError::Transport(e.to_string())),
        }
    }

    /// Lists keys, optionally restricted to those starting with `prefix`.
    pub async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>, KvError> {
        let mut keys_stream = self.store.keys().await.map_err(|e| KvError::Transport(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(key) = keys_stream.next().await {
            let key = key.map_err(|e| KvError::Transport(e.to_string()))?;
            match prefix {
                Some(p) if !key.starts_with(p) => continue,
                _ => out.push(key),
            }
        }
        Ok(out)
    }

    /// Watches `key` (a literal key or prefix), emitting an initial sentinel
    /// (the entry's current state, or nothing if absent) followed by live
    /// updates. Unknown NATS kv operation codes are skipped with a warning
    /// rather than surfaced as an error (spec §4.2).
    pub async fn watch(&self, key: &str) -> Result<impl futures::Stream<Item = WatchOp> + Send, KvError> {
        let watch_key = if key.ends_with('>') || key.ends_with('*') {
            key.to_string()
        } else {
            key.to_string()
        };
        let watcher = self
            .store
            .watch_with_history(&watch_key)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        let stream = watcher.filter_map(|entry| async move {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "kv watch stream error, skipping");
                    return None;
                }
            };
            match entry.operation {
                NatsKvOp::Put => Some(WatchOp::Put(to_kv_entry(&entry.key, entry.clone()))),
                NatsKvOp::Delete => Some(WatchOp::Delete(entry.key.clone())),
                NatsKvOp::Purge => Some(WatchOp::Purge(entry.key.clone())),
                #[allow(unreachable_patterns)]
                _ => {
                    warn!(key = %entry.key, "unknown kv operation code, skipping");
                    None
                }
            }
        });

        Ok(stream)
    }

    /// Returns up to `limit` historical revisions of `key`, newest first.
    pub async fn history(&self, key: &str, limit: usize) -> Result<Vec<KVEntry>, KvError> {
        validate_key(key)?;
        let mut history_stream = self
            .store
            .history(key)
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some(entry) = history_stream.next().await {
            let entry = entry.map_err(|e| KvError::Transport(e.to_string()))?;
            entries.push(to_kv_entry(key, entry));
        }
        entries.sort_by(|a, b| b.revision.cmp(&a.revision));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn status(&self) -> Result<BucketStatus, KvError> {
        let status = self.store.status().await.map_err(|e| KvError::Transport(e.to_string()))?;
        Ok(BucketStatus {
            bucket: self.bucket.clone(),
            values: status.values(),
            history: status.history(),
            ttl_supported: self.ttl_supported,
        })
    }
}

fn to_kv_entry(key: &str, entry: async_nats::jetstream::kv::Entry) -> KVEntry {
    let created_at: DateTime<Utc> = entry.created.into();
    KVEntry {
        key: key.to_string(),
        value: entry.value.to_vec(),
        revision: entry.revision,
        created_at,
        updated_at: created_at,
        ttl: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_mode_defaults_to_upsert() {
        assert!(matches!(PutMode::default(), PutMode::Upsert));
    }
}
