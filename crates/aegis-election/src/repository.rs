//! The `ElectionRepository` port: the narrow slice of `aegis-kv::KvStore`
//! the coordinator and monitor actually need (get / CAS put / delete),
//! pulled out as a trait so the FSM in [`crate::coordinator`] is
//! unit-testable against an in-memory double without a live NATS server —
//! mirroring the Python original's `NatsKvElectionRepository` port/adapter
//! split (`election_factory.py`).

use async_trait::async_trait;

use aegis_kv::{KvError, KvStore, PutOptions};
use aegis_types::KVEntry;

/// Storage port the election coordinator and heartbeat monitor depend on.
/// `aegis-kv::KvStore` implements this directly; tests substitute an
/// in-memory double (`aegis-test-support::FakeKvStore`).
#[async_trait]
pub trait ElectionRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KVEntry>, KvError>;
    async fn put(&self, key: &str, value: Vec<u8>, opts: PutOptions) -> Result<u64, KvError>;
    async fn delete(&self, key: &str, revision: Option<u64>) -> Result<bool, KvError>;
}

#[async_trait]
impl ElectionRepository for KvStore {
    async fn get(&self, key: &str) -> Result<Option<KVEntry>, KvError> {
        KvStore::get(self, key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, opts: PutOptions) -> Result<u64, KvError> {
        KvStore::put(self, key, value, opts).await
    }

    async fn delete(&self, key: &str, revision: Option<u64>) -> Result<bool, KvError> {
        KvStore::delete(self, key, revision).await
    }
}
