//! Property 6 (CAS round-trip, spec §8): `put(k, v, revision=r)` succeeds iff
//! a prior `get(k)` returned revision `r` and no intervening write occurred.
//! Exercised against `aegis-test-support::FakeKvStore`, which honors the same
//! create-only / revision-CAS semantics as the real JetStream-backed
//! `KvStore` (see `aegis-election`'s unit tests for the live-store
//! counterpart of this contract).

use proptest::prelude::*;

use aegis_election::ElectionRepository;
use aegis_kv::{KvError, PutMode, PutOptions};
use aegis_test_support::FakeKvStore;

fn opts(mode: PutMode) -> PutOptions {
    PutOptions { mode, ttl: None }
}

proptest::proptest! {
    /// A chain of `revision`-CAS writes, each keyed off the revision the
    /// previous write returned, always succeeds and the store's revision
    /// counter strictly increases by one per write.
    #[test]
    fn sequential_revision_cas_chain_always_succeeds(writes in 1usize..20) {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
            let kv = FakeKvStore::new();
            let mut revision = kv.put("k", b"seed".to_vec(), opts(PutMode::CreateOnly)).await.unwrap();

            for i in 0..writes {
                let value = format!("v{i}").into_bytes();
                let next = kv.put("k", value, opts(PutMode::Revision(revision))).await.unwrap();
                prop_assert_eq!(next, revision + 1);
                revision = next;
            }
        });
    }

    /// Once a writer's view of the revision is stale (someone else wrote
    /// since), its CAS write must fail with the *current* revision reported
    /// back, never silently succeed or report the writer's own stale value.
    #[test]
    fn stale_revision_cas_is_rejected_with_current_revision(interloper_writes in 1usize..10) {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
            let kv = FakeKvStore::new();
            let observed = kv.put("k", b"seed".to_vec(), opts(PutMode::CreateOnly)).await.unwrap();

            let mut current = observed;
            for i in 0..interloper_writes {
                current = kv
                    .put("k", format!("interloper{i}").into_bytes(), opts(PutMode::Revision(current)))
                    .await
                    .unwrap();
            }

            let err = kv
                .put("k", b"stale-writer".to_vec(), opts(PutMode::Revision(observed)))
                .await
                .unwrap_err();
            match err {
                KvError::RevisionMismatch { expected, current: reported } => {
                    prop_assert_eq!(expected, observed);
                    prop_assert_eq!(reported, current);
                }
                other => prop_assert!(false, "expected RevisionMismatch, got {other:?}"),
            }
        });
    }
}
