//! Chunking is invisible to callers: small batch limits give the same
//! positional outcome as a single call.

use proptest::prelude::*;
use triad_coordinator::Coordinator;
use triad_core::{Entity, Key, TriadError};
use triad_storage::{InMemoryDistributedCache, MemoryDatastore, Operation};
use triad_test_utils::fixtures::{new_widgets, seeded_store, small_batch_config};
use triad_test_utils::{init_test_logging, widget, Widget};

fn read_outcome(limit: usize, present: &[i64], requested: &[i64]) -> (Vec<Widget>, Vec<bool>) {
    let seed: Vec<Widget> = present.iter().map(|&id| widget(id, "p")).collect();
    let store = seeded_store(&seed);
    let config = small_batch_config(limit, limit, limit).with_log_errors(false);
    let coordinator = Coordinator::new(store, InMemoryDistributedCache::new())
        .with_config(config)
        .expect("valid config");

    let mut targets: Vec<Widget> = requested.iter().map(|&id| Widget::with_id(id)).collect();
    let missing = match coordinator.session().get_multi(&mut targets) {
        Ok(()) => vec![false; requested.len()],
        Err(TriadError::Multi(multi)) => (0..requested.len())
            .map(|i| multi.is_not_found(i))
            .collect(),
        Err(other) => panic!("unexpected error: {:?}", other),
    };
    let sizes = coordinator.store().batch_sizes(Operation::Get);
    assert!(sizes.iter().all(|&size| size <= limit));
    (targets, missing)
}

#[test]
fn test_put_chunks_respect_small_limits() {
    init_test_logging();
    let config = small_batch_config(4, 3, 2);
    let coordinator = Coordinator::new(MemoryDatastore::new(), InMemoryDistributedCache::new())
        .with_config(config)
        .expect("valid config");
    let mut fresh = new_widgets(8);

    let keys = coordinator
        .session()
        .put_multi(&mut fresh)
        .expect("put succeeds");
    assert_eq!(coordinator.store().batch_sizes(Operation::Put), vec![3, 3, 2]);

    let returned: Vec<Key> = fresh.iter().map(|w| w.key().expect("valid key")).collect();
    assert_eq!(keys, returned, "keys line up with their entities");

    coordinator.session().delete_multi(&keys).expect("delete succeeds");
    assert_eq!(
        coordinator.store().batch_sizes(Operation::Delete),
        vec![2, 2, 2, 2]
    );
    assert!(coordinator.store().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_chunked_reads_match_single_call(
        present in proptest::collection::vec(1i64..40, 0..25),
        requested in proptest::collection::vec(1i64..40, 0..30),
        limit in 1usize..6,
    ) {
        init_test_logging();
        let (chunked, chunked_missing) = read_outcome(limit, &present, &requested);
        let (single, single_missing) = read_outcome(1000, &present, &requested);

        prop_assert_eq!(&chunked_missing, &single_missing);
        for (i, id) in requested.iter().enumerate() {
            prop_assert_eq!(chunked_missing[i], !present.contains(id));
            if !chunked_missing[i] {
                prop_assert_eq!(&chunked[i], &single[i]);
                prop_assert_eq!(&chunked[i], &widget(*id, "p"));
            }
        }
    }
}
