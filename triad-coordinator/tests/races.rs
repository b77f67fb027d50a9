//! Cache coherence under concurrent readers and writers.

use std::sync::{Arc, Mutex};

use triad_coordinator::Coordinator;
use triad_core::{
    CoordinatorConfig, DatastoreError, Entity, Key, LatencyProfile, TransactionOptions,
};
use triad_storage::{
    Codec, Datastore, DistributedCache, InMemoryDistributedCache, JsonCodec, MemoryDatastore,
};
use triad_test_utils::fixtures::seeded_store;
use triad_test_utils::{init_test_logging, widget, widget_key, widgets, Widget};

type Hook = Box<dyn FnOnce() + Send>;

/// Datastore wrapper that runs a hook once, right after the first read
/// returns and before the coordinator acts on it.
#[derive(Clone)]
struct PausingStore {
    inner: MemoryDatastore,
    after_first_get: Arc<Mutex<Option<Hook>>>,
}

impl PausingStore {
    fn new(inner: MemoryDatastore, hook: Hook) -> Self {
        Self {
            inner,
            after_first_get: Arc::new(Mutex::new(Some(hook))),
        }
    }
}

impl Datastore for PausingStore {
    fn get_multi<E: Entity>(&self, keys: &[Key], dst: &mut [E]) -> Result<(), DatastoreError> {
        let result = self.inner.get_multi(keys, dst);
        let hook = self
            .after_first_get
            .lock()
            .map_err(|_| DatastoreError::LockPoisoned)?
            .take();
        if let Some(hook) = hook {
            hook();
        }
        result
    }

    fn put_multi<E: Entity>(&self, keys: &[Key], src: &[E]) -> Result<Vec<Key>, DatastoreError> {
        self.inner.put_multi(keys, src)
    }

    fn delete_multi(&self, keys: &[Key]) -> Result<(), DatastoreError> {
        self.inner.delete_multi(keys)
    }

    fn run_in_transaction<F, Err>(&self, options: &TransactionOptions, mut f: F) -> Result<(), Err>
    where
        F: FnMut(&Self) -> Result<(), Err>,
        Err: From<DatastoreError>,
    {
        self.inner.run_in_transaction(options, |tx| {
            f(&PausingStore {
                inner: tx.clone(),
                after_first_get: Arc::new(Mutex::new(None)),
            })
        })
    }
}

fn cached_widget(cache: &InMemoryDistributedCache, id: i64) -> Option<Widget> {
    cache
        .raw(&widget_key(id).encode())
        .map(|bytes| JsonCodec.decode(&bytes).expect("cached value decodes"))
}

#[test]
fn test_slow_reader_cannot_clobber_fresher_value() {
    init_test_logging();
    let store = seeded_store(&[widget(1, "v1")]);
    let cache = InMemoryDistributedCache::new();

    // While the slow reader holds v1, a writer stores v2 and a fast reader
    // caches it.
    let hook: Hook = {
        let store = store.clone();
        let cache = cache.clone();
        Box::new(move || {
            let other = Coordinator::new(store, cache);
            let mut writer = other.session();
            writer.put(&mut widget(1, "v2")).expect("write succeeds");
            let mut fresh = Widget::with_id(1);
            other.session().get(&mut fresh).expect("present");
            assert_eq!(fresh.name, "v2");
        })
    };
    let slow = Coordinator::new(PausingStore::new(store.clone(), hook), cache.clone());
    let mut session = slow.session();

    let mut stale = Widget::with_id(1);
    session.get(&mut stale).expect("present");

    assert_eq!(stale.name, "v1", "the slow reader saw the old value");
    assert_eq!(slow.stats().lost_races, 1);
    assert_eq!(cached_widget(&cache, 1).map(|w| w.name).as_deref(), Some("v2"));
    assert!(
        !session.memory_cache().contains(&widget_key(1).encode()),
        "a value that lost the populate race is not kept in memory"
    );
}

#[test]
fn test_writer_invalidates_value_cached_during_write() {
    init_test_logging();
    let store = seeded_store(&[widget(1, "v1")]);
    let cache = InMemoryDistributedCache::new();
    let coordinator = Coordinator::new(store.clone(), cache.clone());

    // A reader caches v1, then a write lands; the write must invalidate it.
    coordinator.session().get(&mut Widget::with_id(1)).expect("present");
    assert_eq!(cached_widget(&cache, 1).map(|w| w.name).as_deref(), Some("v1"));

    coordinator
        .session()
        .put(&mut widget(1, "v2"))
        .expect("write succeeds");
    assert!(cached_widget(&cache, 1).is_none());

    let mut reread = Widget::with_id(1);
    coordinator.session().get(&mut reread).expect("present");
    assert_eq!(reread.name, "v2");
    assert_eq!(cached_widget(&cache, 1).map(|w| w.name).as_deref(), Some("v2"));
}

#[test]
fn test_concurrent_readers_populate_each_entity_once() {
    init_test_logging();
    let all = widgets(20);
    let store = seeded_store(&all);
    let cache = InMemoryDistributedCache::new();
    let config = CoordinatorConfig::default()
        .with_log_errors(false)
        .with_simulated_latency(LatencyProfile::laggy());
    let coordinator = Coordinator::new(store, cache.clone())
        .with_config(config)
        .expect("valid config");

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let coordinator = &coordinator;
            let all = &all;
            scope.spawn(move || {
                let mut session = coordinator.session();
                let mut targets: Vec<Widget> =
                    all.iter().map(|w| Widget::with_id(w.id)).collect();
                session.get_multi(&mut targets).expect("present");
                assert_eq!(&targets, all);
            });
        }
    });

    let stats = cache.stats().expect("stats");
    assert_eq!(stats.items_added, 20, "at most one add wins per entity");
    assert_eq!(stats.add_collisions, coordinator.stats().lost_races);
    for w in &all {
        assert_eq!(cached_widget(&cache, w.id).as_ref(), Some(w));
    }
}

#[test]
fn test_concurrent_writers_and_readers_converge() {
    init_test_logging();
    let store = seeded_store(&widgets(10));
    let cache = InMemoryDistributedCache::new();
    let config = CoordinatorConfig::default()
        .with_log_errors(false)
        .with_simulated_latency(LatencyProfile::laggy());
    let coordinator = Coordinator::new(store.clone(), cache.clone())
        .with_config(config)
        .expect("valid config");

    std::thread::scope(|scope| {
        for writer in 0..3 {
            let coordinator = &coordinator;
            scope.spawn(move || {
                let mut session = coordinator.session();
                for round in 0..5 {
                    let mut batch: Vec<Widget> = (1..=10)
                        .map(|id| widget(id, &format!("w{}-r{}", writer, round)))
                        .collect();
                    session.put_multi(&mut batch).expect("write succeeds");
                }
            });
        }
        for _ in 0..3 {
            let coordinator = &coordinator;
            scope.spawn(move || {
                for _ in 0..5 {
                    let mut targets: Vec<Widget> = (1..=10).map(Widget::with_id).collect();
                    coordinator
                        .session()
                        .get_multi(&mut targets)
                        .expect("present");
                }
            });
        }
    });

    // Once the writers are done, a final write per entity must leave the
    // cache either empty or agreeing with the datastore after a read.
    let mut settle: Vec<Widget> = (1..=10).map(|id| widget(id, "settled")).collect();
    coordinator
        .session()
        .put_multi(&mut settle)
        .expect("write succeeds");
    let mut targets: Vec<Widget> = (1..=10).map(Widget::with_id).collect();
    coordinator
        .session()
        .get_multi(&mut targets)
        .expect("present");

    for id in 1..=10 {
        let mut stored = vec![Widget::default()];
        store
            .get_multi(&[widget_key(id)], &mut stored)
            .expect("stored");
        assert_eq!(stored[0].name, "settled");
        assert_eq!(
            cached_widget(&cache, id).map(|w| w.name).as_deref(),
            Some("settled")
        );
    }
}
