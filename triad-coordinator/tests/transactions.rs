//! Transactions bypass both caches and buffer their effects until commit.

use triad_coordinator::Coordinator;
use triad_core::{
    ConfigError, CoordinatorConfig, DatastoreError, Entity, Key, TransactionOptions, TriadError,
};
use triad_storage::{DistributedCache, InMemoryDistributedCache, MemoryDatastore, Operation};
use triad_test_utils::fixtures::{owned_widget, quiet_config, seeded_store};
use triad_test_utils::{capture_logs, init_test_logging, widget, widget_key, widgets, Widget};

type TestCoordinator = Coordinator<MemoryDatastore, InMemoryDistributedCache>;

fn coordinator_with(store: MemoryDatastore, config: CoordinatorConfig) -> TestCoordinator {
    init_test_logging();
    Coordinator::new(store, InMemoryDistributedCache::new())
        .with_config(config)
        .expect("valid config")
}

fn single_group() -> TransactionOptions {
    TransactionOptions::default()
}

fn cross_group() -> TransactionOptions {
    TransactionOptions::default().with_cross_group(true)
}

#[test]
fn test_commit_updates_memory_but_not_distributed_cache() {
    let coordinator = coordinator_with(MemoryDatastore::new(), CoordinatorConfig::default());
    let mut session = coordinator.session();

    session
        .run_in_transaction(&single_group(), |txn| {
            let mut w = widget(1, "committed");
            txn.put(&mut w)?;
            Ok(())
        })
        .expect("commits");

    let memkey = widget_key(1).encode();
    assert_eq!(
        session.memory_cache().get::<Widget>(&memkey),
        Some(&widget(1, "committed"))
    );
    assert!(!coordinator.cache().contains(&memkey));
    assert!(coordinator.store().contains(&widget_key(1)));
}

#[test]
fn test_abort_leaves_every_tier_untouched() {
    let coordinator = coordinator_with(MemoryDatastore::new(), quiet_config());
    let mut session = coordinator.session();

    let result = session.run_in_transaction(&single_group(), |txn| {
        let mut w = widget(1, "doomed");
        txn.put(&mut w)?;
        Err(DatastoreError::Unavailable {
            reason: "unit of work gave up".to_string(),
        }
        .into())
    });

    assert!(matches!(
        result,
        Err(TriadError::Datastore(DatastoreError::Unavailable { .. }))
    ));
    assert!(session.memory_cache().is_empty());
    assert!(coordinator.cache().is_empty());
    assert!(coordinator.store().is_empty());
}

#[test]
fn test_transaction_never_touches_distributed_cache() {
    let store = seeded_store(&widgets(2));
    let coordinator = coordinator_with(store, CoordinatorConfig::default());
    let stale = serde_json_bytes("stale");
    coordinator
        .cache()
        .insert_raw(widget_key(1).encode(), stale.clone());
    let before = coordinator.cache().stats().expect("stats");

    let mut session = coordinator.session();
    session
        .run_in_transaction(&cross_group(), |txn| {
            let mut read = vec![Widget::with_id(1), Widget::with_id(2)];
            txn.get_multi(&mut read)?;
            assert_eq!(read[0].name, "widget-1", "reads come from the datastore");

            let mut w = widget(1, "fresh");
            txn.put(&mut w)?;
            txn.delete(&widget_key(2))?;
            Ok(())
        })
        .expect("commits");

    let after = coordinator.cache().stats().expect("stats");
    assert_eq!(after.hits + after.misses, before.hits + before.misses);
    // Documented limitation: the stale cached value survives the commit.
    assert_eq!(coordinator.cache().raw(&widget_key(1).encode()), Some(stale));
    assert!(!session.memory_cache().contains(&widget_key(2).encode()));
}

fn serde_json_bytes(name: &str) -> Vec<u8> {
    format!(r#"{{"name":"{}","quantity":1,"tags":[]}}"#, name).into_bytes()
}

#[test]
fn test_committed_delete_evicts_memory_entry() {
    let store = seeded_store(&widgets(1));
    let coordinator = coordinator_with(store, CoordinatorConfig::default());
    let mut session = coordinator.session();

    session.get(&mut Widget::with_id(1)).expect("present");
    assert!(session.memory_cache().contains(&widget_key(1).encode()));

    session
        .run_in_transaction(&single_group(), |txn| txn.delete(&widget_key(1)))
        .expect("commits");

    assert!(!session.memory_cache().contains(&widget_key(1).encode()));
    assert!(!coordinator.store().contains(&widget_key(1)));
}

#[test]
fn test_aborted_delete_keeps_memory_entry() {
    let store = seeded_store(&widgets(1));
    let coordinator = coordinator_with(store, quiet_config());
    let mut session = coordinator.session();
    session.get(&mut Widget::with_id(1)).expect("present");

    let result = session.run_in_transaction(&single_group(), |txn| {
        txn.delete(&widget_key(1))?;
        Err(DatastoreError::ConcurrentTransaction.into())
    });

    assert!(result.is_err());
    assert!(session.memory_cache().contains(&widget_key(1).encode()));
    assert!(coordinator.store().contains(&widget_key(1)));
}

#[test]
fn test_retried_attempts_do_not_leak_buffers() {
    let coordinator = coordinator_with(MemoryDatastore::new(), CoordinatorConfig::default());
    coordinator.store().force_conflicts(2);
    let mut session = coordinator.session();
    let mut attempt = 0;

    session
        .run_in_transaction(&single_group(), |txn| {
            attempt += 1;
            // Each attempt writes a different entity of the same group.
            let mut w = owned_widget("acme", attempt, &format!("attempt-{}", attempt));
            txn.put(&mut w)?;
            Ok(())
        })
        .expect("third attempt commits");

    assert_eq!(attempt, 3);
    assert_eq!(session.memory_cache().len(), 1);
    let committed = owned_widget("acme", 3, "attempt-3");
    let memkey = committed.key().expect("valid key").encode();
    assert_eq!(
        session.memory_cache().get::<Widget>(&memkey),
        Some(&committed)
    );
    assert_eq!(coordinator.store().len(), 1);
}

#[test]
fn test_exhausted_retries_surface_conflict() {
    let coordinator = coordinator_with(MemoryDatastore::new(), quiet_config());
    coordinator.store().force_conflicts(10);
    let mut session = coordinator.session();

    let result = session.run_in_transaction(&single_group().with_attempts(2), |txn| {
        txn.put(&mut widget(1, "never"))?;
        Ok(())
    });

    assert_eq!(
        result,
        Err(TriadError::Datastore(DatastoreError::ConcurrentTransaction))
    );
    assert!(session.memory_cache().is_empty());
    assert_eq!(coordinator.store().call_count(Operation::Commit), 2);
}

#[test]
fn test_zero_attempts_is_rejected_before_running() {
    let coordinator = coordinator_with(MemoryDatastore::new(), quiet_config());
    let mut session = coordinator.session();
    let mut ran = false;

    let result = session.run_in_transaction(&single_group().with_attempts(0), |_| {
        ran = true;
        Ok(())
    });

    assert!(matches!(
        result,
        Err(TriadError::Config(ConfigError::InvalidValue { .. }))
    ));
    assert!(!ran);
}

#[test]
fn test_single_group_limit_applies() {
    let coordinator = coordinator_with(MemoryDatastore::new(), quiet_config());
    let mut session = coordinator.session();

    let result = session.run_in_transaction(&single_group(), |txn| {
        txn.put_multi(&mut [widget(1, "a"), widget(2, "b")])?;
        Ok(())
    });

    assert!(matches!(
        result,
        Err(TriadError::Datastore(DatastoreError::TooManyEntityGroups { .. }))
    ));

    session
        .run_in_transaction(&single_group(), |txn| {
            txn.put_multi(&mut [owned_widget("acme", 1, "a"), owned_widget("acme", 2, "b")])?;
            Ok(())
        })
        .expect("one entity group");
}

#[test]
fn test_transactional_reads_are_chunked() {
    let all: Vec<Widget> = (1..=12).map(|id| owned_widget("acme", id, "w")).collect();
    let store = seeded_store(&all);
    let config = CoordinatorConfig::default().with_batch_limits(5, 5, 5);
    let coordinator = coordinator_with(store, config);
    let mut session = coordinator.session();

    session
        .run_in_transaction(&single_group(), |txn| {
            let mut read: Vec<Widget> = all
                .iter()
                .map(|w| Widget {
                    id: w.id,
                    owner: w.owner.clone(),
                    ..Widget::default()
                })
                .collect();
            txn.get_multi(&mut read)?;
            assert_eq!(read, all);
            Ok(())
        })
        .expect("commits");

    assert_eq!(
        coordinator.store().batch_sizes(Operation::Get),
        vec![5, 5, 2]
    );
    assert!(coordinator
        .store()
        .calls()
        .iter()
        .filter(|call| call.operation == Operation::Get)
        .all(|call| call.transactional));
}

#[test]
fn test_transactional_get_reports_missing_positionally() {
    let store = seeded_store(&[owned_widget("acme", 1, "a")]);
    let coordinator = coordinator_with(store, quiet_config());
    let mut session = coordinator.session();

    session
        .run_in_transaction(&single_group(), |txn| {
            let mut read = vec![
                owned_widget("acme", 1, ""),
                owned_widget("acme", 2, ""),
            ];
            let err = txn.get_multi(&mut read).expect_err("slot 1 missing");
            assert!(triad_core::is_not_found(&err, 1));
            assert!(!triad_core::is_not_found(&err, 0));
            assert_eq!(read[0].name, "a");
            Ok(())
        })
        .expect("the unit of work handled the error");
}

#[test]
fn test_transactional_delete_requires_complete_keys() {
    let coordinator = coordinator_with(MemoryDatastore::new(), quiet_config());
    let mut session = coordinator.session();

    let result = session.run_in_transaction(&single_group(), |txn| {
        txn.delete(&Key::incomplete("Widget", None)?)
    });

    assert!(matches!(result, Err(TriadError::Validation(_))));
}

#[test]
fn test_failure_escaping_transaction_is_logged_once() {
    let coordinator = Coordinator::new(MemoryDatastore::new(), InMemoryDistributedCache::new());
    let mut session = coordinator.session();

    let (result, logs) = capture_logs(|| {
        session.run_in_transaction(&single_group(), |txn| txn.get(&mut Widget::with_id(9)))
    });

    assert!(result.expect_err("entity is missing").is_no_such_entity());
    assert_eq!(logs.count("triad operation failed"), 1, "{}", logs.contents());
}

#[test]
fn test_handled_failure_inside_transaction_is_not_logged() {
    let coordinator = Coordinator::new(MemoryDatastore::new(), InMemoryDistributedCache::new());
    let mut session = coordinator.session();

    let (result, logs) = capture_logs(|| {
        session.run_in_transaction(&single_group(), |txn| {
            let missing = txn.get(&mut Widget::with_id(9));
            assert!(missing.is_err());
            let incomplete = txn.delete(&Key::incomplete("Widget", None)?);
            assert!(matches!(incomplete, Err(TriadError::Validation(_))));
            Ok(())
        })
    });

    result.expect("the unit of work handled both errors");
    assert_eq!(logs.count("triad operation failed"), 0, "{}", logs.contents());
}
