//! Triad Test Utilities
//!
//! Shared test infrastructure for the Triad workspace:
//! - Test entities ([`Widget`], [`Label`])
//! - Proptest generators for keys and entities
//! - Fixtures for seeded stores and configurations
//! - Assertions for positional and validation errors
//! - Test logging setup and log capture

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Mutex, Once};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// Re-export core types for convenience
pub use triad_core::{
    is_not_found, CoordinatorConfig, DatastoreError, Entity, Key, KeyError, KeyId, MultiError,
    TransactionOptions, TriadError, TriadResult, ValidationError,
};
pub use triad_storage::{InMemoryDistributedCache, MemoryDatastore, Operation, StoreLimits};

pub use fixtures::{owned_widget, widget, widget_key, widgets};

// ============================================================================
// TEST ENTITIES
// ============================================================================

/// Numeric-keyed test entity, optionally owned by an `Account`.
///
/// The key lives in `id` and `owner`, which are not serialized; the cached
/// and stored forms carry only the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub owner: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub tags: Vec<String>,
}

impl Widget {
    /// A widget with only its id set, ready to be loaded.
    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

impl Entity for Widget {
    fn key(&self) -> Result<Key, KeyError> {
        let parent = match &self.owner {
            Some(owner) => Some(Key::with_name("Account", owner.clone(), None)?),
            None => None,
        };
        if self.id == 0 {
            Key::incomplete("Widget", parent)
        } else {
            Key::with_id("Widget", self.id, parent)
        }
    }

    fn set_key(&mut self, key: &Key) {
        self.id = key.int_id().unwrap_or_default();
        self.owner = key
            .parent()
            .and_then(Key::name)
            .map(str::to_string);
    }
}

/// Name-keyed test entity. An empty name cannot produce a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(skip)]
    pub name: String,
    pub text: String,
}

impl Entity for Label {
    fn key(&self) -> Result<Key, KeyError> {
        Key::with_name("Label", self.name.clone(), None)
    }

    fn set_key(&mut self, key: &Key) {
        self.name = key.name().unwrap_or_default().to_string();
    }
}

// ============================================================================
// LOGGING
// ============================================================================

static LOGGING: Once = Once::new();

/// Install a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG`, defaulting to `triad_coordinator=debug`.
/// Safe to call from every test.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("triad_coordinator=debug,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}

/// Log output recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let result = {
        let _guard = subscriber.set_default();
        f()
    };
    (result, logs)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and test entities.

    use super::*;
    use proptest::prelude::*;

    /// Generate an entity kind, including characters the key encoding
    /// must escape.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Widget".to_string()),
            Just("Account".to_string()),
            "[A-Za-z][A-Za-z0-9_:/%]{0,11}",
        ]
    }

    /// Generate an assigned key id.
    pub fn arb_key_id() -> impl Strategy<Value = KeyId> {
        prop_oneof![
            (1i64..i64::MAX).prop_map(KeyId::Int),
            (i64::MIN..0i64).prop_map(KeyId::Int),
            "[a-z0-9 :/%é]{1,16}".prop_map(KeyId::Name),
        ]
    }

    /// Generate a complete key with up to three ancestors.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        prop::collection::vec((arb_kind(), arb_key_id()), 1..=4).prop_filter_map(
            "every segment must form a valid key",
            |segments| {
                let mut key: Option<Key> = None;
                for (kind, id) in segments {
                    key = Some(Key::new(kind, id, key).ok()?);
                }
                key
            },
        )
    }

    /// Generate a key that may be incomplete in its last segment.
    pub fn arb_maybe_incomplete_key() -> impl Strategy<Value = Key> {
        (arb_key(), any::<bool>()).prop_filter_map(
            "parent of an incomplete key must be valid",
            |(key, incomplete)| {
                if !incomplete {
                    return Some(key);
                }
                let parent = key.parent().cloned();
                Key::incomplete(key.kind().to_string(), parent).ok()
            },
        )
    }

    /// Generate a widget with a stored id.
    pub fn arb_widget() -> impl Strategy<Value = Widget> {
        (
            1i64..1_000_000,
            proptest::option::of("[a-z]{1,8}"),
            "[a-zA-Z0-9 ]{0,24}",
            any::<u32>(),
            prop::collection::vec("[a-z]{1,6}", 0..4),
        )
            .prop_map(|(id, owner, name, quantity, tags)| Widget {
                id,
                owner,
                name,
                quantity,
                tags,
            })
    }

    /// Generate between `min` and `max` widgets with distinct ids.
    pub fn arb_widgets(min: usize, max: usize) -> impl Strategy<Value = Vec<Widget>> {
        prop::collection::btree_map(1i64..1_000_000, "[a-z]{1,8}", min..=max).prop_map(|named| {
            named
                .into_iter()
                .map(|(id, name)| widget(id, &name))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// A top-level widget. Pass `id == 0` for one the datastore will number.
    pub fn widget(id: i64, name: &str) -> Widget {
        Widget {
            id,
            owner: None,
            name: name.to_string(),
            quantity: 1,
            tags: Vec::new(),
        }
    }

    /// A widget in the entity group of `owner`.
    pub fn owned_widget(owner: &str, id: i64, name: &str) -> Widget {
        Widget {
            owner: Some(owner.to_string()),
            ..widget(id, name)
        }
    }

    /// Key of the top-level widget `id`.
    pub fn widget_key(id: i64) -> Key {
        Key::new("Widget", KeyId::Int(id), None).unwrap_or_else(|e| panic!("widget key {}: {}", id, e))
    }

    /// Widgets with ids `1..=count`.
    pub fn widgets(count: usize) -> Vec<Widget> {
        (1..=count as i64)
            .map(|id| widget(id, &format!("widget-{}", id)))
            .collect()
    }

    /// Widgets with no id, numbered by the datastore on first put.
    pub fn new_widgets(count: usize) -> Vec<Widget> {
        (0..count).map(|n| widget(0, &format!("new-{}", n))).collect()
    }

    /// A label with a unique name.
    pub fn unique_label(text: &str) -> Label {
        Label {
            name: format!("label-{}", uuid::Uuid::now_v7()),
            text: text.to_string(),
        }
    }

    /// A datastore holding `entities`, written directly.
    pub fn seeded_store<E: Entity>(entities: &[E]) -> MemoryDatastore {
        let store = MemoryDatastore::new();
        seed(&store, entities);
        store
    }

    /// Write `entities` straight to `store`, respecting its put limit, then
    /// forget the recorded calls.
    pub fn seed<E: Entity>(store: &MemoryDatastore, entities: &[E]) {
        use triad_storage::Datastore;

        let limit = store.limits().put;
        for chunk in entities.chunks(limit.max(1)) {
            let keys: Vec<Key> = chunk
                .iter()
                .map(|entity| entity.key().unwrap_or_else(|e| panic!("fixture key: {}", e)))
                .collect();
            if let Err(e) = store.put_multi(&keys, chunk) {
                panic!("seeding failed: {}", e);
            }
        }
        store.clear_calls();
    }

    /// Default configuration with quiet logging.
    pub fn quiet_config() -> CoordinatorConfig {
        CoordinatorConfig::default().with_log_errors(false)
    }

    /// Configuration with small batch limits, so chunking is visible with
    /// few entities.
    pub fn small_batch_config(get: usize, put: usize, delete: usize) -> CoordinatorConfig {
        CoordinatorConfig::default().with_batch_limits(get, put, delete)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Triad-specific error shapes.

    use super::*;

    /// Assert that a TriadResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TriadResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that slot `index` of a positional error is "not found".
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TriadResult<T>, index: usize) {
        match result {
            Err(err) => assert!(
                is_not_found(err, index),
                "Expected slot {} to be not found, got: {:?}",
                index,
                err
            ),
            Ok(value) => panic!("Expected a positional error, got Ok({:?})", value),
        }
    }

    /// Assert that the result is a positional error whose failed slots are
    /// exactly `missing`, each one "not found".
    #[track_caller]
    pub fn assert_missing_slots<T: std::fmt::Debug>(
        result: &TriadResult<T>,
        len: usize,
        missing: &[usize],
    ) {
        let multi = match result {
            Err(TriadError::Multi(multi)) => multi,
            other => panic!("Expected Multi error, got: {:?}", other),
        };
        assert_eq!(multi.len(), len, "Multi error has the wrong length");
        for index in 0..len {
            if missing.contains(&index) {
                assert!(
                    multi.is_not_found(index),
                    "Expected slot {} to be not found, got: {:?}",
                    index,
                    multi.get(index)
                );
            } else {
                assert!(
                    multi.get(index).is_none(),
                    "Expected slot {} to succeed, got: {:?}",
                    index,
                    multi.get(index)
                );
            }
        }
    }

    /// Assert that a TriadResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TriadResult<T>) {
        match result {
            Err(TriadError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a TriadResult is an incomplete-key error at `index`.
    #[track_caller]
    pub fn assert_incomplete_key<T: std::fmt::Debug>(result: &TriadResult<T>, index: usize) {
        match result {
            Err(TriadError::IncompleteKey { index: at, .. }) => {
                assert_eq!(*at, index, "Wrong index in IncompleteKey error");
            }
            other => panic!("Expected IncompleteKey error, got: {:?}", other),
        }
    }

    /// Assert that a TriadResult is a total datastore failure.
    #[track_caller]
    pub fn assert_datastore_error<T: std::fmt::Debug>(result: &TriadResult<T>) {
        match result {
            Err(TriadError::Datastore(_)) => {}
            other => panic!("Expected Datastore error, got: {:?}", other),
        }
    }

    /// Assert that two widgets carry the same key and payload.
    #[track_caller]
    pub fn assert_same_widget(actual: &Widget, expected: &Widget) {
        assert_eq!(actual, expected, "Widget mismatch");
    }
}
