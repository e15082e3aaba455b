//! PlainEngine - Latest-Value Provider over a `PlainStore`

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vellum_core::constants::KEY_PAGE_SIZE_COUNT_DEFAULT;

use super::cycle::{Mutation, Target, WriteCycle};
use super::{
    ensure_active, guarded, paged_keys, AddFactory, KeyStream, StorageProvider, UpdateFactory,
};
use crate::storage::{KeyRecord, PlainStore, StorageResult, ValueRecord};

/// [`StorageProvider`] driving the optimistic write cycle against a
/// [`PlainStore`]: conditional insert for the first version,
/// version-qualified replace for every later one.
#[derive(Clone)]
pub struct PlainEngine {
    store: Arc<dyn PlainStore>,
    cycle: WriteCycle,
    page_size: usize,
}

impl PlainEngine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PlainStore>, cycle: WriteCycle) -> Self {
        Self {
            store,
            cycle,
            page_size: KEY_PAGE_SIZE_COUNT_DEFAULT,
        }
    }

    /// Set the key enumeration page size.
    ///
    /// # Panics
    /// Panics if `page_size` is zero.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        assert!(page_size > 0, "page_size must be positive");
        self.page_size = page_size;
        self
    }
}

impl std::fmt::Debug for PlainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainEngine")
            .field("cycle", &self.cycle)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageProvider for PlainEngine {
    #[tracing::instrument(skip(self, key, add, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn add_or_get(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        self.cycle
            .run(
                "add_or_get",
                Target::Plain(self.store.as_ref()),
                key,
                Mutation::GetOrAdd(add),
                cancel,
            )
            .await
    }

    #[tracing::instrument(skip(self, key, add, update, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn add_or_update(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        update: UpdateFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        self.cycle
            .run(
                "add_or_update",
                Target::Plain(self.store.as_ref()),
                key,
                Mutation::AddOrUpdate(add, update),
                cancel,
            )
            .await
    }

    async fn try_get(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        ensure_active(cancel, "try_get")?;
        guarded(cancel, "try_get", self.store.read(key)).await
    }

    #[tracing::instrument(skip(self, key, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn try_remove(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        let store = self.store.as_ref();
        let removed = self
            .cycle
            .remove("try_remove", key, cancel, move || store.remove(key))
            .await?;
        tracing::debug!(removed = removed.is_some(), "plain value removed");
        Ok(removed)
    }

    fn get_keys(&self, value_type: &str) -> KeyStream {
        let store = Arc::clone(&self.store);
        let value_type = value_type.to_string();
        let page_size = self.page_size;

        paged_keys(page_size, move |after| {
            let store = Arc::clone(&store);
            let value_type = value_type.clone();
            async move { store.keys_page(&value_type, after.as_deref(), page_size).await }
        })
    }

    async fn close(&self) -> StorageResult<()> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AttemptOutcome, WriteObserver};
    use crate::retry::ConstantRetry;
    use crate::storage::{Audit, RemoveOutcome, StorageError, WriteOutcome};
    use chrono::Utc;
    use futures::TryStreamExt;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Map-backed store that can be told to lose the next N conditional
    /// writes or deletes, and to stall inside every insert.
    #[derive(Debug, Default)]
    struct ScriptedStore {
        values: Mutex<BTreeMap<String, (KeyRecord, ValueRecord)>>,
        conflicts_left: Mutex<u32>,
        insert_stall: Option<Duration>,
    }

    impl ScriptedStore {
        fn losing(conflicts: u32) -> Self {
            Self {
                conflicts_left: Mutex::new(conflicts),
                ..Self::default()
            }
        }

        fn lose_race(&self) -> bool {
            let mut left = self.conflicts_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl PlainStore for ScriptedStore {
        async fn read(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
            Ok(self.values.lock().unwrap().get(&key.id).map(|(_, v)| v.clone()))
        }

        async fn insert(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
            if let Some(stall) = self.insert_stall {
                tokio::time::sleep(stall).await;
            }
            if self.lose_race() {
                return Ok(WriteOutcome::Conflict);
            }
            let mut values = self.values.lock().unwrap();
            if values.contains_key(&key.id) {
                return Ok(WriteOutcome::Conflict);
            }
            values.insert(key.id.clone(), (key.clone(), value.clone()));
            Ok(WriteOutcome::Committed)
        }

        async fn replace(
            &self,
            key: &KeyRecord,
            expected_version: u64,
            value: &ValueRecord,
        ) -> StorageResult<WriteOutcome> {
            if self.lose_race() {
                return Ok(WriteOutcome::Conflict);
            }
            let mut values = self.values.lock().unwrap();
            match values.get_mut(&key.id) {
                Some((_, current)) if current.version() == expected_version => {
                    *current = value.clone();
                    Ok(WriteOutcome::Committed)
                }
                _ => Ok(WriteOutcome::Conflict),
            }
        }

        async fn remove(
            &self,
            key: &KeyRecord,
        ) -> StorageResult<RemoveOutcome<Option<ValueRecord>>> {
            if self.lose_race() {
                return Ok(RemoveOutcome::Conflict);
            }
            let removed = self.values.lock().unwrap().remove(&key.id).map(|(_, v)| v);
            Ok(RemoveOutcome::Removed(removed))
        }

        async fn keys_page(
            &self,
            value_type: &str,
            after: Option<&str>,
            limit: usize,
        ) -> StorageResult<Vec<KeyRecord>> {
            Ok(self
                .values
                .lock()
                .unwrap()
                .values()
                .map(|(k, _)| k)
                .filter(|k| k.value_type == value_type)
                .filter(|k| after.map_or(true, |a| k.id.as_str() > a))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingObserver {
        outcomes: Mutex<Vec<(u32, AttemptOutcome)>>,
    }

    impl WriteObserver for RecordingObserver {
        fn on_outcome(&self, _op: &str, _key: &KeyRecord, attempt: u32, outcome: AttemptOutcome) {
            self.outcomes.lock().unwrap().push((attempt, outcome));
        }
    }

    fn key(id: &str) -> KeyRecord {
        KeyRecord::new(id, "Key", id.as_bytes().to_vec(), "Counter")
    }

    fn value(content: &[u8]) -> ValueRecord {
        ValueRecord::new("Counter", content.to_vec(), Audit::new(Utc::now()))
    }

    fn engine(store: ScriptedStore, attempts: u32) -> (PlainEngine, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let cycle = WriteCycle::new(Arc::new(ConstantRetry::new(attempts, Duration::ZERO)))
            .with_observer(observer.clone());
        (PlainEngine::new(Arc::new(store), cycle), observer)
    }

    #[tokio::test]
    async fn test_add_or_get_keeps_first_value() {
        let (engine, _) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();
        let k = key("a");

        let first = engine.add_or_get(&k, &|_: &KeyRecord| Ok(value(b"v1")), &cancel).await.unwrap();
        let second = engine.add_or_get(&k, &|_: &KeyRecord| Ok(value(b"v2")), &cancel).await.unwrap();

        assert_eq!(first.version(), 1);
        assert_eq!(second.content, b"v1");
        assert_eq!(second.version(), 1);
    }

    #[tokio::test]
    async fn test_sequential_updates_increment_version() {
        let (engine, _) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();
        let k = key("a");

        for expected in 1..=5u64 {
            let stored = engine
                .add_or_update(
                    &k,
                    &|_: &KeyRecord| Ok(value(b"0")),
                    &|_: &KeyRecord, cur: &ValueRecord| {
                        Ok(value(format!("{}", cur.version() + 1).as_bytes()))
                    },
                    &cancel,
                )
                .await
                .unwrap();
            assert_eq!(stored.version(), expected);
        }
    }

    #[tokio::test]
    async fn test_lost_races_are_retried() {
        let (engine, observer) = engine(ScriptedStore::losing(2), 5);
        let cancel = CancellationToken::new();

        let stored = engine
            .add_or_get(&key("a"), &|_: &KeyRecord| Ok(value(b"v")), &cancel)
            .await
            .unwrap();

        assert_eq!(stored.version(), 1);
        let outcomes = observer.outcomes.lock().unwrap().clone();
        assert_eq!(
            outcomes,
            vec![
                (1, AttemptOutcome::Conflict),
                (2, AttemptOutcome::Conflict),
                (3, AttemptOutcome::Added),
            ]
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let (engine, observer) = engine(ScriptedStore::losing(10), 3);
        let cancel = CancellationToken::new();

        let err = engine
            .add_or_get(&key("a"), &|_: &KeyRecord| Ok(value(b"v")), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::ConcurrencyConflict { attempts: 3, .. }));
        let outcomes = observer.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.last(), Some(&(3, AttemptOutcome::Exhausted)));
    }

    #[tokio::test]
    async fn test_factory_error_writes_nothing() {
        let (engine, observer) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();
        let k = key("a");

        let err = engine
            .add_or_get(&k, &|_: &KeyRecord| Err(StorageError::serialization("bad")), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Serialization { .. }));
        assert!(engine.try_get(&k, &cancel).await.unwrap().is_none());
        assert_eq!(
            observer.outcomes.lock().unwrap().clone(),
            vec![(1, AttemptOutcome::Failed)]
        );
    }

    #[tokio::test]
    async fn test_factory_value_type_must_match_key() {
        let (engine, _) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();

        let err = engine
            .add_or_get(
                &key("a"),
                &|_: &KeyRecord| Ok(ValueRecord::new("Other", vec![], Audit::new(Utc::now()))),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (engine, _) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .add_or_get(&key("a"), &|_: &KeyRecord| Ok(value(b"v")), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let store = ScriptedStore::losing(100);
        let cycle = WriteCycle::new(Arc::new(ConstantRetry::new(100, Duration::from_secs(60))));
        let engine = PlainEngine::new(Arc::new(store), cycle);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = engine
            .add_or_get(&key("a"), &|_: &KeyRecord| Ok(value(b"v")), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled { .. }));
        assert!(engine.try_get(&key("a"), &CancellationToken::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_then_get_and_keys() {
        let (engine, _) = engine(ScriptedStore::default(), 3);
        let cancel = CancellationToken::new();

        for id in ["a", "b", "c"] {
            engine.add_or_get(&key(id), &|_: &KeyRecord| Ok(value(b"v")), &cancel).await.unwrap();
        }
        let removed = engine.try_remove(&key("b"), &cancel).await.unwrap();
        assert!(removed.is_some());
        assert!(engine.try_get(&key("b"), &cancel).await.unwrap().is_none());
        assert!(engine.try_remove(&key("b"), &cancel).await.unwrap().is_none());

        let ids: Vec<String> = engine
            .with_page_size(1)
            .get_keys("Counter")
            .map_ok(|k| k.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_cancel_during_commit_keeps_accepted_write() {
        let store = ScriptedStore {
            insert_stall: Some(Duration::from_millis(100)),
            ..ScriptedStore::default()
        };
        let (engine, observer) = engine(store, 3);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let stored = engine
            .add_or_get(&key("a"), &|_: &KeyRecord| Ok(value(b"v")), &cancel)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(stored.version(), 1);
        let current = engine.try_get(&key("a"), &CancellationToken::new()).await.unwrap();
        assert_eq!(current, Some(stored));
        assert_eq!(
            observer.outcomes.lock().unwrap().clone(),
            vec![(1, AttemptOutcome::Added)]
        );
    }

    fn seeded(conflicts: u32, id: &str) -> ScriptedStore {
        let store = ScriptedStore::losing(conflicts);
        let mut stored = value(b"v");
        stored.audit.version = 1;
        store.values.lock().unwrap().insert(id.to_string(), (key(id), stored));
        store
    }

    #[tokio::test]
    async fn test_lost_remove_races_are_retried() {
        let (engine, observer) = engine(seeded(2, "a"), 5);
        let cancel = CancellationToken::new();

        let removed = engine.try_remove(&key("a"), &cancel).await.unwrap();

        assert_eq!(removed.map(|v| v.content), Some(b"v".to_vec()));
        assert!(engine.try_get(&key("a"), &cancel).await.unwrap().is_none());
        assert_eq!(
            observer.outcomes.lock().unwrap().clone(),
            vec![
                (1, AttemptOutcome::Conflict),
                (2, AttemptOutcome::Conflict),
                (3, AttemptOutcome::Removed),
            ]
        );
    }

    #[tokio::test]
    async fn test_exhausted_remove_keeps_value() {
        let (engine, _) = engine(seeded(10, "a"), 3);
        let cancel = CancellationToken::new();

        let err = engine.try_remove(&key("a"), &cancel).await.unwrap_err();

        assert!(matches!(err, StorageError::ConcurrencyConflict { attempts: 3, .. }));
        assert!(engine.try_get(&key("a"), &cancel).await.unwrap().is_some());
    }
}
