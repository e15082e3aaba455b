//! Facades - Typed Views over Providers
//!
//! `TigerStyle`: A facade owns nothing but a provider handle and a
//! converter. Native closures are wrapped into record factories; results
//! come back as [`Stored`] so callers see the accepted version.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::convert::RecordConverter;
use crate::provider::{HistoricalStorageProvider, PartitionedStorageProvider, StorageProvider};
use crate::storage::{Audit, KeyRecord, StorageResult, ValueRecord};

/// Lazy enumeration of native keys.
pub type TypedKeyStream<K> = BoxStream<'static, StorageResult<K>>;

/// A decoded value with its audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<V> {
    /// The decoded value
    pub value: V,
    /// Who wrote it, when, and at which version
    pub audit: Audit,
}

impl<V> Stored<V> {
    /// Accepted version (partition index for partitioned storage).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.audit.version
    }

    /// Drop the audit.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }
}

// =============================================================================
// Shared conversion
// =============================================================================

struct Binding<K, V> {
    converter: Arc<RecordConverter<K, V>>,
}

impl<K, V> Clone for Binding<K, V> {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<K, V> Binding<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn stored(&self, record: ValueRecord) -> StorageResult<Stored<V>> {
        let value = self.converter.value(&record)?;
        Ok(Stored {
            value,
            audit: record.audit,
        })
    }

    fn stored_opt(&self, record: Option<ValueRecord>) -> StorageResult<Option<Stored<V>>> {
        record.map(|r| self.stored(r)).transpose()
    }

    fn adder<'a, F>(
        &'a self,
        key: &'a K,
        add: &'a F,
    ) -> impl Fn(&KeyRecord) -> StorageResult<ValueRecord> + Send + Sync + 'a
    where
        F: Fn(&K) -> V + Send + Sync,
    {
        move |_: &KeyRecord| self.converter.value_record(&add(key))
    }

    fn updater<'a, F>(
        &'a self,
        key: &'a K,
        update: &'a F,
    ) -> impl Fn(&KeyRecord, &ValueRecord) -> StorageResult<ValueRecord> + Send + Sync + 'a
    where
        F: Fn(&K, &V) -> V + Send + Sync,
    {
        move |_: &KeyRecord, current: &ValueRecord| {
            let current = self.converter.value(current)?;
            self.converter.value_record(&update(key, &current))
        }
    }

    fn keys(&self, records: crate::provider::KeyStream) -> TypedKeyStream<K> {
        let converter = Arc::clone(&self.converter);
        records
            .map(move |record| record.and_then(|record| converter.key(&record)))
            .boxed()
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Latest-value storage for native keys and values.
pub struct Storage<K, V> {
    provider: Arc<dyn StorageProvider>,
    binding: Binding<K, V>,
}

impl<K, V> Clone for Storage<K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            binding: self.binding.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Storage<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("converter", &self.binding.converter)
            .finish_non_exhaustive()
    }
}

impl<K, V> Storage<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Bind `provider` to a key/value type pair.
    #[must_use]
    pub fn new(provider: Arc<dyn StorageProvider>, converter: Arc<RecordConverter<K, V>>) -> Self {
        Self {
            provider,
            binding: Binding { converter },
        }
    }

    /// Logical value type name records are stored under.
    #[must_use]
    pub fn value_type(&self) -> &str {
        self.binding.converter.value_type()
    }

    /// Return the stored value, or store `add(key)` at version 1.
    ///
    /// # Errors
    /// Conversion, backend, conflict and cancellation failures.
    pub async fn add_or_get<F>(
        &self,
        key: &K,
        add: F,
        cancel: &CancellationToken,
    ) -> StorageResult<Stored<V>>
    where
        F: Fn(&K) -> V + Send + Sync,
    {
        let record = self.binding.converter.key_record(key)?;
        let add = self.binding.adder(key, &add);
        let stored = self.provider.add_or_get(&record, &add, cancel).await?;
        self.binding.stored(stored)
    }

    /// Store `add(key)` when absent, otherwise `update(key, current)`.
    ///
    /// # Errors
    /// Conversion, backend, conflict and cancellation failures.
    pub async fn add_or_update<A, U>(
        &self,
        key: &K,
        add: A,
        update: U,
        cancel: &CancellationToken,
    ) -> StorageResult<Stored<V>>
    where
        A: Fn(&K) -> V + Send + Sync,
        U: Fn(&K, &V) -> V + Send + Sync,
    {
        let record = self.binding.converter.key_record(key)?;
        let add = self.binding.adder(key, &add);
        let update = self.binding.updater(key, &update);
        let stored = self
            .provider
            .add_or_update(&record, &add, &update, cancel)
            .await?;
        self.binding.stored(stored)
    }

    /// Current value, if any.
    ///
    /// # Errors
    /// Conversion, backend and cancellation failures.
    pub async fn try_get(
        &self,
        key: &K,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let stored = self.provider.try_get(&record, cancel).await?;
        self.binding.stored_opt(stored)
    }

    /// Delete and return the current value.
    ///
    /// # Errors
    /// Conversion, backend and cancellation failures.
    pub async fn try_remove(
        &self,
        key: &K,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let removed = self.provider.try_remove(&record, cancel).await?;
        self.binding.stored_opt(removed)
    }

    /// Every stored key of this value type.
    #[must_use]
    pub fn keys(&self) -> TypedKeyStream<K> {
        self.binding.keys(self.provider.get_keys(self.value_type()))
    }
}

// =============================================================================
// HistoricalStorage
// =============================================================================

/// Version-retaining storage for native keys and values.
pub struct HistoricalStorage<K, V> {
    provider: Arc<dyn HistoricalStorageProvider>,
    binding: Binding<K, V>,
}

impl<K, V> Clone for HistoricalStorage<K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            binding: self.binding.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for HistoricalStorage<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalStorage")
            .field("converter", &self.binding.converter)
            .finish_non_exhaustive()
    }
}

impl<K, V> HistoricalStorage<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Bind `provider` to a key/value type pair.
    #[must_use]
    pub fn new(
        provider: Arc<dyn HistoricalStorageProvider>,
        converter: Arc<RecordConverter<K, V>>,
    ) -> Self {
        Self {
            provider,
            binding: Binding { converter },
        }
    }

    /// Logical value type name records are stored under.
    #[must_use]
    pub fn value_type(&self) -> &str {
        self.binding.converter.value_type()
    }

    /// Return the latest version, or append `add(key)` as version 1.
    ///
    /// # Errors
    /// Conversion, backend, conflict and cancellation failures.
    pub async fn add_or_get<F>(
        &self,
        key: &K,
        add: F,
        cancel: &CancellationToken,
    ) -> StorageResult<Stored<V>>
    where
        F: Fn(&K) -> V + Send + Sync,
    {
        let record = self.binding.converter.key_record(key)?;
        let add = self.binding.adder(key, &add);
        let stored = self.provider.add_or_get(&record, &add, cancel).await?;
        self.binding.stored(stored)
    }

    /// Append `add(key)` when empty, otherwise `update(key, latest)`.
    ///
    /// # Errors
    /// Conversion, backend, conflict and cancellation failures.
    pub async fn add_or_update<A, U>(
        &self,
        key: &K,
        add: A,
        update: U,
        cancel: &CancellationToken,
    ) -> StorageResult<Stored<V>>
    where
        A: Fn(&K) -> V + Send + Sync,
        U: Fn(&K, &V) -> V + Send + Sync,
    {
        let record = self.binding.converter.key_record(key)?;
        let add = self.binding.adder(key, &add);
        let update = self.binding.updater(key, &update);
        let stored = self
            .provider
            .add_or_update(&record, &add, &update, cancel)
            .await?;
        self.binding.stored(stored)
    }

    /// Latest version, if any.
    ///
    /// # Errors
    /// Conversion, backend and cancellation failures.
    pub async fn try_get(
        &self,
        key: &K,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let stored = self.provider.try_get(&record, cancel).await?;
        self.binding.stored_opt(stored)
    }

    /// One exact version.
    ///
    /// # Errors
    /// `InvalidArgument` when `version == 0`; conversion, backend and
    /// cancellation failures.
    pub async fn try_get_version(
        &self,
        key: &K,
        version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let stored = self.provider.try_get_version(&record, version, cancel).await?;
        self.binding.stored_opt(stored)
    }

    /// Delete every version through the latest and return the latest.
    ///
    /// # Errors
    /// Conversion, backend and cancellation failures.
    pub async fn try_remove(
        &self,
        key: &K,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let removed = self.provider.try_remove(&record, cancel).await?;
        self.binding.stored_opt(removed)
    }

    /// Delete every version `<= up_to_version`, returning how many.
    ///
    /// # Errors
    /// `InvalidArgument` when `up_to_version == 0`; conversion, backend and
    /// cancellation failures.
    pub async fn try_remove_through(
        &self,
        key: &K,
        up_to_version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        let record = self.binding.converter.key_record(key)?;
        self.provider
            .try_remove_through(&record, up_to_version, cancel)
            .await
    }

    /// Keys with at least one remaining version.
    #[must_use]
    pub fn keys(&self) -> TypedKeyStream<K> {
        self.binding.keys(self.provider.get_keys(self.value_type()))
    }
}

// =============================================================================
// PartitionedStorage
// =============================================================================

/// Append-only indexed log per native key.
pub struct PartitionedStorage<K, V> {
    provider: Arc<dyn PartitionedStorageProvider>,
    binding: Binding<K, V>,
}

impl<K, V> Clone for PartitionedStorage<K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            binding: self.binding.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for PartitionedStorage<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedStorage")
            .field("converter", &self.binding.converter)
            .finish_non_exhaustive()
    }
}

impl<K, V> PartitionedStorage<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Bind `provider` to a key/value type pair.
    #[must_use]
    pub fn new(
        provider: Arc<dyn PartitionedStorageProvider>,
        converter: Arc<RecordConverter<K, V>>,
    ) -> Self {
        Self {
            provider,
            binding: Binding { converter },
        }
    }

    /// Logical value type name records are stored under.
    #[must_use]
    pub fn value_type(&self) -> &str {
        self.binding.converter.value_type()
    }

    /// Append `entry(key)`; the returned version is its index.
    ///
    /// # Errors
    /// Conversion, backend, conflict and cancellation failures.
    pub async fn add<F>(
        &self,
        key: &K,
        entry: F,
        cancel: &CancellationToken,
    ) -> StorageResult<Stored<V>>
    where
        F: Fn(&K) -> V + Send + Sync,
    {
        let record = self.binding.converter.key_record(key)?;
        let entry = self.binding.adder(key, &entry);
        let stored = self.provider.add(&record, &entry, cancel).await?;
        self.binding.stored(stored)
    }

    /// Entry at `index`.
    ///
    /// # Errors
    /// `InvalidArgument` when `index == 0`; conversion, backend and
    /// cancellation failures.
    pub async fn try_get(
        &self,
        key: &K,
        index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let stored = self.provider.try_get(&record, index, cancel).await?;
        self.binding.stored_opt(stored)
    }

    /// Most recent entry.
    ///
    /// # Errors
    /// Conversion, backend and cancellation failures.
    pub async fn try_get_latest(
        &self,
        key: &K,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<Stored<V>>> {
        let record = self.binding.converter.key_record(key)?;
        let stored = self.provider.try_get_latest(&record, cancel).await?;
        self.binding.stored_opt(stored)
    }

    /// Delete entries with index `<= up_to_index`, returning how many.
    ///
    /// # Errors
    /// `InvalidArgument` when `up_to_index == 0`; conversion, backend and
    /// cancellation failures.
    pub async fn try_remove(
        &self,
        key: &K,
        up_to_index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        let record = self.binding.converter.key_record(key)?;
        self.provider.try_remove(&record, up_to_index, cancel).await
    }

    /// Keys with at least one entry.
    #[must_use]
    pub fn keys(&self) -> TypedKeyStream<K> {
        self.binding.keys(self.provider.get_keys(self.value_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{HistoricalEngine, PartitionLog, WriteCycle};
    use crate::retry::ConstantRetry;
    use crate::storage::{LocalHistoricalStore, LocalStorageProvider};
    use futures::TryStreamExt;
    use std::time::Duration;

    fn converter() -> Arc<RecordConverter<String, Vec<String>>> {
        Arc::new(RecordConverter::new().with_value_type("Cart"))
    }

    fn historical() -> Arc<HistoricalEngine> {
        let cycle = WriteCycle::new(Arc::new(ConstantRetry::new(3, Duration::ZERO)));
        Arc::new(HistoricalEngine::new(Arc::new(LocalHistoricalStore::new()), cycle))
    }

    #[tokio::test]
    async fn test_storage_add_or_update_decodes() {
        let storage = Storage::new(Arc::new(LocalStorageProvider::new()), converter());
        let cancel = CancellationToken::new();
        let cart = "alice".to_string();

        let first = storage
            .add_or_update(&cart, |_| vec!["apple".into()], |_, items| items.clone(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.version(), 1);

        let second = storage
            .add_or_update(
                &cart,
                |_| Vec::new(),
                |_, items| {
                    let mut items = items.clone();
                    items.push("pear".into());
                    items
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(second.version(), 2);
        assert_eq!(second.value, vec!["apple", "pear"]);
        assert_eq!(second.audit.created, first.audit.created);

        let keys: Vec<String> = storage.keys().try_collect().await.unwrap();
        assert_eq!(keys, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_historical_versions_decode() {
        let storage = HistoricalStorage::new(historical(), converter());
        let cancel = CancellationToken::new();
        let cart = "bob".to_string();

        for n in 1..=3usize {
            storage
                .add_or_update(&cart, |_| vec!["x".into()], move |_, _| vec!["x".into(); n], &cancel)
                .await
                .unwrap();
        }

        let second = storage.try_get_version(&cart, 2, &cancel).await.unwrap().unwrap();
        assert_eq!(second.value.len(), 2);
        assert_eq!(storage.try_remove_through(&cart, 2, &cancel).await.unwrap(), 2);
        assert_eq!(storage.try_get(&cart, &cancel).await.unwrap().unwrap().version(), 3);
    }

    #[tokio::test]
    async fn test_partitioned_indexes() {
        let log = PartitionedStorage::new(Arc::new(PartitionLog::new(historical())), converter());
        let cancel = CancellationToken::new();
        let stream = "events".to_string();

        for n in 1..=4u64 {
            let appended = log
                .add(&stream, move |_| vec![format!("event-{n}")], &cancel)
                .await
                .unwrap();
            assert_eq!(appended.version(), n);
        }

        let third = log.try_get(&stream, 3, &cancel).await.unwrap().unwrap();
        assert_eq!(third.value, vec!["event-3"]);
        assert_eq!(log.try_get_latest(&stream, &cancel).await.unwrap().unwrap().version(), 4);
        assert_eq!(log.try_remove(&stream, 2, &cancel).await.unwrap(), 2);
        assert!(log.try_get(&stream, 1, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_reads_empty() {
        let storage = Storage::new(Arc::new(LocalStorageProvider::new()), converter());
        let cancel = CancellationToken::new();
        assert!(storage.try_get(&"nobody".to_string(), &cancel).await.unwrap().is_none());
        assert!(storage.try_remove(&"nobody".to_string(), &cancel).await.unwrap().is_none());
    }
}
