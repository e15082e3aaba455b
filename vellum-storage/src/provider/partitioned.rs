//! PartitionLog - Append-Only Log over Historical Storage
//!
//! An entry's index is its version. Appending is `add_or_update` with both
//! factories producing a fresh entry, so the log inherits the historical
//! engine's conflict handling unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AddFactory, HistoricalStorageProvider, KeyStream, PartitionedStorageProvider};
use crate::storage::{KeyRecord, StorageResult, ValueRecord};

/// [`PartitionedStorageProvider`] expressed through a
/// [`HistoricalStorageProvider`].
#[derive(Clone)]
pub struct PartitionLog {
    inner: Arc<dyn HistoricalStorageProvider>,
}

impl PartitionLog {
    /// Wrap a historical provider.
    #[must_use]
    pub fn new(inner: Arc<dyn HistoricalStorageProvider>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for PartitionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionLog").finish_non_exhaustive()
    }
}

#[async_trait]
impl PartitionedStorageProvider for PartitionLog {
    async fn add(
        &self,
        key: &KeyRecord,
        entry: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        let fresh = |key: &KeyRecord, _previous: &ValueRecord| entry(key);
        self.inner.add_or_update(key, entry, &fresh, cancel).await
    }

    async fn try_get(
        &self,
        key: &KeyRecord,
        index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        self.inner.try_get_version(key, index, cancel).await
    }

    async fn try_get_latest(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        self.inner.try_get(key, cancel).await
    }

    async fn try_remove(
        &self,
        key: &KeyRecord,
        up_to_index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        self.inner.try_remove_through(key, up_to_index, cancel).await
    }

    fn get_keys(&self, value_type: &str) -> KeyStream {
        self.inner.get_keys(value_type)
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
