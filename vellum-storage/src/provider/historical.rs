//! HistoricalEngine - Version-Chain Provider over a `HistoricalStore`
//!
//! `TigerStyle`: Each accepted write appends a new version at
//! `latest + 1`; the backend's insert-if-absent on (identity, version) is
//! the only conflict signal. Trimming removes a prefix of the chain.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use vellum_core::constants::KEY_PAGE_SIZE_COUNT_DEFAULT;

use super::cycle::{Mutation, Target, WriteCycle};
use super::{
    ensure_active, guarded, paged_keys, require_positive, AddFactory, HistoricalStorageProvider,
    KeyStream, UpdateFactory,
};
use crate::storage::{HistoricalStore, KeyRecord, RemoveOutcome, StorageResult, ValueRecord};

/// [`HistoricalStorageProvider`] driving the optimistic write cycle
/// against a [`HistoricalStore`].
#[derive(Clone)]
pub struct HistoricalEngine {
    store: Arc<dyn HistoricalStore>,
    cycle: WriteCycle,
    page_size: usize,
}

impl HistoricalEngine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn HistoricalStore>, cycle: WriteCycle) -> Self {
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

impl std::fmt::Debug for HistoricalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalEngine")
            .field("cycle", &self.cycle)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HistoricalStorageProvider for HistoricalEngine {
    #[tracing::instrument(skip(self, key, add, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn add_or_get(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        self.cycle
            .run(
                "historical.add_or_get",
                Target::Historical(self.store.as_ref()),
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
                "historical.add_or_update",
                Target::Historical(self.store.as_ref()),
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
        ensure_active(cancel, "historical.try_get")?;
        guarded(cancel, "historical.try_get", self.store.read_latest(key)).await
    }

    async fn try_get_version(
        &self,
        key: &KeyRecord,
        version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        require_positive(version, "version")?;
        ensure_active(cancel, "historical.try_get_version")?;
        guarded(
            cancel,
            "historical.try_get_version",
            self.store.read_version(key, version),
        )
        .await
    }

    #[tracing::instrument(skip(self, key, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn try_remove(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        const OPERATION: &str = "historical.try_remove";

        let store = self.store.as_ref();

        self.cycle
            .remove(OPERATION, key, cancel, move || {
                remove_latest(store, key, cancel, OPERATION).boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self, key, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn try_remove_through(
        &self,
        key: &KeyRecord,
        up_to_version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        require_positive(up_to_version, "up_to_version")?;
        let store = self.store.as_ref();

        let removed = self
            .cycle
            .remove("historical.try_remove_through", key, cancel, move || {
                store.remove_through(key, up_to_version)
            })
            .await?;
        tracing::debug!(removed, "historical versions removed");
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

/// Observe the latest version and trim through it.
///
/// Versions appended after the observation survive the trim.
async fn remove_latest(
    store: &dyn HistoricalStore,
    key: &KeyRecord,
    cancel: &CancellationToken,
    operation: &str,
) -> StorageResult<RemoveOutcome<Option<ValueRecord>>> {
    let Some(latest) = guarded(cancel, operation, store.read_latest(key)).await? else {
        return Ok(RemoveOutcome::Removed(None));
    };

    Ok(match store.remove_through(key, latest.version()).await? {
        RemoveOutcome::Removed(removed) => {
            tracing::debug!(through = latest.version(), removed, "historical versions removed");
            RemoveOutcome::Removed(Some(latest))
        }
        RemoveOutcome::Conflict => RemoveOutcome::Conflict,
    })
}
