//! Providers - Plain, Historical and Partitioned Contracts
//!
//! `TigerStyle`: Object-safe async traits, one per storage flavor. Every
//! operation takes a cancellation token; every write either commits whole
//! or not at all.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StorageProvider   HistoricalStorageProvider   Partitioned…  │
//! └──────────────────────────────────────────────────────────────┘
//!         ↑                      ↑                       ↑
//! ┌───────┴───────┐   ┌──────────┴─────────┐   ┌─────────┴──────┐
//! │ PlainEngine   │   │ HistoricalEngine   │   │ PartitionLog   │
//! │ (PlainStore)  │   │ (HistoricalStore)  │   │ (historical)   │
//! └───────────────┘   └────────────────────┘   └────────────────┘
//!         └──────── WriteCycle: Read → Compute → Write → Evaluate ┘
//! ```

mod cycle;
mod historical;
mod observer;
mod partitioned;
mod plain;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::storage::{KeyRecord, StorageError, StorageResult, ValueRecord};

pub use cycle::WriteCycle;
pub use historical::HistoricalEngine;
pub use observer::{AttemptOutcome, TracingObserver, WriteObserver};
pub use partitioned::PartitionLog;
pub use plain::PlainEngine;

/// Produces the first value for a key.
pub type AddFactory<'a> = &'a (dyn Fn(&KeyRecord) -> StorageResult<ValueRecord> + Send + Sync);

/// Produces the replacement for the current value of a key.
pub type UpdateFactory<'a> =
    &'a (dyn Fn(&KeyRecord, &ValueRecord) -> StorageResult<ValueRecord> + Send + Sync);

/// Lazy enumeration of stored keys.
pub type KeyStream = BoxStream<'static, StorageResult<KeyRecord>>;

// =============================================================================
// Contracts
// =============================================================================

/// Latest-value storage with optimistic concurrency.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Return the stored value, or add one from `add` at version 1.
    ///
    /// Exactly one concurrent adder wins; the others observe its value.
    async fn add_or_get(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord>;

    /// Add from `add` at version 1, or replace the current value with
    /// `update(key, current)` at `current.version + 1`.
    async fn add_or_update(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        update: UpdateFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord>;

    /// Current value, if any.
    async fn try_get(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Delete the value and return what was deleted.
    async fn try_remove(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Every key presently stored for `value_type`.
    fn get_keys(&self, value_type: &str) -> KeyStream;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Storage that keeps every version of a value.
#[async_trait]
pub trait HistoricalStorageProvider: Send + Sync {
    /// Return the latest version, or add version 1 from `add`.
    async fn add_or_get(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord>;

    /// Append version 1 from `add`, or append `update(key, latest)` as the
    /// next version.
    async fn add_or_update(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        update: UpdateFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord>;

    /// Highest remaining version.
    async fn try_get(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// One exact version; `version == 0` is an invalid argument.
    async fn try_get_version(
        &self,
        key: &KeyRecord,
        version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Delete every version up to the latest observed at call time and
    /// return that latest record. Versions appended afterwards survive.
    async fn try_remove(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Delete every version `<= up_to_version` and return how many were
    /// deleted; `up_to_version == 0` is an invalid argument.
    async fn try_remove_through(
        &self,
        key: &KeyRecord,
        up_to_version: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64>;

    /// Keys of `value_type` with at least one remaining version.
    fn get_keys(&self, value_type: &str) -> KeyStream;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Append-only indexed log per key. The index of an entry is its version.
#[async_trait]
pub trait PartitionedStorageProvider: Send + Sync {
    /// Append a new entry produced by `entry` and return it.
    async fn add(
        &self,
        key: &KeyRecord,
        entry: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord>;

    /// Entry at `index`; `index == 0` is an invalid argument.
    async fn try_get(
        &self,
        key: &KeyRecord,
        index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Most recent entry.
    async fn try_get_latest(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>>;

    /// Delete entries with index `<= up_to_index`, returning the count.
    async fn try_remove(
        &self,
        key: &KeyRecord,
        up_to_index: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<u64>;

    /// Keys of `value_type` with at least one entry.
    fn get_keys(&self, value_type: &str) -> KeyStream;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Fail fast when the caller has already cancelled.
pub(crate) fn ensure_active(cancel: &CancellationToken, operation: &str) -> StorageResult<()> {
    if cancel.is_cancelled() {
        Err(StorageError::cancelled(operation))
    } else {
        Ok(())
    }
}

/// Race a backend read against cancellation.
///
/// Writes and deletes never go through here; once started they finish.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    call: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StorageError::cancelled(operation)),
        result = call => result,
    }
}

/// Reject version and index arguments below 1.
pub(crate) fn require_positive(value: u64, what: &str) -> StorageResult<()> {
    if value == 0 {
        Err(StorageError::invalid_argument(format!("{what} must be >= 1")))
    } else {
        Ok(())
    }
}

enum PageCursor {
    Start,
    After(String),
    Done,
}

/// Keyset-paged key enumeration: `fetch(after)` returns the next page
/// ordered by id. A short page ends the stream.
pub(crate) fn paged_keys<F, Fut>(page_size: usize, fetch: F) -> KeyStream
where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StorageResult<Vec<KeyRecord>>> + Send + 'static,
{
    assert!(page_size > 0, "page_size must be positive");

    let fetch = Arc::new(fetch);
    stream::try_unfold(PageCursor::Start, move |cursor| {
        let fetch = Arc::clone(&fetch);
        async move {
            let after = match cursor {
                PageCursor::Done => return Ok::<_, StorageError>(None),
                PageCursor::Start => None,
                PageCursor::After(id) => Some(id),
            };

            let page = fetch(after).await?;
            let next = match page.last() {
                Some(last) if page.len() >= page_size => PageCursor::After(last.id.clone()),
                _ => PageCursor::Done,
            };

            let items = stream::iter(page.into_iter().map(Ok::<KeyRecord, StorageError>));
            Ok::<_, StorageError>(Some((items, next)))
        }
    })
    .try_flatten()
    .boxed()
}
