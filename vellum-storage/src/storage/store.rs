//! Store Primitives
//!
//! `TigerStyle`: Backends expose conditional writes that report
//! [`WriteOutcome::Conflict`] instead of failing when they lose a race.
//! The write cycle in [`crate::provider`] turns these primitives into the
//! provider contracts.

use async_trait::async_trait;

#[cfg(any(feature = "surreal", feature = "postgres"))]
use super::error::StorageError;
use super::error::StorageResult;
use super::record::{KeyRecord, ValueRecord};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied
    Committed,
    /// Another writer got there first; nothing was written
    Conflict,
}

/// Result of a conditional delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome<T> {
    /// The delete was applied; carries what it removed
    Removed(T),
    /// A concurrent writer interfered; nothing was deleted
    Conflict,
}

/// Latest-value primitives: at most one value per key identity.
#[async_trait]
pub trait PlainStore: Send + Sync {
    /// Read the current value.
    async fn read(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>>;

    /// Insert the first value; `Conflict` if one already exists.
    async fn insert(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome>;

    /// Replace the value whose version is `expected_version`; `Conflict` if
    /// the stored version differs or the value is gone.
    async fn replace(
        &self,
        key: &KeyRecord,
        expected_version: u64,
        value: &ValueRecord,
    ) -> StorageResult<WriteOutcome>;

    /// Delete the value and its key, returning the deleted value.
    ///
    /// `Conflict` means a concurrent insert or replace interfered and
    /// nothing was deleted.
    async fn remove(&self, key: &KeyRecord)
        -> StorageResult<RemoveOutcome<Option<ValueRecord>>>;

    /// Keys of `value_type` with `id > after`, ordered by id.
    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>>;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Version-chain primitives: one value per (key identity, version).
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    /// Read the highest remaining version.
    async fn read_latest(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>>;

    /// Read one exact version.
    async fn read_version(&self, key: &KeyRecord, version: u64)
        -> StorageResult<Option<ValueRecord>>;

    /// Append `value` at `value.audit.version`; `Conflict` if that version
    /// already exists.
    async fn append(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome>;

    /// Delete every version `<= version`, then collect the key if no version
    /// remains. Returns the number of versions deleted.
    ///
    /// Versions above `version` that commit concurrently must survive. A
    /// trim that cannot guarantee this reports `Conflict` and deletes
    /// nothing.
    async fn remove_through(&self, key: &KeyRecord, version: u64)
        -> StorageResult<RemoveOutcome<u64>>;

    /// Keys of `value_type` with at least one version and `id > after`,
    /// ordered by id.
    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>>;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

// =============================================================================
// Column helpers
// =============================================================================

/// Versions are persisted as signed 64-bit integers by the database backends.
#[cfg(any(feature = "surreal", feature = "postgres"))]
pub(crate) fn version_to_column(version: u64) -> StorageResult<i64> {
    i64::try_from(version)
        .map_err(|_| StorageError::invalid_argument(format!("version {version} out of range")))
}

/// Inverse of [`version_to_column`].
#[cfg(any(feature = "surreal", feature = "postgres"))]
pub(crate) fn version_from_column(version: i64) -> StorageResult<u64> {
    u64::try_from(version)
        .map_err(|_| StorageError::deserialization(format!("stored version {version} is negative")))
}
