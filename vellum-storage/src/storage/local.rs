//! Local Backend - In-Process Concurrent Maps
//!
//! `TigerStyle`: Deterministic testing with fault injection, no I/O.
//!
//! # Plain
//!
//! One `DashMap` entry per key identity. Get-or-add and compute-and-replace
//! run under the entry's shard lock, so no retry loop is needed.
//!
//! # Historical
//!
//! One `BTreeMap<version, record>` per key identity. Appends are
//! insert-if-absent at the next version and run inside the shared write
//! cycle, bounded by its retry strategy.
//!
//! # Faults
//!
//! Operations are named `plain.*` / `historical.*`. A `StorageConflict`
//! fault makes `historical.append` or `historical.remove_through` report a
//! lost race without touching state; every other fault fails the
//! operation with `SimulatedFault`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use vellum_core::dst::{FaultInjector, FaultType};

use super::error::{StorageError, StorageResult};
use super::record::{KeyIdentity, KeyRecord, ValueRecord};
use super::store::{HistoricalStore, RemoveOutcome, WriteOutcome};
use crate::provider::{
    ensure_active, AddFactory, KeyStream, StorageProvider, UpdateFactory,
};

// =============================================================================
// Fault hooks
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Faults {
    injector: Option<Arc<FaultInjector>>,
}

impl Faults {
    fn roll(&self, operation: &str) -> Option<FaultType> {
        self.injector
            .as_ref()
            .and_then(|injector| injector.should_inject(operation))
    }

    /// Fail the operation if any fault fires.
    fn check(&self, operation: &str) -> StorageResult<()> {
        match self.roll(operation) {
            Some(fault) => Err(fault_error(fault, operation)),
            None => Ok(()),
        }
    }
}

fn fault_error(fault: FaultType, operation: &str) -> StorageError {
    StorageError::simulated_fault(format!("{} during {operation}", fault.as_str()))
}

// =============================================================================
// LocalStorageProvider (plain)
// =============================================================================

#[derive(Debug, Clone)]
struct PlainEntry {
    key: KeyRecord,
    value: ValueRecord,
}

/// Latest-value storage over a concurrent map.
///
/// The `add` and `update` factories run while the key's shard lock is
/// held. They must be cheap and must not call back into this provider:
/// a re-entrant call on a key in the same shard deadlocks, and a slow
/// factory stalls every other key in that shard.
#[derive(Debug, Clone, Default)]
pub struct LocalStorageProvider {
    entries: Arc<DashMap<KeyIdentity, PlainEntry>>,
    faults: Faults,
}

impl LocalStorageProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty provider with fault injection.
    #[must_use]
    pub fn with_fault_injector(injector: Arc<FaultInjector>) -> Self {
        Self {
            entries: Arc::default(),
            faults: Faults {
                injector: Some(injector),
            },
        }
    }

    /// Number of stored values across all value types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    #[tracing::instrument(skip(self, key, add, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn add_or_get(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        ensure_active(cancel, "plain.add_or_get")?;
        self.faults.check("plain.write")?;

        match self.entries.entry(key.identity()) {
            Entry::Occupied(occupied) => Ok(occupied.get().value.clone()),
            Entry::Vacant(vacant) => {
                let value = add(key)?.checked_for(key)?.into_first();
                vacant.insert(PlainEntry {
                    key: key.clone(),
                    value: value.clone(),
                });
                Ok(value)
            }
        }
    }

    #[tracing::instrument(skip(self, key, add, update, cancel), fields(key_id = %key.id, value_type = %key.value_type))]
    async fn add_or_update(
        &self,
        key: &KeyRecord,
        add: AddFactory<'_>,
        update: UpdateFactory<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        ensure_active(cancel, "plain.add_or_update")?;
        self.faults.check("plain.write")?;

        match self.entries.entry(key.identity()) {
            Entry::Occupied(mut occupied) => {
                let current = &occupied.get().value;
                let value = update(key, current)?.checked_for(key)?.into_successor(current);
                occupied.get_mut().value = value.clone();
                Ok(value)
            }
            Entry::Vacant(vacant) => {
                let value = add(key)?.checked_for(key)?.into_first();
                vacant.insert(PlainEntry {
                    key: key.clone(),
                    value: value.clone(),
                });
                Ok(value)
            }
        }
    }

    async fn try_get(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        ensure_active(cancel, "plain.try_get")?;
        self.faults.check("plain.read")?;

        Ok(self
            .entries
            .get(&key.identity())
            .map(|entry| entry.value.clone()))
    }

    async fn try_remove(
        &self,
        key: &KeyRecord,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<ValueRecord>> {
        ensure_active(cancel, "plain.try_remove")?;
        self.faults.check("plain.remove")?;

        Ok(self
            .entries
            .remove(&key.identity())
            .map(|(_, entry)| entry.value))
    }

    fn get_keys(&self, value_type: &str) -> KeyStream {
        let mut keys: Vec<KeyRecord> = self
            .entries
            .iter()
            .filter(|entry| entry.key().value_type == value_type)
            .map(|entry| entry.value().key.clone())
            .collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));

        stream::iter(keys.into_iter().map(Ok)).boxed()
    }

    async fn close(&self) -> StorageResult<()> {
        let dropped = self.entries.len();
        self.entries.clear();
        tracing::debug!(dropped, "local plain storage closed");
        Ok(())
    }
}


// =============================================================================
// LocalHistoricalStore
// =============================================================================

#[derive(Debug, Clone)]
struct VersionChain {
    key: KeyRecord,
    versions: BTreeMap<u64, ValueRecord>,
}

/// Version chains over a concurrent map.
#[derive(Debug, Clone, Default)]
pub struct LocalHistoricalStore {
    chains: Arc<DashMap<KeyIdentity, VersionChain>>,
    faults: Faults,
}

impl LocalHistoricalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with fault injection.
    #[must_use]
    pub fn with_fault_injector(injector: Arc<FaultInjector>) -> Self {
        Self {
            chains: Arc::default(),
            faults: Faults {
                injector: Some(injector),
            },
        }
    }

    /// Number of key identities with at least one version.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.chains.len()
    }
}

#[async_trait]
impl HistoricalStore for LocalHistoricalStore {
    async fn read_latest(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        self.faults.check("historical.read_latest")?;

        Ok(self.chains.get(&key.identity()).and_then(|chain| {
            chain
                .versions
                .last_key_value()
                .map(|(_, value)| value.clone())
        }))
    }

    async fn read_version(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<Option<ValueRecord>> {
        self.faults.check("historical.read_version")?;

        Ok(self
            .chains
            .get(&key.identity())
            .and_then(|chain| chain.versions.get(&version).cloned()))
    }

    async fn append(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
        assert!(value.version() >= 1, "appended value must be versioned");

        match self.faults.roll("historical.append") {
            Some(fault) if fault.is_conflict() => return Ok(WriteOutcome::Conflict),
            Some(fault) => return Err(fault_error(fault, "historical.append")),
            None => {}
        }

        let mut chain = self
            .chains
            .entry(key.identity())
            .or_insert_with(|| VersionChain {
                key: key.clone(),
                versions: BTreeMap::new(),
            });

        Ok(match chain.versions.entry(value.version()) {
            std::collections::btree_map::Entry::Occupied(_) => WriteOutcome::Conflict,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value.clone());
                WriteOutcome::Committed
            }
        })
    }

    async fn remove_through(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<RemoveOutcome<u64>> {
        match self.faults.roll("historical.remove_through") {
            Some(fault) if fault.is_conflict() => return Ok(RemoveOutcome::Conflict),
            Some(fault) => return Err(fault_error(fault, "historical.remove_through")),
            None => {}
        }

        let identity = key.identity();
        let removed = match self.chains.get_mut(&identity) {
            Some(mut chain) => {
                let kept = chain.versions.split_off(&version.saturating_add(1));
                let removed = std::mem::replace(&mut chain.versions, kept).len();
                u64::try_from(removed).unwrap_or(u64::MAX)
            }
            None => 0,
        };

        // Collect the key once no version references it.
        self.chains
            .remove_if(&identity, |_, chain| chain.versions.is_empty());

        Ok(RemoveOutcome::Removed(removed))
    }

    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>> {
        self.faults.check("historical.keys")?;

        let mut keys: Vec<KeyRecord> = self
            .chains
            .iter()
            .filter(|chain| chain.key().value_type == value_type)
            .filter(|chain| !chain.value().versions.is_empty())
            .filter(|chain| after.map_or(true, |after| chain.key().id.as_str() > after))
            .map(|chain| chain.value().key.clone())
            .collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        keys.truncate(limit);
        Ok(keys)
    }

    async fn close(&self) -> StorageResult<()> {
        let dropped = self.chains.len();
        self.chains.clear();
        tracing::debug!(dropped, "local historical storage closed");
        Ok(())
    }
}

// =============================================================================
// LocalBackend
// =============================================================================

/// The in-process backend: one plain provider and one historical store.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    plain: Arc<LocalStorageProvider>,
    historical: Arc<LocalHistoricalStore>,
}

impl LocalBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend whose plain and historical sides share one
    /// fault injector.
    #[must_use]
    pub fn with_fault_injector(injector: Arc<FaultInjector>) -> Self {
        Self {
            plain: Arc::new(LocalStorageProvider::with_fault_injector(Arc::clone(
                &injector,
            ))),
            historical: Arc::new(LocalHistoricalStore::with_fault_injector(injector)),
        }
    }

    /// The plain provider.
    #[must_use]
    pub fn plain(&self) -> Arc<LocalStorageProvider> {
        Arc::clone(&self.plain)
    }

    /// The historical store.
    #[must_use]
    pub fn historical_store(&self) -> Arc<LocalHistoricalStore> {
        Arc::clone(&self.historical)
    }
}
