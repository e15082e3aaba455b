//! Registry - Per-Value-Type Provider Wiring
//!
//! `TigerStyle`: Resolved once at configuration time, held by the
//! composition root, passed explicitly. No global state.
//!
//! ```text
//! StorageConfig ──connect──→ BackendSet ──┐
//!                                         ├─build──→ ProviderRegistry ──→ Storage<K, V>
//! ProviderRegistryBuilder (value type → BackendKind | instance)       ──→ HistoricalStorage<K, V>
//!                                                                     ──→ PartitionedStorage<K, V>
//! ```
//!
//! # Example
//!
//! ```rust
//! use vellum_storage::config::StorageConfig;
//! use vellum_storage::registry::{BackendKind, BackendSet, ProviderRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let backends = BackendSet::local(&StorageConfig::default())?;
//! let registry = ProviderRegistry::builder()
//!     .any_plain(BackendKind::Local)
//!     .build(&backends)?;
//!
//! let counters = registry.storage::<String, u64>()?;
//! let cancel = CancellationToken::new();
//! let stored = counters.add_or_get(&"visits".to_string(), |_| 0, &cancel).await?;
//! assert_eq!(stored.version(), 1);
//! # Ok::<(), anyhow::Error>(())
//! # }).unwrap();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::convert::RecordConverter;
use crate::facade::{HistoricalStorage, PartitionedStorage, Storage};
use crate::provider::{
    HistoricalEngine, HistoricalStorageProvider, PartitionLog, PartitionedStorageProvider,
    StorageProvider, WriteCycle, WriteObserver,
};
#[cfg(any(feature = "surreal", feature = "postgres"))]
use crate::provider::PlainEngine;
use crate::storage::{LocalBackend, StorageError, StorageResult};

#[cfg(feature = "postgres")]
use crate::storage::PostgresBackend;
#[cfg(feature = "surreal")]
use crate::storage::DocumentBackend;

// =============================================================================
// BackendKind
// =============================================================================

/// The backing engine a provider runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// In-process concurrent maps
    Local,
    /// SurrealDB document store
    Document,
    /// PostgreSQL
    Relational,
}

impl BackendKind {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Document => "document",
            Self::Relational => "relational",
        }
    }
}

/// Provider flavor, for error messages.
#[derive(Debug, Clone, Copy)]
enum Flavor {
    Plain,
    Historical,
    Partitioned,
}

impl Flavor {
    fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Historical => "historical",
            Self::Partitioned => "partitioned",
        }
    }
}

// =============================================================================
// BackendSet
// =============================================================================

/// The three providers one backend offers.
#[derive(Clone)]
struct Engines {
    plain: Arc<dyn StorageProvider>,
    historical: Arc<dyn HistoricalStorageProvider>,
    partitioned: Arc<dyn PartitionedStorageProvider>,
}

impl Engines {
    fn over(
        plain: Arc<dyn StorageProvider>,
        historical: Arc<dyn HistoricalStorageProvider>,
    ) -> Self {
        let partitioned: Arc<dyn PartitionedStorageProvider> =
            Arc::new(PartitionLog::new(Arc::clone(&historical)));
        Self {
            plain,
            historical,
            partitioned,
        }
    }
}

/// Connected backends with their engines, one instance per kind.
#[derive(Clone)]
pub struct BackendSet {
    engines: BTreeMap<BackendKind, Engines>,
}

impl BackendSet {
    /// Local backend only; nothing to connect.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn local(config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self::with_local(&Self::cycle(config)?, LocalBackend::new()))
    }

    /// Local backend over a caller-supplied instance, e.g. one with a
    /// fault injector.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn local_with(config: &StorageConfig, local: LocalBackend) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self::with_local(&Self::cycle(config)?, local))
    }

    /// Local plus every backend the configuration enables.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for invalid configuration or a backend
    /// whose feature is disabled, and connection errors from the backends.
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        Self::connect_observed(config, None).await
    }

    /// Like [`BackendSet::connect`], reporting write attempts to `observer`.
    ///
    /// # Errors
    /// See [`BackendSet::connect`].
    pub async fn connect_observed(
        config: &StorageConfig,
        observer: Option<Arc<dyn WriteObserver>>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let mut cycle = Self::cycle(config)?;
        if let Some(observer) = observer {
            cycle = cycle.with_observer(observer);
        }

        let mut set = Self::with_local(&cycle, LocalBackend::new());

        if let Some(document) = &config.document {
            set.engines.insert(
                BackendKind::Document,
                Self::document(&cycle, config.key_page_size, document).await?,
            );
        }
        if let Some(postgres) = &config.postgres {
            set.engines.insert(
                BackendKind::Relational,
                Self::relational(&cycle, config.key_page_size, postgres).await?,
            );
        }

        tracing::info!(
            backends = ?set.engines.keys().collect::<Vec<_>>(),
            max_attempts = cycle.retry().max_attempts(),
            "storage backends ready"
        );
        Ok(set)
    }

    fn cycle(config: &StorageConfig) -> StorageResult<WriteCycle> {
        Ok(WriteCycle::new(config.retry.build()?))
    }

    fn with_local(cycle: &WriteCycle, local: LocalBackend) -> Self {
        let historical: Arc<dyn HistoricalStorageProvider> = Arc::new(HistoricalEngine::new(
            local.historical_store(),
            cycle.clone(),
        ));
        let mut engines = BTreeMap::new();
        engines.insert(BackendKind::Local, Engines::over(local.plain(), historical));
        Self { engines }
    }

    #[cfg(feature = "surreal")]
    async fn document(
        cycle: &WriteCycle,
        page_size: usize,
        settings: &crate::config::DocumentSettings,
    ) -> StorageResult<Engines> {
        let backend =
            DocumentBackend::connect(&settings.endpoint, &settings.namespace, &settings.database)
                .await?;
        let plain = PlainEngine::new(Arc::new(backend.plain_store()), cycle.clone())
            .with_page_size(page_size);
        let historical = HistoricalEngine::new(Arc::new(backend.historical_store()), cycle.clone())
            .with_page_size(page_size);
        Ok(Engines::over(Arc::new(plain), Arc::new(historical)))
    }

    #[cfg(not(feature = "surreal"))]
    async fn document(
        _cycle: &WriteCycle,
        _page_size: usize,
        _settings: &crate::config::DocumentSettings,
    ) -> StorageResult<Engines> {
        Err(StorageError::invalid_argument(
            "document store configured but the `surreal` feature is disabled",
        ))
    }

    #[cfg(feature = "postgres")]
    async fn relational(
        cycle: &WriteCycle,
        page_size: usize,
        settings: &crate::config::PostgresSettings,
    ) -> StorageResult<Engines> {
        let backend =
            PostgresBackend::with_max_connections(&settings.url, settings.max_connections).await?;
        let plain = PlainEngine::new(Arc::new(backend.plain_store()), cycle.clone())
            .with_page_size(page_size);
        let historical = HistoricalEngine::new(Arc::new(backend.historical_store()), cycle.clone())
            .with_page_size(page_size);
        Ok(Engines::over(Arc::new(plain), Arc::new(historical)))
    }

    #[cfg(not(feature = "postgres"))]
    async fn relational(
        _cycle: &WriteCycle,
        _page_size: usize,
        _settings: &crate::config::PostgresSettings,
    ) -> StorageResult<Engines> {
        Err(StorageError::invalid_argument(
            "relational store configured but the `postgres` feature is disabled",
        ))
    }

    /// Whether `kind` is connected.
    #[must_use]
    pub fn has(&self, kind: BackendKind) -> bool {
        self.engines.contains_key(&kind)
    }

    fn engines(&self, kind: BackendKind, value_type: &str, flavor: Flavor) -> StorageResult<&Engines> {
        self.engines.get(&kind).ok_or_else(|| {
            StorageError::not_configured(
                value_type,
                format!("{} {} (backend not connected)", kind.as_str(), flavor.as_str()),
            )
        })
    }

    /// Release every backend.
    ///
    /// # Errors
    /// Returns the first close failure after attempting all.
    pub async fn close(&self) -> StorageResult<()> {
        let mut first_error = None;
        for (kind, engines) in &self.engines {
            for result in [engines.plain.close().await, engines.historical.close().await] {
                if let Err(e) = result {
                    tracing::warn!(backend = kind.as_str(), error = %e, "backend close failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSet")
            .field("backends", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// ProviderRegistryBuilder
// =============================================================================

enum Registration<P: ?Sized> {
    Backend(BackendKind),
    Instance(Arc<P>),
}

impl<P: ?Sized> Clone for Registration<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Backend(kind) => Self::Backend(*kind),
            Self::Instance(provider) => Self::Instance(Arc::clone(provider)),
        }
    }
}

struct Registrations<P: ?Sized> {
    by_type: BTreeMap<String, Registration<P>>,
    any: Option<Registration<P>>,
}

impl<P: ?Sized> Default for Registrations<P> {
    fn default() -> Self {
        Self {
            by_type: BTreeMap::new(),
            any: None,
        }
    }
}

impl<P: ?Sized> Registrations<P> {
    fn insert(&mut self, value_type: String, registration: Registration<P>) {
        assert!(!value_type.is_empty(), "value type cannot be empty");
        self.by_type.insert(value_type, registration);
    }

    fn resolve(
        self,
        flavor: Flavor,
        pick: impl Fn(&Engines) -> Arc<P>,
        backends: &BackendSet,
    ) -> StorageResult<Resolved<P>> {
        let resolve_one = |value_type: &str, registration: Registration<P>| match registration {
            Registration::Backend(kind) => backends
                .engines(kind, value_type, flavor)
                .map(|engines| pick(engines)),
            Registration::Instance(provider) => Ok(provider),
        };

        let mut by_type = HashMap::with_capacity(self.by_type.len());
        for (value_type, registration) in self.by_type {
            let provider = resolve_one(&value_type, registration)?;
            by_type.insert(value_type, provider);
        }
        let any = self
            .any
            .map(|registration| resolve_one("*", registration))
            .transpose()?;

        Ok(Resolved {
            flavor,
            by_type,
            any,
        })
    }
}

/// Collects per-value-type provider selections.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    plain: Registrations<dyn StorageProvider>,
    historical: Registrations<dyn HistoricalStorageProvider>,
    partitioned: Registrations<dyn PartitionedStorageProvider>,
}

impl ProviderRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain storage for `value_type` on `kind`.
    #[must_use]
    pub fn plain(mut self, value_type: impl Into<String>, kind: BackendKind) -> Self {
        self.plain.insert(value_type.into(), Registration::Backend(kind));
        self
    }

    /// Plain storage for values of type `V` (default logical name) on `kind`.
    #[must_use]
    pub fn plain_for<V: ?Sized>(self, kind: BackendKind) -> Self {
        self.plain(std::any::type_name::<V>(), kind)
    }

    /// Plain storage for `value_type` on a caller-built provider.
    #[must_use]
    pub fn plain_instance(
        mut self,
        value_type: impl Into<String>,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        self.plain.insert(value_type.into(), Registration::Instance(provider));
        self
    }

    /// Plain storage for every value type without its own registration.
    #[must_use]
    pub fn any_plain(mut self, kind: BackendKind) -> Self {
        self.plain.any = Some(Registration::Backend(kind));
        self
    }

    /// Historical storage for `value_type` on `kind`.
    #[must_use]
    pub fn historical(mut self, value_type: impl Into<String>, kind: BackendKind) -> Self {
        self.historical
            .insert(value_type.into(), Registration::Backend(kind));
        self
    }

    /// Historical storage for values of type `V` on `kind`.
    #[must_use]
    pub fn historical_for<V: ?Sized>(self, kind: BackendKind) -> Self {
        self.historical(std::any::type_name::<V>(), kind)
    }

    /// Historical storage for `value_type` on a caller-built provider.
    #[must_use]
    pub fn historical_instance(
        mut self,
        value_type: impl Into<String>,
        provider: Arc<dyn HistoricalStorageProvider>,
    ) -> Self {
        self.historical
            .insert(value_type.into(), Registration::Instance(provider));
        self
    }

    /// Historical storage for every value type without its own registration.
    #[must_use]
    pub fn any_historical(mut self, kind: BackendKind) -> Self {
        self.historical.any = Some(Registration::Backend(kind));
        self
    }

    /// Partitioned storage for `value_type` on `kind`.
    #[must_use]
    pub fn partitioned(mut self, value_type: impl Into<String>, kind: BackendKind) -> Self {
        self.partitioned
            .insert(value_type.into(), Registration::Backend(kind));
        self
    }

    /// Partitioned storage for values of type `V` on `kind`.
    #[must_use]
    pub fn partitioned_for<V: ?Sized>(self, kind: BackendKind) -> Self {
        self.partitioned(std::any::type_name::<V>(), kind)
    }

    /// Partitioned storage for `value_type` on a caller-built provider.
    #[must_use]
    pub fn partitioned_instance(
        mut self,
        value_type: impl Into<String>,
        provider: Arc<dyn PartitionedStorageProvider>,
    ) -> Self {
        self.partitioned
            .insert(value_type.into(), Registration::Instance(provider));
        self
    }

    /// Partitioned storage for every value type without its own registration.
    #[must_use]
    pub fn any_partitioned(mut self, kind: BackendKind) -> Self {
        self.partitioned.any = Some(Registration::Backend(kind));
        self
    }

    /// Resolve every registration against `backends`.
    ///
    /// # Errors
    /// Returns `NotConfigured` for a registration naming a backend that
    /// `backends` does not hold.
    pub fn build(self, backends: &BackendSet) -> StorageResult<ProviderRegistry> {
        let plain = self
            .plain
            .resolve(Flavor::Plain, |e| Arc::clone(&e.plain), backends)?;
        let historical = self
            .historical
            .resolve(Flavor::Historical, |e| Arc::clone(&e.historical), backends)?;
        let partitioned = self
            .partitioned
            .resolve(Flavor::Partitioned, |e| Arc::clone(&e.partitioned), backends)?;

        tracing::debug!(
            plain = plain.by_type.len(),
            historical = historical.by_type.len(),
            partitioned = partitioned.by_type.len(),
            "provider registry built"
        );

        Ok(ProviderRegistry {
            backends: backends.clone(),
            plain,
            historical,
            partitioned,
        })
    }
}

// =============================================================================
// ProviderRegistry
// =============================================================================

struct Resolved<P: ?Sized> {
    flavor: Flavor,
    by_type: HashMap<String, Arc<P>>,
    any: Option<Arc<P>>,
}

impl<P: ?Sized> Resolved<P> {
    fn get(&self, value_type: &str) -> StorageResult<Arc<P>> {
        self.by_type
            .get(value_type)
            .or(self.any.as_ref())
            .map(Arc::clone)
            .ok_or_else(|| StorageError::not_configured(value_type, self.flavor.as_str()))
    }
}

/// Provider instances per value type, resolved once.
pub struct ProviderRegistry {
    backends: BackendSet,
    plain: Resolved<dyn StorageProvider>,
    historical: Resolved<dyn HistoricalStorageProvider>,
    partitioned: Resolved<dyn PartitionedStorageProvider>,
}

impl ProviderRegistry {
    /// Start a registration.
    #[must_use]
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Plain provider for `value_type`.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for it.
    pub fn plain_provider(&self, value_type: &str) -> StorageResult<Arc<dyn StorageProvider>> {
        self.plain.get(value_type)
    }

    /// Historical provider for `value_type`.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for it.
    pub fn historical_provider(
        &self,
        value_type: &str,
    ) -> StorageResult<Arc<dyn HistoricalStorageProvider>> {
        self.historical.get(value_type)
    }

    /// Partitioned provider for `value_type`.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for it.
    pub fn partitioned_provider(
        &self,
        value_type: &str,
    ) -> StorageResult<Arc<dyn PartitionedStorageProvider>> {
        self.partitioned.get(value_type)
    }

    /// Typed plain storage with the default converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for `V`.
    pub fn storage<K, V>(&self) -> StorageResult<Storage<K, V>>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.storage_with(RecordConverter::new())
    }

    /// Typed plain storage with a custom converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for the
    /// converter's value type.
    pub fn storage_with<K, V>(&self, converter: RecordConverter<K, V>) -> StorageResult<Storage<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let provider = self.plain_provider(converter.value_type())?;
        Ok(Storage::new(provider, Arc::new(converter)))
    }

    /// Typed historical storage with the default converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for `V`.
    pub fn historical<K, V>(&self) -> StorageResult<HistoricalStorage<K, V>>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.historical_with(RecordConverter::new())
    }

    /// Typed historical storage with a custom converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for the
    /// converter's value type.
    pub fn historical_with<K, V>(
        &self,
        converter: RecordConverter<K, V>,
    ) -> StorageResult<HistoricalStorage<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let provider = self.historical_provider(converter.value_type())?;
        Ok(HistoricalStorage::new(provider, Arc::new(converter)))
    }

    /// Typed partitioned storage with the default converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for `V`.
    pub fn partitioned<K, V>(&self) -> StorageResult<PartitionedStorage<K, V>>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.partitioned_with(RecordConverter::new())
    }

    /// Typed partitioned storage with a custom converter.
    ///
    /// # Errors
    /// Returns `NotConfigured` when nothing is registered for the
    /// converter's value type.
    pub fn partitioned_with<K, V>(
        &self,
        converter: RecordConverter<K, V>,
    ) -> StorageResult<PartitionedStorage<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let provider = self.partitioned_provider(converter.value_type())?;
        Ok(PartitionedStorage::new(provider, Arc::new(converter)))
    }

    /// Release every connected backend.
    ///
    /// # Errors
    /// Returns the first close failure.
    pub async fn close(&self) -> StorageResult<()> {
        self.backends.close().await
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("backends", &self.backends)
            .field("plain", &self.plain.by_type.keys().collect::<Vec<_>>())
            .field("historical", &self.historical.by_type.keys().collect::<Vec<_>>())
            .field("partitioned", &self.partitioned.by_type.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
