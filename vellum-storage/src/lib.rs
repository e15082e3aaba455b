//! # Vellum Storage
//!
//! Typed key/value storage with optimistic concurrency, in three flavors
//! over three backing engines.
//!
//! ## Features
//!
//! - **Plain storage**: one current value per key, replaced by version-checked writes
//! - **Historical storage**: every version retained, prefix trimming, orphan collection
//! - **Partitioned storage**: an append-only indexed log per key, built on historical storage
//! - **Backends**: in-process maps (`dashmap`), SurrealDB, PostgreSQL
//! - **Deterministic testing**: fault injection and forced lost races on the local backend
//!
//! ## Quick Start
//!
//! ```rust
//! use vellum_storage::config::StorageConfig;
//! use vellum_storage::registry::{BackendKind, BackendSet, ProviderRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backends = BackendSet::connect(&StorageConfig::default()).await?;
//! let registry = ProviderRegistry::builder()
//!     .any_historical(BackendKind::Local)
//!     .build(&backends)?;
//!
//! let prices = registry.historical::<String, u32>()?;
//! let cancel = CancellationToken::new();
//! let sku = "sku-1".to_string();
//!
//! prices.add_or_update(&sku, |_| 100, |_, _| 100, &cancel).await?;
//! let second = prices.add_or_update(&sku, |_| 100, |_, old| old + 20, &cancel).await?;
//! assert_eq!((second.version(), second.value), (2, 120));
//!
//! let first = prices.try_get_version(&sku, 1, &cancel).await?.expect("version 1");
//! assert_eq!(first.value, 100);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   Storage<K, V>   HistoricalStorage<K, V>   Partitioned…     │  facade
//! ├──────────────────────────────────────────────────────────────┤
//! │   RecordConverter: KeyHasher · ValueCodec · AuditContext     │  convert
//! ├──────────────────────────────────────────────────────────────┤
//! │   PlainEngine · HistoricalEngine · PartitionLog              │  provider
//! │   WriteCycle: Read → Compute → Write → Evaluate (retry)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Local (dashmap) │ Document (SurrealDB) │ Relational (sqlx) │  storage
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - `surreal` (default): SurrealDB document backend
//! - `postgres` (default): PostgreSQL relational backend

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod convert;
pub mod facade;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod telemetry;

pub use config::{DocumentSettings, PostgresSettings, RetryPolicy, RetrySettings, StorageConfig};
pub use convert::{
    AuditContext, JsonCodec, KeyHasher, RecordConverter, Sha256KeyHasher, SimAuditContext,
    SystemAuditContext, ValueCodec,
};
pub use facade::{HistoricalStorage, PartitionedStorage, Storage, Stored, TypedKeyStream};
pub use provider::{
    AddFactory, AttemptOutcome, HistoricalEngine, HistoricalStorageProvider, KeyStream,
    PartitionLog, PartitionedStorageProvider, PlainEngine, StorageProvider, TracingObserver,
    UpdateFactory, WriteCycle, WriteObserver,
};
pub use registry::{BackendKind, BackendSet, ProviderRegistry, ProviderRegistryBuilder};
pub use retry::{ConstantRetry, ExponentialRetry, LinearRetry, RetryStrategy};
pub use storage::{
    Audit, HistoricalStore, KeyRecord, LocalBackend, LocalHistoricalStore, LocalStorageProvider,
    PlainStore, RemoveOutcome, StorageError, StorageResult, ValueRecord, WriteOutcome,
};

#[cfg(feature = "surreal")]
pub use storage::DocumentBackend;

#[cfg(feature = "postgres")]
pub use storage::PostgresBackend;
