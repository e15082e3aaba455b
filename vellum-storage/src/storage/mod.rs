//! Storage - Records, Store Primitives and Backends
//!
//! `TigerStyle`: Backends report success, conflict or failure. They never
//! retry on their own; the engines in [`crate::provider`] do.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        PlainStore / HistoricalStore (conditional writes)     │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                    ↑                    ↑
//!          │                    │                    │
//! ┌────────┴────────┐  ┌────────┴────────┐  ┌───────┴────────┐
//! │  LocalBackend   │  │ DocumentBackend │  │ PostgresBackend│
//! │  (dashmap)      │  │  (SurrealDB)    │  │   (sqlx)       │
//! └─────────────────┘  └─────────────────┘  └────────────────┘
//! ```
//!
//! The local plain provider is the one exception: the map's entry lock
//! makes get-or-add and compare-and-update atomic, so it implements
//! [`crate::provider::StorageProvider`] directly.

mod error;
mod local;
mod record;
mod store;

#[cfg(feature = "surreal")]
mod surreal;

#[cfg(feature = "postgres")]
mod postgres;

pub use error::{StorageError, StorageResult};
pub use local::{LocalBackend, LocalHistoricalStore, LocalStorageProvider};
pub use record::{
    Audit, KeyIdentity, KeyRecord, ValueRecord, DETAIL_CORRELATION_ID, DETAIL_CREATED,
    DETAIL_UPDATED, DETAIL_USER, DETAIL_VERSION,
};
pub use store::{HistoricalStore, PlainStore, RemoveOutcome, WriteOutcome};

#[cfg(feature = "surreal")]
pub use surreal::{DocumentBackend, DocumentHistoricalStore, DocumentPlainStore};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresBackend, PostgresHistoricalStore, PostgresPlainStore};
