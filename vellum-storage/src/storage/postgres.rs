//! PostgresBackend - Relational Storage
//!
//! `TigerStyle`: Constraint violations are the conflict signal.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE storage_keys (
//!     id TEXT, value_type TEXT, key_type TEXT, content BYTEA,
//!     PRIMARY KEY (id, value_type)
//! );
//! CREATE TABLE storage_values (
//!     key_id TEXT, value_type TEXT, version BIGINT, type_name TEXT,
//!     content BYTEA, details JSONB,
//!     PRIMARY KEY (key_id, value_type),
//!     FOREIGN KEY (key_id, value_type) REFERENCES storage_keys
//! );
//! CREATE TABLE historical_keys   (... same shape as storage_keys ...);
//! CREATE TABLE historical_values (
//!     ..., PRIMARY KEY (key_id, value_type, version)
//! );
//! ```
//!
//! A unique violation (`23505`) is a lost add race, a foreign-key violation
//! (`23503`) means the key was removed underneath the writer, and a
//! serialization failure (`40001`) is a lost transaction race. All three
//! retry. A version-qualified update touching zero rows is a lost update
//! race.
//!
//! Foreign keys never cascade. Deletes lock the key row `FOR UPDATE`
//! first; a writer's foreign-key check holds `FOR KEY SHARE` on the same
//! row, so a delete either waits for an in-flight write and then sees it,
//! or the write fails its check after the delete and retries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use vellum_core::constants::POSTGRES_CONNECTIONS_COUNT_DEFAULT;

use super::error::{StorageError, StorageResult};
use super::record::{Audit, KeyRecord, ValueRecord};
use super::store::{
    version_from_column, version_to_column, HistoricalStore, PlainStore, RemoveOutcome,
    WriteOutcome,
};

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS storage_keys (
        id TEXT NOT NULL,
        value_type TEXT NOT NULL,
        key_type TEXT NOT NULL,
        content BYTEA NOT NULL,
        PRIMARY KEY (id, value_type)
    )",
    "CREATE TABLE IF NOT EXISTS storage_values (
        key_id TEXT NOT NULL,
        value_type TEXT NOT NULL,
        version BIGINT NOT NULL,
        type_name TEXT NOT NULL,
        content BYTEA NOT NULL,
        details JSONB NOT NULL DEFAULT '{}',
        PRIMARY KEY (key_id, value_type),
        FOREIGN KEY (key_id, value_type) REFERENCES storage_keys (id, value_type)
    )",
    "CREATE TABLE IF NOT EXISTS historical_keys (
        id TEXT NOT NULL,
        value_type TEXT NOT NULL,
        key_type TEXT NOT NULL,
        content BYTEA NOT NULL,
        PRIMARY KEY (id, value_type)
    )",
    "CREATE TABLE IF NOT EXISTS historical_values (
        key_id TEXT NOT NULL,
        value_type TEXT NOT NULL,
        version BIGINT NOT NULL,
        type_name TEXT NOT NULL,
        content BYTEA NOT NULL,
        details JSONB NOT NULL DEFAULT '{}',
        PRIMARY KEY (key_id, value_type, version),
        FOREIGN KEY (key_id, value_type) REFERENCES historical_keys (id, value_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_historical_values_key ON historical_values (key_id, value_type)",
    "CREATE INDEX IF NOT EXISTS idx_storage_keys_type ON storage_keys (value_type, id)",
];

// =============================================================================
// Error classification
// =============================================================================

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

/// How a failed relational write is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteErrorClass {
    /// Lost a race: retry against fresh state
    Benign,
    /// Propagate unchanged
    Fatal,
}

/// Translate a SQLSTATE into retry-or-fail.
pub(crate) fn classify_sqlstate(code: Option<&str>) -> WriteErrorClass {
    match code {
        Some(
            SQLSTATE_UNIQUE_VIOLATION
            | SQLSTATE_FOREIGN_KEY_VIOLATION
            | SQLSTATE_SERIALIZATION_FAILURE,
        ) => WriteErrorClass::Benign,
        _ => WriteErrorClass::Fatal,
    }
}

fn classify_write_error(err: &sqlx::Error) -> WriteErrorClass {
    match err {
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref()),
        _ => WriteErrorClass::Fatal,
    }
}

/// Map a write result: benign violations become `Conflict`.
fn settle<T>(result: Result<T, sqlx::Error>, operation: &str) -> StorageResult<WriteOutcome> {
    match result {
        Ok(_) => Ok(WriteOutcome::Committed),
        Err(e) if classify_write_error(&e) == WriteErrorClass::Benign => {
            tracing::debug!(operation, error = %e, "relational write lost a race");
            Ok(WriteOutcome::Conflict)
        }
        Err(e) => Err(query_error(operation, &e)),
    }
}

fn query_error(operation: &str, e: &sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::connection(format!("{operation} failed: {e}"))
        }
        _ => StorageError::query(format!("{operation} failed: {e}")),
    }
}

/// Map a delete result: benign violations become `Conflict`.
fn settle_removal<T>(
    result: Result<T, sqlx::Error>,
    operation: &str,
) -> StorageResult<RemoveOutcome<T>> {
    match result {
        Ok(removed) => Ok(RemoveOutcome::Removed(removed)),
        Err(e) if classify_write_error(&e) == WriteErrorClass::Benign => {
            tracing::debug!(operation, error = %e, "relational delete lost a race");
            Ok(RemoveOutcome::Conflict)
        }
        Err(e) => Err(query_error(operation, &e)),
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn row_to_value(row: &PgRow) -> StorageResult<ValueRecord> {
    let column = |e: sqlx::Error| StorageError::deserialization(e.to_string());

    let type_name: String = row.try_get("type_name").map_err(column)?;
    let content: Vec<u8> = row.try_get("content").map_err(column)?;
    let version: i64 = row.try_get("version").map_err(column)?;
    let Json(details): Json<BTreeMap<String, String>> = row.try_get("details").map_err(column)?;

    let audit = Audit::from_details(&details)?;
    let version = version_from_column(version)?;
    if audit.version != version {
        return Err(StorageError::deserialization(format!(
            "audit version {} disagrees with stored version {version}",
            audit.version
        )));
    }
    Ok(ValueRecord::new(type_name, content, audit))
}

fn row_to_key(row: &PgRow) -> StorageResult<KeyRecord> {
    let column = |e: sqlx::Error| StorageError::deserialization(e.to_string());

    Ok(KeyRecord {
        id: row.try_get("id").map_err(column)?,
        key_type: row.try_get("key_type").map_err(column)?,
        content: row.try_get("content").map_err(column)?,
        value_type: row.try_get("value_type").map_err(column)?,
    })
}

fn page_limit(limit: usize) -> i64 {
    assert!(limit > 0, "limit must be positive");
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// =============================================================================
// PostgresBackend
// =============================================================================

/// PostgreSQL connection pool with the storage schema applied.
#[derive(Clone, Debug)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect with the default pool size.
    ///
    /// # Errors
    /// Returns `Connection` if the pool cannot be created, `Query` if the
    /// schema cannot be applied.
    pub async fn new(connection_string: &str) -> StorageResult<Self> {
        Self::with_max_connections(connection_string, POSTGRES_CONNECTIONS_COUNT_DEFAULT).await
    }

    /// Connect with at most `max_connections` pooled connections.
    ///
    /// # Errors
    /// See [`PostgresBackend::new`].
    pub async fn with_max_connections(
        connection_string: &str,
        max_connections: u32,
    ) -> StorageResult<Self> {
        assert!(
            connection_string.starts_with("postgres://")
                || connection_string.starts_with("postgresql://"),
            "connection string must be postgres URL"
        );
        assert!(max_connections > 0, "max_connections must be positive");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect: {e}")))?;

        let backend = Self::from_pool(pool).await?;
        tracing::info!(max_connections, "relational backend connected");
        Ok(backend)
    }

    /// Create from an existing pool.
    ///
    /// # Errors
    /// Returns `Query` if the schema cannot be applied.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let backend = Self { pool };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::query(format!("failed to apply schema: {e}")))?;
        }
        Ok(())
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Plain store over this pool.
    #[must_use]
    pub fn plain_store(&self) -> PostgresPlainStore {
        PostgresPlainStore {
            pool: self.pool.clone(),
        }
    }

    /// Historical store over this pool.
    #[must_use]
    pub fn historical_store(&self) -> PostgresHistoricalStore {
        PostgresHistoricalStore {
            pool: self.pool.clone(),
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Plain
// =============================================================================

/// Latest values in `storage_keys` / `storage_values`.
#[derive(Clone, Debug)]
pub struct PostgresPlainStore {
    pool: PgPool,
}

impl PostgresPlainStore {
    /// Lock the key row, delete the value, then the key.
    async fn remove_locked(&self, key: &KeyRecord) -> Result<Option<PgRow>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT 1 FROM storage_keys WHERE id = $1 AND value_type = $2 FOR UPDATE")
            .bind(&key.id)
            .bind(&key.value_type)
            .fetch_optional(&mut *tx)
            .await?;

        let removed = sqlx::query(
            "DELETE FROM storage_values WHERE key_id = $1 AND value_type = $2
             RETURNING version, type_name, content, details",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM storage_keys WHERE id = $1 AND value_type = $2")
            .bind(&key.id)
            .bind(&key.value_type)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl PlainStore for PostgresPlainStore {
    async fn read(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        let row = sqlx::query(
            "SELECT version, type_name, content, details FROM storage_values
             WHERE key_id = $1 AND value_type = $2",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("plain.read", &e))?;

        row.as_ref().map(row_to_value).transpose()
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, version = value.version()))]
    async fn insert(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
        const OPERATION: &str = "plain.insert";
        let version = version_to_column(value.version())?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error(OPERATION, &e))?;

        // The key row may survive a lost race; the value row decides the winner.
        let key_row = sqlx::query(
            "INSERT INTO storage_keys (id, value_type, key_type, content)
             VALUES ($1, $2, $3, $4) ON CONFLICT (id, value_type) DO NOTHING",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(&key.key_type)
        .bind(&key.content)
        .execute(&mut *tx)
        .await;
        if let outcome @ WriteOutcome::Conflict = settle(key_row, OPERATION)? {
            return Ok(outcome);
        }

        let value_row = sqlx::query(
            "INSERT INTO storage_values (key_id, value_type, version, type_name, content, details)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(version)
        .bind(&value.value_type)
        .bind(&value.content)
        .bind(Json(value.audit.to_details()))
        .execute(&mut *tx)
        .await;
        if let outcome @ WriteOutcome::Conflict = settle(value_row, OPERATION)? {
            return Ok(outcome);
        }

        settle(tx.commit().await, OPERATION)
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, expected_version))]
    async fn replace(
        &self,
        key: &KeyRecord,
        expected_version: u64,
        value: &ValueRecord,
    ) -> StorageResult<WriteOutcome> {
        const OPERATION: &str = "plain.replace";

        let result = sqlx::query(
            "UPDATE storage_values
             SET version = $3, type_name = $4, content = $5, details = $6
             WHERE key_id = $1 AND value_type = $2 AND version = $7",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(version_to_column(value.version())?)
        .bind(&value.value_type)
        .bind(&value.content)
        .bind(Json(value.audit.to_details()))
        .bind(version_to_column(expected_version)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(WriteOutcome::Conflict),
            other => settle(other, OPERATION),
        }
    }

    #[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
    async fn remove(
        &self,
        key: &KeyRecord,
    ) -> StorageResult<RemoveOutcome<Option<ValueRecord>>> {
        const OPERATION: &str = "plain.remove";

        let removed = settle_removal(self.remove_locked(key).await, OPERATION)?;
        match removed {
            RemoveOutcome::Removed(row) => {
                Ok(RemoveOutcome::Removed(row.as_ref().map(row_to_value).transpose()?))
            }
            RemoveOutcome::Conflict => Ok(RemoveOutcome::Conflict),
        }
    }

    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>> {
        let rows = sqlx::query(
            "SELECT k.id, k.key_type, k.content, k.value_type FROM storage_keys k
             WHERE k.value_type = $1 AND k.id > $2
             AND EXISTS (SELECT 1 FROM storage_values v
                         WHERE v.key_id = k.id AND v.value_type = k.value_type)
             ORDER BY k.id LIMIT $3",
        )
        .bind(value_type)
        .bind(after.unwrap_or_default())
        .bind(page_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("plain.keys", &e))?;

        rows.iter().map(row_to_key).collect()
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

// =============================================================================
// Historical
// =============================================================================

/// Version chains in `historical_keys` / `historical_values`.
#[derive(Clone, Debug)]
pub struct PostgresHistoricalStore {
    pool: PgPool,
}

impl PostgresHistoricalStore {
    /// Lock the key row, delete versions `<= through`, then sweep the key
    /// row if no version remains.
    ///
    /// Taking the lock first means every statement after it sees appends
    /// that committed while this trim waited.
    async fn remove_through_locked(
        &self,
        key: &KeyRecord,
        through: i64,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT 1 FROM historical_keys WHERE id = $1 AND value_type = $2 FOR UPDATE")
            .bind(&key.id)
            .bind(&key.value_type)
            .fetch_optional(&mut *tx)
            .await?;

        let removed = sqlx::query(
            "DELETE FROM historical_values
             WHERE key_id = $1 AND value_type = $2 AND version <= $3",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(through)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM historical_keys k
             WHERE k.id = $1 AND k.value_type = $2
             AND NOT EXISTS (SELECT 1 FROM historical_values v
                             WHERE v.key_id = k.id AND v.value_type = k.value_type)",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl HistoricalStore for PostgresHistoricalStore {
    async fn read_latest(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        let row = sqlx::query(
            "SELECT version, type_name, content, details FROM historical_values
             WHERE key_id = $1 AND value_type = $2
             ORDER BY version DESC LIMIT 1",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("historical.read_latest", &e))?;

        row.as_ref().map(row_to_value).transpose()
    }

    async fn read_version(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<Option<ValueRecord>> {
        let row = sqlx::query(
            "SELECT version, type_name, content, details FROM historical_values
             WHERE key_id = $1 AND value_type = $2 AND version = $3",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(version_to_column(version)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("historical.read_version", &e))?;

        row.as_ref().map(row_to_value).transpose()
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, version = value.version()))]
    async fn append(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
        const OPERATION: &str = "historical.append";
        assert!(value.version() >= 1, "appended value must be versioned");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error(OPERATION, &e))?;

        let key_row = sqlx::query(
            "INSERT INTO historical_keys (id, value_type, key_type, content)
             VALUES ($1, $2, $3, $4) ON CONFLICT (id, value_type) DO NOTHING",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(&key.key_type)
        .bind(&key.content)
        .execute(&mut *tx)
        .await;
        if let outcome @ WriteOutcome::Conflict = settle(key_row, OPERATION)? {
            return Ok(outcome);
        }

        let value_row = sqlx::query(
            "INSERT INTO historical_values (key_id, value_type, version, type_name, content, details)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&key.id)
        .bind(&key.value_type)
        .bind(version_to_column(value.version())?)
        .bind(&value.value_type)
        .bind(&value.content)
        .bind(Json(value.audit.to_details()))
        .execute(&mut *tx)
        .await;
        if let outcome @ WriteOutcome::Conflict = settle(value_row, OPERATION)? {
            return Ok(outcome);
        }

        settle(tx.commit().await, OPERATION)
    }

    #[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
    async fn remove_through(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<RemoveOutcome<u64>> {
        let through = version_to_column(version)?;
        settle_removal(
            self.remove_through_locked(key, through).await,
            "historical.remove_through",
        )
    }

    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>> {
        let rows = sqlx::query(
            "SELECT k.id, k.key_type, k.content, k.value_type FROM historical_keys k
             WHERE k.value_type = $1 AND k.id > $2
             AND EXISTS (SELECT 1 FROM historical_values v
                         WHERE v.key_id = k.id AND v.value_type = k.value_type)
             ORDER BY k.id LIMIT $3",
        )
        .bind(value_type)
        .bind(after.unwrap_or_default())
        .bind(page_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("historical.keys", &e))?;

        rows.iter().map(row_to_key).collect()
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::env;

    fn test_db_url() -> Option<String> {
        env::var("TEST_POSTGRES_URL").ok()
    }

    /// Skip test if no database available.
    macro_rules! require_db {
        () => {
            match test_db_url() {
                Some(url) => url,
                None => {
                    eprintln!("Skipping test: TEST_POSTGRES_URL not set");
                    return;
                }
            }
        };
    }

    fn key(id: &str) -> KeyRecord {
        KeyRecord::new(id, "Key", id.as_bytes().to_vec(), "PgLedger")
    }

    fn stamped(content: &str, version: u64) -> ValueRecord {
        let mut audit = Audit::new(Utc::now());
        audit.version = version;
        ValueRecord::new("PgLedger", content.as_bytes().to_vec(), audit)
    }

    fn unique_key(prefix: &str) -> KeyRecord {
        key(&format!("{prefix}-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_classify_sqlstate() {
        assert_eq!(classify_sqlstate(Some("23505")), WriteErrorClass::Benign);
        assert_eq!(classify_sqlstate(Some("23503")), WriteErrorClass::Benign);
        assert_eq!(classify_sqlstate(Some("40001")), WriteErrorClass::Benign);
        assert_eq!(classify_sqlstate(Some("42P01")), WriteErrorClass::Fatal);
        assert_eq!(classify_sqlstate(None), WriteErrorClass::Fatal);
    }

    #[tokio::test]
    async fn test_postgres_plain_conflicts() {
        let url = require_db!();
        let backend = PostgresBackend::new(&url).await.unwrap();
        let store = backend.plain_store();
        let k = unique_key("plain");

        assert_eq!(store.insert(&k, &stamped("v1", 1)).await.unwrap(), WriteOutcome::Committed);
        assert_eq!(store.insert(&k, &stamped("v2", 1)).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.replace(&k, 5, &stamped("x", 6)).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.replace(&k, 1, &stamped("v2", 2)).await.unwrap(), WriteOutcome::Committed);

        let RemoveOutcome::Removed(Some(removed)) = store.remove(&k).await.unwrap() else {
            panic!("remove should return the stored value");
        };
        assert_eq!(removed.version(), 2);
        assert!(store.read(&k).await.unwrap().is_none());

        backend.close().await;
    }

    #[tokio::test]
    async fn test_postgres_historical_trim_sweeps_key() {
        let url = require_db!();
        let backend = PostgresBackend::new(&url).await.unwrap();
        let store = backend.historical_store();
        let k = unique_key("hist");

        for v in 1..=5 {
            store.append(&k, &stamped(&format!("v{v}"), v)).await.unwrap();
        }
        assert_eq!(store.append(&k, &stamped("dup", 5)).await.unwrap(), WriteOutcome::Conflict);

        assert_eq!(store.remove_through(&k, 4).await.unwrap(), RemoveOutcome::Removed(4));
        assert!(store.read_version(&k, 4).await.unwrap().is_none());
        assert_eq!(store.read_latest(&k).await.unwrap().unwrap().content, b"v5");

        assert_eq!(store.remove_through(&k, 5).await.unwrap(), RemoveOutcome::Removed(1));
        let keys = store.keys_page("PgLedger", None, 10_000).await.unwrap();
        assert!(keys.iter().all(|listed| listed.id != k.id));

        backend.close().await;
    }
}
