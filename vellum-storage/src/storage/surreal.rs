//! DocumentBackend - SurrealDB Document Store
//!
//! `TigerStyle`: Unique indexes are the conflict signal. A write that
//! trips one lost a race; any other write error is fatal.
//!
//! # Layout
//!
//! ```text
//! plain_records   (key_id, value_type) UNIQUE    key + latest value + version
//! hist_keys       record id [key_id, value_type]  key content
//! hist_links      (key_id, value_type, version) UNIQUE → value_id
//! hist_values     value_id UNIQUE                 content + details
//! ```
//!
//! Historical appends write a link and a value in one transaction, so a
//! version's link and value appear together. Trimming deletes links and
//! sweeps the values and key that no link references in one transaction;
//! a retryable conflict rolls it back whole and is reported as a lost race.
//!
//! Payloads are persisted as hex strings.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::{Response, Surreal};
use vellum_core::constants::{
    DOCUMENT_DATABASE_DEFAULT, DOCUMENT_ENDPOINT_DEFAULT, DOCUMENT_NAMESPACE_DEFAULT,
};

use super::error::{StorageError, StorageResult};
use super::record::{Audit, KeyRecord, ValueRecord};
use super::store::{
    version_from_column, version_to_column, HistoricalStore, PlainStore, RemoveOutcome,
    WriteOutcome,
};

const SCHEMA: &str = "
    DEFINE TABLE IF NOT EXISTS plain_records SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS plain_identity ON plain_records FIELDS key_id, value_type UNIQUE;
    DEFINE TABLE IF NOT EXISTS hist_keys SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS hist_keys_type ON hist_keys FIELDS value_type, key_id;
    DEFINE TABLE IF NOT EXISTS hist_links SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS hist_links_identity ON hist_links FIELDS key_id, value_type, version UNIQUE;
    DEFINE TABLE IF NOT EXISTS hist_values SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS hist_values_id ON hist_values FIELDS value_id UNIQUE;
";

// =============================================================================
// Error classification
// =============================================================================

/// How a failed document-store write is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteErrorClass {
    /// Lost a race: retry against fresh state
    Benign,
    /// Propagate unchanged
    Fatal,
}

/// Markers of index violations and retryable transaction conflicts.
const BENIGN_MARKERS: [&str; 3] = ["already contains", "already exists", "can be retried"];

/// Translate a raw document-store error message into retry-or-fail.
pub(crate) fn classify_write_error(message: &str) -> WriteErrorClass {
    if BENIGN_MARKERS.iter().any(|marker| message.contains(marker)) {
        WriteErrorClass::Benign
    } else {
        WriteErrorClass::Fatal
    }
}

/// Fold per-statement errors of a write into an outcome.
fn settle(response: &mut Response, operation: &str) -> StorageResult<WriteOutcome> {
    let errors: HashMap<usize, surrealdb::Error> = response.take_errors();
    if errors.is_empty() {
        return Ok(WriteOutcome::Committed);
    }

    let messages: Vec<String> = errors.values().map(ToString::to_string).collect();
    if messages
        .iter()
        .any(|m| classify_write_error(m) == WriteErrorClass::Benign)
    {
        tracing::debug!(operation, errors = ?messages, "document write lost a race");
        return Ok(WriteOutcome::Conflict);
    }

    Err(StorageError::query(format!(
        "{operation} failed: {}",
        messages.join("; ")
    )))
}

fn query_error(operation: &str) -> impl Fn(surrealdb::Error) -> StorageError + '_ {
    move |e| StorageError::query(format!("{operation} failed: {e}"))
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Identity {
    key_id: String,
    value_type: String,
}

impl Identity {
    fn of(key: &KeyRecord) -> Self {
        Self {
            key_id: key.id.clone(),
            value_type: key.value_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyDocument {
    key_id: String,
    value_type: String,
    key_type: String,
    key_content: String,
}

impl KeyDocument {
    fn of(key: &KeyRecord) -> Self {
        Self {
            key_id: key.id.clone(),
            value_type: key.value_type.clone(),
            key_type: key.key_type.clone(),
            key_content: hex::encode(&key.content),
        }
    }

    fn into_record(self) -> StorageResult<KeyRecord> {
        let content = decode_hex(&self.key_content, "key content")?;
        Ok(KeyRecord {
            id: self.key_id,
            key_type: self.key_type,
            content,
            value_type: self.value_type,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlainDocument {
    key_id: String,
    value_type: String,
    key_type: String,
    key_content: String,
    content: String,
    version: i64,
    details: BTreeMap<String, String>,
}

impl PlainDocument {
    fn of(key: &KeyRecord, value: &ValueRecord) -> StorageResult<Self> {
        Ok(Self {
            key_id: key.id.clone(),
            value_type: key.value_type.clone(),
            key_type: key.key_type.clone(),
            key_content: hex::encode(&key.content),
            content: hex::encode(&value.content),
            version: version_to_column(value.version())?,
            details: value.audit.to_details(),
        })
    }

    fn into_value(self) -> StorageResult<ValueRecord> {
        decode_value(self.value_type, &self.content, self.version, &self.details)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkDocument {
    key_id: String,
    value_type: String,
    version: i64,
    value_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ValueDocument {
    value_id: String,
    key_id: String,
    value_type: String,
    version: i64,
    content: String,
    details: BTreeMap<String, String>,
}

impl ValueDocument {
    fn into_value(self) -> StorageResult<ValueRecord> {
        decode_value(self.value_type, &self.content, self.version, &self.details)
    }
}

fn decode_hex(raw: &str, what: &str) -> StorageResult<Vec<u8>> {
    hex::decode(raw).map_err(|e| StorageError::deserialization(format!("{what}: {e}")))
}

fn decode_value(
    value_type: String,
    content: &str,
    version: i64,
    details: &BTreeMap<String, String>,
) -> StorageResult<ValueRecord> {
    let audit = Audit::from_details(details)?;
    let version = version_from_column(version)?;
    if audit.version != version {
        return Err(StorageError::deserialization(format!(
            "audit version {} disagrees with stored version {version}",
            audit.version
        )));
    }
    Ok(ValueRecord::new(
        value_type,
        decode_hex(content, "value content")?,
        audit,
    ))
}

fn page_limit(limit: usize) -> usize {
    assert!(limit > 0, "limit must be positive");
    limit
}

// =============================================================================
// DocumentBackend
// =============================================================================

/// Connection to a SurrealDB endpoint with the storage schema applied.
#[derive(Clone)]
pub struct DocumentBackend {
    db: Surreal<Any>,
}

impl DocumentBackend {
    /// Connect to `endpoint` (`mem://`, `ws://host:port`, ...) and select
    /// `namespace` / `database`.
    ///
    /// # Errors
    /// Returns `Connection` if the endpoint is unreachable, `Query` if the
    /// schema cannot be applied.
    pub async fn connect(endpoint: &str, namespace: &str, database: &str) -> StorageResult<Self> {
        assert!(!endpoint.is_empty(), "endpoint cannot be empty");
        assert!(!namespace.is_empty(), "namespace cannot be empty");
        assert!(!database.is_empty(), "database cannot be empty");

        let db: Surreal<Any> = Surreal::init();
        db.connect(endpoint)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect to {endpoint}: {e}")))?;
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| StorageError::connection(format!("failed to select database: {e}")))?;

        let backend = Self { db };
        backend.init_schema().await?;

        tracing::info!(endpoint, namespace, database, "document backend connected");
        Ok(backend)
    }

    /// In-process store with default namespace and database.
    ///
    /// # Errors
    /// Returns an error if the in-memory engine cannot start.
    pub async fn memory() -> StorageResult<Self> {
        Self::connect(
            DOCUMENT_ENDPOINT_DEFAULT,
            DOCUMENT_NAMESPACE_DEFAULT,
            DOCUMENT_DATABASE_DEFAULT,
        )
        .await
    }

    async fn init_schema(&self) -> StorageResult<()> {
        self.db
            .query(SCHEMA)
            .await
            .and_then(Response::check)
            .map_err(|e| StorageError::query(format!("failed to apply schema: {e}")))?;
        Ok(())
    }

    /// Plain store over this connection.
    #[must_use]
    pub fn plain_store(&self) -> DocumentPlainStore {
        DocumentPlainStore {
            db: self.db.clone(),
        }
    }

    /// Historical store over this connection.
    #[must_use]
    pub fn historical_store(&self) -> DocumentHistoricalStore {
        DocumentHistoricalStore {
            db: self.db.clone(),
        }
    }
}

impl std::fmt::Debug for DocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBackend").finish_non_exhaustive()
    }
}

// =============================================================================
// Plain
// =============================================================================

/// Latest-value documents in `plain_records`.
#[derive(Clone)]
pub struct DocumentPlainStore {
    db: Surreal<Any>,
}

impl std::fmt::Debug for DocumentPlainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPlainStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PlainStore for DocumentPlainStore {
    async fn read(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        const OPERATION: &str = "plain.read";

        let mut response = self
            .db
            .query(
                "SELECT key_id, value_type, key_type, key_content, content, version, details
                 FROM plain_records WHERE key_id = $key_id AND value_type = $value_type",
            )
            .bind(Identity::of(key))
            .await
            .map_err(query_error(OPERATION))?;

        let rows: Vec<PlainDocument> = response.take(0).map_err(query_error(OPERATION))?;
        rows.into_iter().next().map(PlainDocument::into_value).transpose()
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, version = value.version()))]
    async fn insert(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
        let document = PlainDocument::of(key, value)?;

        let mut response = self
            .db
            .query("CREATE plain_records CONTENT $document RETURN NONE")
            .bind(("document", document))
            .await
            .map_err(query_error("plain.insert"))?;

        settle(&mut response, "plain.insert")
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, expected_version))]
    async fn replace(
        &self,
        key: &KeyRecord,
        expected_version: u64,
        value: &ValueRecord,
    ) -> StorageResult<WriteOutcome> {
        const OPERATION: &str = "plain.replace";
        let document = PlainDocument::of(key, value)?;
        let expected = version_to_column(expected_version)?;

        let mut response = self
            .db
            .query(
                "UPDATE plain_records
                 SET content = $content, version = $version, details = $details
                 WHERE key_id = $key_id AND value_type = $value_type AND version = $expected
                 RETURN AFTER",
            )
            .bind(Identity::of(key))
            .bind(("content", document.content))
            .bind(("version", document.version))
            .bind(("details", document.details))
            .bind(("expected", expected))
            .await
            .map_err(query_error(OPERATION))?;

        if settle(&mut response, OPERATION)? == WriteOutcome::Conflict {
            return Ok(WriteOutcome::Conflict);
        }

        // Zero matched documents: the version moved or the record is gone.
        let replaced: Vec<PlainDocument> = response.take(0).map_err(query_error(OPERATION))?;
        Ok(if replaced.is_empty() {
            WriteOutcome::Conflict
        } else {
            WriteOutcome::Committed
        })
    }

    #[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
    async fn remove(
        &self,
        key: &KeyRecord,
    ) -> StorageResult<RemoveOutcome<Option<ValueRecord>>> {
        const OPERATION: &str = "plain.remove";

        let mut response = self
            .db
            .query(
                "DELETE plain_records WHERE key_id = $key_id AND value_type = $value_type
                 RETURN BEFORE",
            )
            .bind(Identity::of(key))
            .await
            .map_err(query_error(OPERATION))?;

        if settle(&mut response, OPERATION)? == WriteOutcome::Conflict {
            return Ok(RemoveOutcome::Conflict);
        }
        let removed: Vec<PlainDocument> = response.take(0).map_err(query_error(OPERATION))?;
        let removed = removed.into_iter().next().map(PlainDocument::into_value).transpose()?;
        Ok(RemoveOutcome::Removed(removed))
    }

    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>> {
        const OPERATION: &str = "plain.keys";

        let sql = format!(
            "SELECT key_id, value_type, key_type, key_content FROM plain_records
             WHERE value_type = $value_type AND key_id > $after
             ORDER BY key_id LIMIT {}",
            page_limit(limit)
        );
        let mut response = self
            .db
            .query(sql)
            .bind(("value_type", value_type.to_string()))
            .bind(("after", after.unwrap_or_default().to_string()))
            .await
            .map_err(query_error(OPERATION))?;

        let rows: Vec<KeyDocument> = response.take(0).map_err(query_error(OPERATION))?;
        rows.into_iter().map(KeyDocument::into_record).collect()
    }
}

// =============================================================================
// Historical
// =============================================================================

/// Version chains across `hist_keys`, `hist_links` and `hist_values`.
#[derive(Clone)]
pub struct DocumentHistoricalStore {
    db: Surreal<Any>,
}

impl std::fmt::Debug for DocumentHistoricalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHistoricalStore")
            .finish_non_exhaustive()
    }
}

/// Delete links through `$version`, then sweep values and the key row
/// that no remaining link references. Statement 0 returns the deleted
/// links. One transaction, so a lost race rolls back the sweep too.
const TRIM: &str = "
    BEGIN TRANSACTION;
    DELETE hist_links
        WHERE key_id = $key_id AND value_type = $value_type AND version <= $version
        RETURN BEFORE;
    LET $live = (SELECT VALUE value_id FROM hist_links
        WHERE key_id = $key_id AND value_type = $value_type);
    DELETE hist_values
        WHERE key_id = $key_id AND value_type = $value_type
        AND value_id NOTINSIDE $live;
    IF array::len($live) = 0 {
        DELETE type::thing('hist_keys', [$key_id, $value_type]);
    };
    COMMIT TRANSACTION;
";

#[async_trait]
impl HistoricalStore for DocumentHistoricalStore {
    async fn read_latest(&self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        const OPERATION: &str = "historical.read_latest";

        let mut response = self
            .db
            .query(
                "LET $link = (SELECT value_id, version FROM hist_links
                     WHERE key_id = $key_id AND value_type = $value_type
                     ORDER BY version DESC LIMIT 1);
                 SELECT value_id, key_id, value_type, version, content, details
                     FROM hist_values WHERE value_id = $link[0].value_id;",
            )
            .bind(Identity::of(key))
            .await
            .map_err(query_error(OPERATION))?;

        let rows: Vec<ValueDocument> = response.take(1).map_err(query_error(OPERATION))?;
        rows.into_iter().next().map(ValueDocument::into_value).transpose()
    }

    async fn read_version(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<Option<ValueRecord>> {
        const OPERATION: &str = "historical.read_version";

        let mut response = self
            .db
            .query(
                "LET $link = (SELECT value_id FROM hist_links
                     WHERE key_id = $key_id AND value_type = $value_type AND version = $version);
                 SELECT value_id, key_id, value_type, version, content, details
                     FROM hist_values WHERE value_id = $link[0].value_id;",
            )
            .bind(Identity::of(key))
            .bind(("version", version_to_column(version)?))
            .await
            .map_err(query_error(OPERATION))?;

        let rows: Vec<ValueDocument> = response.take(1).map_err(query_error(OPERATION))?;
        rows.into_iter().next().map(ValueDocument::into_value).transpose()
    }

    #[tracing::instrument(skip(self, key, value), fields(key_id = %key.id, version = value.version()))]
    async fn append(&self, key: &KeyRecord, value: &ValueRecord) -> StorageResult<WriteOutcome> {
        assert!(value.version() >= 1, "appended value must be versioned");

        let version = version_to_column(value.version())?;
        let value_id = uuid::Uuid::new_v4().to_string();
        let link = LinkDocument {
            key_id: key.id.clone(),
            value_type: key.value_type.clone(),
            version,
            value_id: value_id.clone(),
        };
        let document = ValueDocument {
            value_id,
            key_id: key.id.clone(),
            value_type: key.value_type.clone(),
            version,
            content: hex::encode(&value.content),
            details: value.audit.to_details(),
        };

        let mut response = self
            .db
            .query(
                "BEGIN TRANSACTION;
                 CREATE hist_links CONTENT $link RETURN NONE;
                 CREATE hist_values CONTENT $value RETURN NONE;
                 UPSERT type::thing('hist_keys', [$key.key_id, $key.value_type]) CONTENT $key RETURN NONE;
                 COMMIT TRANSACTION;",
            )
            .bind(("link", link))
            .bind(("value", document))
            .bind(("key", KeyDocument::of(key)))
            .await
            .map_err(query_error("historical.append"))?;

        settle(&mut response, "historical.append")
    }

    #[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
    async fn remove_through(
        &self,
        key: &KeyRecord,
        version: u64,
    ) -> StorageResult<RemoveOutcome<u64>> {
        const OPERATION: &str = "historical.remove_through";

        let mut response = self
            .db
            .query(TRIM)
            .bind(Identity::of(key))
            .bind(("version", version_to_column(version)?))
            .await
            .map_err(query_error(OPERATION))?;

        if settle(&mut response, OPERATION)? == WriteOutcome::Conflict {
            return Ok(RemoveOutcome::Conflict);
        }
        let removed: Vec<LinkDocument> = response.take(0).map_err(query_error(OPERATION))?;
        Ok(RemoveOutcome::Removed(
            u64::try_from(removed.len()).unwrap_or(u64::MAX),
        ))
    }

    async fn keys_page(
        &self,
        value_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<KeyRecord>> {
        const OPERATION: &str = "historical.keys";

        let sql = format!(
            "SELECT key_id, value_type, key_type, key_content FROM hist_keys
             WHERE value_type = $value_type AND key_id > $after
             AND count((SELECT value_id FROM hist_links
                 WHERE key_id = $parent.key_id AND value_type = $parent.value_type LIMIT 1)) > 0
             ORDER BY key_id LIMIT {}",
            page_limit(limit)
        );
        let mut response = self
            .db
            .query(sql)
            .bind(("value_type", value_type.to_string()))
            .bind(("after", after.unwrap_or_default().to_string()))
            .await
            .map_err(query_error(OPERATION))?;

        let rows: Vec<KeyDocument> = response.take(0).map_err(query_error(OPERATION))?;
        rows.into_iter().map(KeyDocument::into_record).collect()
    }
}
