//! Converters - Native Keys and Values to Records
//!
//! `TigerStyle`: Three small seams, each with a default implementation.
//!
//! - [`ValueCodec`]: value ⇄ payload bytes ([`JsonCodec`])
//! - [`KeyHasher`]: key → (id, content) and back ([`Sha256KeyHasher`])
//! - [`AuditContext`]: who/when for each write ([`SystemAuditContext`],
//!   [`SimAuditContext`])
//!
//! [`RecordConverter`] composes them for one key/value type pair.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use vellum_core::constants::{KEY_CONTENT_BYTES_MAX, TYPE_NAME_BYTES_MAX, VALUE_CONTENT_BYTES_MAX};
use vellum_core::dst::SimClock;

use crate::storage::{Audit, KeyRecord, StorageError, StorageResult, ValueRecord};

// =============================================================================
// ValueCodec
// =============================================================================

/// Serializes values to opaque payload bytes.
pub trait ValueCodec<V>: Send + Sync {
    /// Encode a value.
    ///
    /// # Errors
    /// Returns `Serialization` if the value cannot be encoded.
    fn encode(&self, value: &V) -> StorageResult<Vec<u8>>;

    /// Decode a payload.
    ///
    /// # Errors
    /// Returns `Deserialization` if the payload is malformed.
    fn decode(&self, content: &[u8]) -> StorageResult<V>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for JsonCodec {
    fn encode(&self, value: &V) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StorageError::serialization(e.to_string()))
    }

    fn decode(&self, content: &[u8]) -> StorageResult<V> {
        serde_json::from_slice(content).map_err(|e| StorageError::deserialization(e.to_string()))
    }
}

// =============================================================================
// KeyHasher
// =============================================================================

/// Maps keys to a content-hash id plus restorable content.
pub trait KeyHasher<K>: Send + Sync {
    /// Return `(id, content)` for `key`. Equal keys yield equal ids.
    ///
    /// # Errors
    /// Returns `Serialization` if the key cannot be encoded.
    fn hash(&self, key: &K) -> StorageResult<(String, Vec<u8>)>;

    /// Rebuild a key from its stored content.
    ///
    /// # Errors
    /// Returns `Deserialization` if the content is malformed.
    fn restore(&self, content: &[u8]) -> StorageResult<K>;
}

/// Id = lowercase hex SHA-256 of the key's JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyHasher;

impl<K: Serialize + DeserializeOwned> KeyHasher<K> for Sha256KeyHasher {
    fn hash(&self, key: &K) -> StorageResult<(String, Vec<u8>)> {
        let content = serde_json::to_vec(key).map_err(|e| StorageError::serialization(e.to_string()))?;
        let id = hex::encode(Sha256::digest(&content));

        assert_eq!(id.len(), 64, "sha256 hex digest must be 64 chars");
        Ok((id, content))
    }

    fn restore(&self, content: &[u8]) -> StorageResult<K> {
        serde_json::from_slice(content).map_err(|e| StorageError::deserialization(e.to_string()))
    }
}

// =============================================================================
// AuditContext
// =============================================================================

/// Supplies the audit stamp for each write.
pub trait AuditContext: Send + Sync + fmt::Debug {
    /// A fresh, unversioned audit for one write.
    fn stamp(&self) -> Audit;
}

/// Wall-clock audits. Without a fixed correlation id each stamp gets a
/// random UUID.
#[derive(Debug, Clone, Default)]
pub struct SystemAuditContext {
    user: Option<String>,
    correlation_id: Option<String>,
}

impl SystemAuditContext {
    /// Create an anonymous context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute writes to `user`.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Use one correlation id for every write.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl AuditContext for SystemAuditContext {
    fn stamp(&self) -> Audit {
        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let audit = Audit::new(Utc::now()).with_correlation_id(correlation_id);
        match &self.user {
            Some(user) => audit.with_user(user.clone()),
            None => audit,
        }
    }
}

/// Audits driven by a [`SimClock`] with sequential correlation ids.
#[derive(Debug, Default)]
pub struct SimAuditContext {
    clock: SimClock,
    sequence: AtomicU64,
}

impl SimAuditContext {
    /// Stamp writes from `clock`.
    #[must_use]
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            sequence: AtomicU64::new(0),
        }
    }
}

impl AuditContext for SimAuditContext {
    fn stamp(&self) -> Audit {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Audit::new(self.clock.now()).with_correlation_id(format!("sim-{n}"))
    }
}

// =============================================================================
// RecordConverter
// =============================================================================

/// Converts one native key/value type pair to records and back.
pub struct RecordConverter<K, V> {
    key_type: String,
    value_type: String,
    hasher: Arc<dyn KeyHasher<K>>,
    codec: Arc<dyn ValueCodec<V>>,
    audit: Arc<dyn AuditContext>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RecordConverter<K, V>
where
    K: Serialize + DeserializeOwned + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    /// JSON payloads, SHA-256 key ids, wall-clock audits, and Rust type
    /// names as logical type names.
    #[must_use]
    pub fn new() -> Self {
        Self {
            key_type: std::any::type_name::<K>().to_string(),
            value_type: std::any::type_name::<V>().to_string(),
            hasher: Arc::new(Sha256KeyHasher),
            codec: Arc::new(JsonCodec),
            audit: Arc::new(SystemAuditContext::new()),
            _types: PhantomData,
        }
    }
}

impl<K, V> Default for RecordConverter<K, V>
where
    K: Serialize + DeserializeOwned + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RecordConverter<K, V> {
    /// Override the logical key type name.
    ///
    /// # Panics
    /// Panics if the name is empty or longer than `TYPE_NAME_BYTES_MAX`.
    #[must_use]
    pub fn with_key_type(mut self, name: impl Into<String>) -> Self {
        self.key_type = checked_type_name(name.into());
        self
    }

    /// Override the logical value type name.
    ///
    /// # Panics
    /// Panics if the name is empty or longer than `TYPE_NAME_BYTES_MAX`.
    #[must_use]
    pub fn with_value_type(mut self, name: impl Into<String>) -> Self {
        self.value_type = checked_type_name(name.into());
        self
    }

    /// Replace the key hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher<K>>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replace the value codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec<V>>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the audit context.
    #[must_use]
    pub fn with_audit_context(mut self, audit: Arc<dyn AuditContext>) -> Self {
        self.audit = audit;
        self
    }

    /// Logical key type name.
    #[must_use]
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Logical value type name.
    #[must_use]
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Convert a native key.
    ///
    /// # Errors
    /// Returns `Serialization` if hashing fails, `InvalidArgument` if the
    /// key content exceeds `KEY_CONTENT_BYTES_MAX`.
    pub fn key_record(&self, key: &K) -> StorageResult<KeyRecord> {
        let (id, content) = self.hasher.hash(key)?;
        if content.len() > KEY_CONTENT_BYTES_MAX {
            return Err(StorageError::invalid_argument(format!(
                "key content {} bytes exceeds {KEY_CONTENT_BYTES_MAX}",
                content.len()
            )));
        }
        if id.is_empty() {
            return Err(StorageError::serialization("key hasher produced an empty id"));
        }
        Ok(KeyRecord::new(id, self.key_type.clone(), content, self.value_type.clone()))
    }

    /// Convert a native value, stamping a fresh audit.
    ///
    /// # Errors
    /// Returns `Serialization` if encoding fails, `InvalidArgument` if the
    /// payload exceeds `VALUE_CONTENT_BYTES_MAX`.
    pub fn value_record(&self, value: &V) -> StorageResult<ValueRecord> {
        let content = self.codec.encode(value)?;
        if content.len() > VALUE_CONTENT_BYTES_MAX {
            return Err(StorageError::invalid_argument(format!(
                "value content {} bytes exceeds {VALUE_CONTENT_BYTES_MAX}",
                content.len()
            )));
        }
        Ok(ValueRecord::new(self.value_type.clone(), content, self.audit.stamp()))
    }

    /// Decode a stored value.
    ///
    /// # Errors
    /// Returns `Deserialization` if the record belongs to another value
    /// type or its payload is malformed.
    pub fn value(&self, record: &ValueRecord) -> StorageResult<V> {
        if record.value_type != self.value_type {
            return Err(StorageError::deserialization(format!(
                "record of value type `{}` read as `{}`",
                record.value_type, self.value_type
            )));
        }
        self.codec.decode(&record.content)
    }

    /// Decode a stored key.
    ///
    /// # Errors
    /// Returns `Deserialization` if the content is malformed.
    pub fn key(&self, record: &KeyRecord) -> StorageResult<K> {
        self.hasher.restore(&record.content)
    }
}

impl<K, V> fmt::Debug for RecordConverter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordConverter")
            .field("key_type", &self.key_type)
            .field("value_type", &self.value_type)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

fn checked_type_name(name: String) -> String {
    assert!(!name.is_empty(), "type name cannot be empty");
    assert!(
        name.len() <= TYPE_NAME_BYTES_MAX,
        "type name exceeds {TYPE_NAME_BYTES_MAX} bytes"
    );
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderKey {
        tenant: String,
        number: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        total_cents: u64,
        lines: Vec<String>,
    }

    fn order_key() -> OrderKey {
        OrderKey {
            tenant: "acme".into(),
            number: 7,
        }
    }

    #[test]
    fn test_equal_keys_hash_equal() {
        let converter = RecordConverter::<OrderKey, Order>::new();
        let a = converter.key_record(&order_key()).unwrap();
        let b = converter.key_record(&order_key()).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
        assert_eq!(converter.key(&a).unwrap(), order_key());
    }

    #[test]
    fn test_value_roundtrip_keeps_type_tag() {
        let converter = RecordConverter::<OrderKey, Order>::new().with_value_type("Order");
        let order = Order {
            total_cents: 1250,
            lines: vec!["widget".into()],
        };

        let record = converter.value_record(&order).unwrap();
        assert_eq!(record.value_type, "Order");
        assert_eq!(record.version(), 0);
        assert_eq!(converter.value(&record).unwrap(), order);
    }

    #[test]
    fn test_value_type_mismatch_rejected() {
        let orders = RecordConverter::<OrderKey, Order>::new().with_value_type("Order");
        let other = RecordConverter::<OrderKey, Order>::new().with_value_type("Invoice");
        let record = other
            .value_record(&Order {
                total_cents: 1,
                lines: vec![],
            })
            .unwrap();

        assert!(matches!(
            orders.value(&record),
            Err(StorageError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let converter = RecordConverter::<String, u32>::new();
        let huge = "k".repeat(KEY_CONTENT_BYTES_MAX + 1);

        assert!(matches!(
            converter.key_record(&huge),
            Err(StorageError::InvalidArgument { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "type name cannot be empty")]
    fn test_empty_type_name_panics() {
        let _ = RecordConverter::<String, u32>::new().with_value_type("");
    }

    #[test]
    fn test_sim_audit_is_deterministic() {
        let clock = SimClock::at_ms(5_000);
        let audits = SimAuditContext::new(clock.clone());

        let first = audits.stamp();
        clock.advance_ms(1_000);
        let second = audits.stamp();

        assert_eq!(first.correlation_id.as_deref(), Some("sim-1"));
        assert_eq!(second.correlation_id.as_deref(), Some("sim-2"));
        assert_eq!((second.updated - first.updated).num_milliseconds(), 1_000);
    }

    #[test]
    fn test_system_audit_user() {
        let audit = SystemAuditContext::new().with_user("ops").stamp();
        assert_eq!(audit.user.as_deref(), Some("ops"));
        assert!(audit.correlation_id.is_some());
    }
}
