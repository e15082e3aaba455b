//! Records - Universal Key/Value/Audit Shapes
//!
//! `TigerStyle`: Every backend reads and writes exactly these three shapes.
//!
//! A key identity is the pair (`id`, `value_type`): the same hashed key may
//! address different values when the value types differ.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Details entry holding the correlation id.
pub const DETAIL_CORRELATION_ID: &str = "CorrelationId";
/// Details entry holding the acting user.
pub const DETAIL_USER: &str = "User";
/// Details entry holding the creation instant (RFC 3339).
pub const DETAIL_CREATED: &str = "Created";
/// Details entry holding the last update instant (RFC 3339).
pub const DETAIL_UPDATED: &str = "Updated";
/// Details entry holding the version number.
pub const DETAIL_VERSION: &str = "Version";

// =============================================================================
// KeyRecord
// =============================================================================

/// Identity plus opaque content for an addressed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Content hash of the key
    pub id: String,
    /// Logical key type name
    pub key_type: String,
    /// Opaque key payload
    pub content: Vec<u8>,
    /// Logical value type name
    pub value_type: String,
}

impl KeyRecord {
    /// Create a key record.
    ///
    /// # Panics
    /// Panics if `id` or `value_type` is empty.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        key_type: impl Into<String>,
        content: Vec<u8>,
        value_type: impl Into<String>,
    ) -> Self {
        let record = Self {
            id: id.into(),
            key_type: key_type.into(),
            content,
            value_type: value_type.into(),
        };

        assert!(!record.id.is_empty(), "key id must not be empty");
        assert!(!record.value_type.is_empty(), "value type must not be empty");
        record
    }

    /// The (`id`, `value_type`) pair that addresses stored values.
    #[must_use]
    pub fn identity(&self) -> KeyIdentity {
        KeyIdentity {
            id: self.id.clone(),
            value_type: self.value_type.clone(),
        }
    }
}

/// Hashable identity of a key within its value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyIdentity {
    /// Content hash of the key
    pub id: String,
    /// Logical value type name
    pub value_type: String,
}

// =============================================================================
// Audit
// =============================================================================

/// Bookkeeping attached to each value version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    /// Correlation id of the write that produced this version
    pub correlation_id: Option<String>,
    /// User that produced this version
    pub user: Option<String>,
    /// When the first version for the key identity was written
    pub created: DateTime<Utc>,
    /// When this version was written
    pub updated: DateTime<Utc>,
    /// Version number, starting at 1
    pub version: u64,
    /// Extensible properties carried alongside the standard fields
    pub extra: BTreeMap<String, String>,
}

impl Audit {
    /// Create an unversioned audit stamped at `now`.
    ///
    /// The write cycle assigns the version when the value is accepted.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            correlation_id: None,
            user: None,
            created: now,
            updated: now,
            version: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attach an extensible property.
    #[must_use]
    pub fn with_detail(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Flatten into the string map persisted by backends.
    #[must_use]
    pub fn to_details(&self) -> BTreeMap<String, String> {
        let mut details = self.extra.clone();
        if let Some(correlation_id) = &self.correlation_id {
            details.insert(DETAIL_CORRELATION_ID.to_string(), correlation_id.clone());
        }
        if let Some(user) = &self.user {
            details.insert(DETAIL_USER.to_string(), user.clone());
        }
        details.insert(DETAIL_CREATED.to_string(), self.created.to_rfc3339());
        details.insert(DETAIL_UPDATED.to_string(), self.updated.to_rfc3339());
        details.insert(DETAIL_VERSION.to_string(), self.version.to_string());
        details
    }

    /// Rebuild from a persisted string map.
    ///
    /// # Errors
    /// Returns `Deserialization` if a standard entry is missing or malformed.
    pub fn from_details(details: &BTreeMap<String, String>) -> StorageResult<Self> {
        let mut extra = details.clone();
        let correlation_id = extra.remove(DETAIL_CORRELATION_ID);
        let user = extra.remove(DETAIL_USER);
        let created = parse_instant(extra.remove(DETAIL_CREATED), DETAIL_CREATED)?;
        let updated = parse_instant(extra.remove(DETAIL_UPDATED), DETAIL_UPDATED)?;
        let version = extra
            .remove(DETAIL_VERSION)
            .ok_or_else(|| StorageError::deserialization("audit details missing Version"))?
            .parse::<u64>()
            .map_err(|e| StorageError::deserialization(format!("audit Version: {e}")))?;

        Ok(Self {
            correlation_id,
            user,
            created,
            updated,
            version,
            extra,
        })
    }
}

fn parse_instant(raw: Option<String>, name: &str) -> StorageResult<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| StorageError::deserialization(format!("audit details missing {name}")))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::deserialization(format!("audit {name}: {e}")))
}

// =============================================================================
// ValueRecord
// =============================================================================

/// Opaque payload plus audit metadata for one version of a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    /// Logical value type name
    pub value_type: String,
    /// Opaque value payload
    pub content: Vec<u8>,
    /// Version bookkeeping
    pub audit: Audit,
}

impl ValueRecord {
    /// Create a value record.
    #[must_use]
    pub fn new(value_type: impl Into<String>, content: Vec<u8>, audit: Audit) -> Self {
        Self {
            value_type: value_type.into(),
            content,
            audit,
        }
    }

    /// Version number of this record.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.audit.version
    }

    /// Reject a factory result whose value type does not match `key`.
    pub(crate) fn checked_for(self, key: &KeyRecord) -> StorageResult<Self> {
        if self.value_type == key.value_type {
            Ok(self)
        } else {
            Err(StorageError::invalid_argument(format!(
                "factory produced `{}` for a key of value type `{}`",
                self.value_type, key.value_type
            )))
        }
    }

    /// Stamp as the first version of a key identity.
    #[must_use]
    pub(crate) fn into_first(mut self) -> Self {
        self.audit.version = 1;
        self.audit.created = self.audit.updated;
        self
    }

    /// Stamp as the successor of `previous`.
    ///
    /// The creation instant is inherited from the previous version.
    #[must_use]
    pub(crate) fn into_successor(mut self, previous: &ValueRecord) -> Self {
        assert!(previous.audit.version >= 1, "previous version must be stamped");

        self.audit.version = previous.audit.version + 1;
        self.audit.created = previous.audit.created;

        assert!(self.audit.version > previous.audit.version);
        self
    }
}
