//! Core types for synchronized collections.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Field name under which a record's id is exposed when flattened.
pub const ID_FIELD: &str = "id";

/// Arbitrary document payload. No schema is enforced.
pub type Fields = serde_json::Map<String, Value>;

/// Identifier of a document within a collection.
///
/// Non-empty and free of `/`, which remote document stores reserve as a
/// path separator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(SyncError::InvalidDocumentId(id));
        }
        Ok(DocumentId(id))
    }

    /// Fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        DocumentId(Uuid::new_v4().to_string())
    }

    /// Wrap an id produced by code that upholds the id rules itself.
    pub(crate) fn from_trusted(id: String) -> Self {
        debug_assert!(!id.is_empty() && !id.contains('/'));
        DocumentId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        DocumentId::new(value)
    }
}

impl TryFrom<&str> for DocumentId {
    type Error = SyncError;

    fn try_from(value: &str) -> Result<Self> {
        DocumentId::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A document as mirrored from the remote collection.
///
/// Serializes flattened, `{"id": ..., ...fields}`, which is the shape a UI
/// renders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: DocumentId,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Build a record. An `id` key inside `fields` is dropped; the record id
    /// is authoritative.
    pub fn new(id: DocumentId, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self { id, fields }
    }

    /// Build a record from any serializable value that encodes as an object.
    pub fn from_typed<T: Serialize>(id: DocumentId, value: &T) -> Result<Self> {
        Ok(Self::new(id, to_fields(value)?))
    }

    /// Decode into a typed value. The id is visible to `T` under `"id"`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// Flattened JSON form.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        Value::Object(object)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Input to [`CollectionStore::add`](crate::store::CollectionStore::add).
/// When `id` is `None` the store assigns one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewRecord {
    pub id: Option<DocumentId>,
    pub fields: Fields,
}

impl NewRecord {
    pub fn new(mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self { id: None, fields }
    }

    pub fn with_id(id: DocumentId, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self { id: Some(id), fields }
    }

    /// Build from a serializable value. A non-empty string `"id"` field is
    /// taken as the requested id; a null or missing one leaves it unassigned.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self> {
        let mut fields = to_fields(value)?;
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => Some(DocumentId::new(s)?),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(other) => {
                return Err(SyncError::Serialization(format!(
                    "id must be a string, got {other}"
                )))
            }
        };
        Ok(Self { id, fields })
    }

    pub(crate) fn into_record(self, id: DocumentId) -> Record {
        Record::new(id, self.fields)
    }
}

impl From<Fields> for NewRecord {
    fn from(fields: Fields) -> Self {
        NewRecord::new(fields)
    }
}

impl From<Record> for NewRecord {
    fn from(record: Record) -> Self {
        NewRecord {
            id: Some(record.id),
            fields: record.fields,
        }
    }
}

/// The store's current best knowledge of a remote collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionSnapshot {
    /// Records in remote delivery order.
    pub records: Vec<Record>,
    /// Last subscription-level error, cleared by the next good delivery.
    pub error: Option<SyncError>,
    /// Number of remote snapshots applied so far. Zero before the first one.
    pub revision: u64,
}

impl CollectionSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Whether at least one remote delivery has been applied.
    pub fn is_synced(&self) -> bool {
        self.revision > 0
    }
}

fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Serialization(format!(
            "document must serialize to an object, got {other}"
        ))),
    }
}
