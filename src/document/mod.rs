//! Typed projection of stored documents.

mod server_timestamp;

pub use server_timestamp::ServerTimestamp;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::{CollectionReference, Database, DocumentReference, DocumentSnapshot};
use crate::codec;
use crate::error::{invalid_reference, OdmResult};
use crate::model::{DocumentKey, ResourcePath};
use crate::store::WriteOperation;
use crate::value::{FieldValue, MapValue};

pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A stored document decoded into `T`.
///
/// Documents are plain values: they know their key but hold no handle to the
/// store or to any collection mirror that contains them.
#[derive(Clone, Debug, PartialEq)]
pub struct Document<T> {
    key: DocumentKey,
    data: T,
    exists: bool,
    created_at: ServerTimestamp,
    updated_at: ServerTimestamp,
}

impl<T> Document<T> {
    /// A new, not yet saved document with an auto-generated id.
    pub fn new(collection: &CollectionReference, data: T) -> OdmResult<Self> {
        let reference = collection.doc(None)?;
        Ok(Self::with_key(reference.key().clone(), data))
    }

    pub fn with_id(collection: &CollectionReference, id: &str, data: T) -> OdmResult<Self> {
        let reference = collection.doc(Some(id))?;
        Ok(Self::with_key(reference.key().clone(), data))
    }

    pub fn with_key(key: DocumentKey, data: T) -> Self {
        Self {
            key,
            data,
            exists: false,
            created_at: ServerTimestamp::Pending,
            updated_at: ServerTimestamp::Pending,
        }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn reference(&self, database: &Database) -> OdmResult<DocumentReference> {
        database.doc(&self.key.path().canonical_string())
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Whether the document was read back from the store.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn created_at(&self) -> ServerTimestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> ServerTimestamp {
        self.updated_at
    }

    /// Replaces both timestamps, e.g. when rebuilding a document from another source.
    pub fn with_timestamps(mut self, created_at: ServerTimestamp, updated_at: ServerTimestamp) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn delete_operation(&self) -> WriteOperation {
        WriteOperation::Delete {
            key: self.key.clone(),
        }
    }

    pub async fn delete(&self, database: &Database) -> OdmResult<()> {
        database.store().commit(vec![self.delete_operation()]).await
    }
}

impl<T> Document<T>
where
    T: DeserializeOwned,
{
    /// Decodes a snapshot. A snapshot without data has no payload to decode and is
    /// rejected with `InvalidReference`.
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> OdmResult<Self> {
        let Some(map) = snapshot.data() else {
            return Err(invalid_reference(format!(
                "document {} does not exist",
                snapshot.key()
            )));
        };

        let mut payload = map.clone();
        let created_at = ServerTimestamp::decode(payload.remove(CREATED_AT_FIELD).as_ref());
        let updated_at = ServerTimestamp::decode(payload.remove(UPDATED_AT_FIELD).as_ref());
        let data = codec::decode(&payload)?;

        Ok(Self {
            key: snapshot.key().clone(),
            data,
            exists: true,
            created_at,
            updated_at,
        })
    }

    /// Point read; `None` when the document does not exist.
    pub async fn get(reference: &DocumentReference) -> OdmResult<Option<Self>> {
        let snapshot = reference.get().await?;
        if !snapshot.exists() {
            return Ok(None);
        }
        Self::from_snapshot(&snapshot).map(Some)
    }
}

impl<T> Document<T>
where
    T: Serialize,
{
    /// Encodes the payload with both timestamp fields as currently known.
    pub fn encode(&self) -> OdmResult<MapValue> {
        let mut map = codec::encode(&self.data)?;
        map.insert(CREATED_AT_FIELD, self.created_at.encode());
        map.insert(UPDATED_AT_FIELD, self.updated_at.encode());
        Ok(map)
    }

    /// Full overwrite. `updatedAt` is always reassigned by the server; `createdAt`
    /// keeps its resolved value or is assigned on first save.
    pub fn set_operation(&self) -> OdmResult<WriteOperation> {
        let mut data = codec::encode(&self.data)?;
        data.insert(CREATED_AT_FIELD, self.created_at.encode());
        data.insert(UPDATED_AT_FIELD, FieldValue::server_timestamp());
        Ok(WriteOperation::Set {
            key: self.key.clone(),
            data,
            merge: false,
        })
    }

    /// Field update of an existing document; `createdAt` is left untouched.
    pub fn update_operation(&self) -> OdmResult<WriteOperation> {
        let mut data = codec::encode(&self.data)?;
        data.insert(UPDATED_AT_FIELD, FieldValue::server_timestamp());
        Ok(WriteOperation::Update {
            key: self.key.clone(),
            data,
        })
    }

    pub async fn save(&self, database: &Database) -> OdmResult<()> {
        database.store().commit(vec![self.set_operation()?]).await
    }

    pub async fn update(&self, database: &Database) -> OdmResult<()> {
        database.store().commit(vec![self.update_operation()?]).await
    }
}
