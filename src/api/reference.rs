use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::fmt::{Display, Formatter};

use crate::error::{invalid_argument, OdmResult};
use crate::model::{DocumentKey, ResourcePath};
use crate::store::WriteOperation;
use crate::value::MapValue;

use super::database::Database;
use super::query::Query;
use super::snapshot::DocumentSnapshot;

const AUTO_ID_LENGTH: usize = 20;

#[derive(Clone, Debug)]
pub struct CollectionReference {
    database: Database,
    path: ResourcePath,
}

impl CollectionReference {
    pub(crate) fn new(database: Database, path: ResourcePath) -> OdmResult<Self> {
        if path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Collection references must point to a collection (odd number of segments)",
            ));
        }
        Ok(Self { database, path })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The full resource path of the collection (e.g. `rooms/eros/messages`).
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Returns a reference to the document identified by `document_id`.
    ///
    /// When `document_id` is `None`, an auto-ID is generated.
    pub fn doc(&self, document_id: Option<&str>) -> OdmResult<DocumentReference> {
        let id = document_id
            .map(|id| id.to_string())
            .unwrap_or_else(generate_auto_id);
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument(
                "Document ID must be non-empty and cannot contain '/'",
            ));
        }
        DocumentReference::new(self.database.clone(), self.path.child([id]))
    }

    /// Creates a query that targets this collection.
    pub fn query(&self) -> Query {
        Query::new(self.database.clone(), self.path.clone())
            .expect("CollectionReference always points to a valid collection")
    }
}

impl Display for CollectionReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CollectionReference({})", self.path)
    }
}

#[derive(Clone, Debug)]
pub struct DocumentReference {
    database: Database,
    key: DocumentKey,
}

impl DocumentReference {
    pub(crate) fn new(database: Database, path: ResourcePath) -> OdmResult<Self> {
        let key = DocumentKey::from_path(path)?;
        Ok(Self { database, key })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        CollectionReference {
            database: self.database.clone(),
            path: self.key.collection_path(),
        }
    }

    /// Returns a subcollection nested under this document.
    pub fn collection(&self, id: &str) -> OdmResult<CollectionReference> {
        let relative = ResourcePath::from_string(id)?;
        CollectionReference::new(self.database.clone(), self.path().child(relative.iter().cloned()))
    }

    /// Point read of this document.
    pub async fn get(&self) -> OdmResult<DocumentSnapshot> {
        self.database.store().get_document(&self.key).await
    }

    /// Overwrites (or with `merge`, merges into) the stored fields.
    pub async fn set(&self, data: MapValue, merge: bool) -> OdmResult<()> {
        let write = WriteOperation::Set {
            key: self.key.clone(),
            data,
            merge,
        };
        self.database.store().commit(vec![write]).await
    }

    /// Updates the listed fields of an existing document.
    pub async fn update(&self, data: MapValue) -> OdmResult<()> {
        let write = WriteOperation::Update {
            key: self.key.clone(),
            data,
        };
        self.database.store().commit(vec![write]).await
    }

    pub async fn delete(&self) -> OdmResult<()> {
        let write = WriteOperation::Delete {
            key: self.key.clone(),
        };
        self.database.store().commit(vec![write]).await
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentReference({})", self.key)
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LENGTH)
        .map(char::from)
        .collect()
}
