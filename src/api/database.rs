use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::batch::Batch;
use crate::error::OdmResult;
use crate::model::ResourcePath;
use crate::store::DocumentStore;

use super::reference::{CollectionReference, DocumentReference};

/// Handle to one document store.
///
/// There is no process-wide default: every component that talks to the store
/// receives a `Database` (or a reference derived from one) explicitly.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    store: Arc<dyn DocumentStore>,
}

impl Database {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner { store }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Creates a `CollectionReference` pointing at `path` (e.g. `"rooms/eros/messages"`).
    pub fn collection(&self, path: &str) -> OdmResult<CollectionReference> {
        let resource = ResourcePath::from_string(path)?;
        CollectionReference::new(self.clone(), resource)
    }

    /// Creates a `DocumentReference` pointing at `path`.
    ///
    /// The path must contain an even number of segments (collection/doc pairs).
    pub fn doc(&self, path: &str) -> OdmResult<DocumentReference> {
        let resource = ResourcePath::from_string(path)?;
        DocumentReference::new(self.clone(), resource)
    }

    /// Starts a new batched write against this database.
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    pub fn same_store(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
