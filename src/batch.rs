use serde::Serialize;

use crate::api::{Database, DocumentReference};
use crate::document::Document;
use crate::error::{invalid_argument, invalid_state, resource_exhausted, OdmResult};
use crate::store::WriteOperation;
use crate::value::MapValue;

const MAX_BATCH_WRITES: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Committed,
}

/// Collects document writes and commits them atomically.
///
/// A batch commits at most once. Adding to or committing a batch that was already
/// committed yields `InvalidState` instead of silently doing nothing.
#[derive(Clone, Debug)]
pub struct Batch {
    database: Database,
    writes: Vec<WriteOperation>,
    state: BatchState,
}

impl Batch {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            writes: Vec::new(),
            state: BatchState::Open,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Queues a full overwrite of `document`.
    pub fn save<T>(&mut self, document: &Document<T>) -> OdmResult<&mut Self>
    where
        T: Serialize,
    {
        let write = document.set_operation()?;
        self.push(write)
    }

    /// Queues a field update of an existing `document`.
    pub fn update<T>(&mut self, document: &Document<T>) -> OdmResult<&mut Self>
    where
        T: Serialize,
    {
        let write = document.update_operation()?;
        self.push(write)
    }

    pub fn delete<T>(&mut self, document: &Document<T>) -> OdmResult<&mut Self> {
        self.push(document.delete_operation())
    }

    /// Queues a raw set on a reference, bypassing the typed document layer.
    pub fn set_fields(
        &mut self,
        reference: &DocumentReference,
        data: MapValue,
        merge: bool,
    ) -> OdmResult<&mut Self> {
        self.ensure_same_database(reference.database())?;
        self.push(WriteOperation::Set {
            key: reference.key().clone(),
            data,
            merge,
        })
    }

    pub fn delete_reference(&mut self, reference: &DocumentReference) -> OdmResult<&mut Self> {
        self.ensure_same_database(reference.database())?;
        self.push(WriteOperation::Delete {
            key: reference.key().clone(),
        })
    }

    /// Commits all queued writes atomically.
    pub async fn commit(&mut self) -> OdmResult<()> {
        self.ensure_open()?;
        let writes = std::mem::take(&mut self.writes);
        self.state = BatchState::Committed;
        log::debug!("committing batch of {} writes", writes.len());
        self.database.store().commit(writes).await
    }

    fn push(&mut self, write: WriteOperation) -> OdmResult<&mut Self> {
        self.ensure_open()?;
        self.ensure_capacity()?;
        self.writes.push(write);
        Ok(self)
    }

    fn ensure_open(&self) -> OdmResult<()> {
        match self.state {
            BatchState::Open => Ok(()),
            BatchState::Committed => Err(invalid_state("Batch has already been committed")),
        }
    }

    fn ensure_same_database(&self, other: &Database) -> OdmResult<()> {
        if !self.database.same_store(other) {
            return Err(invalid_argument(
                "All Batch operations must target the same database",
            ));
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> OdmResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(format!(
                "Batch cannot contain more than {MAX_BATCH_WRITES} operations"
            )));
        }
        Ok(())
    }
}
