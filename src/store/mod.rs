//! The document-store collaborator.
//!
//! Everything durable (persistence, consistency, change delivery) belongs to the
//! store. The rest of the crate only relies on the [`DocumentStore`] contract.

use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::api::{DocumentSnapshot, QueryDefinition, QuerySnapshot};
use crate::error::OdmResult;
use crate::model::DocumentKey;
use crate::value::MapValue;

pub mod in_memory;
pub(crate) mod query_evaluator;

pub use in_memory::InMemoryStore;

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        merge: bool,
    },
    /// Field keys may be dot-separated paths; the document must exist.
    Update {
        key: DocumentKey,
        data: MapValue,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> OdmResult<DocumentSnapshot>;

    async fn run_query(&self, query: &QueryDefinition) -> OdmResult<QuerySnapshot>;

    /// Subscribes to `query`. The first item describes the current result set.
    async fn listen(
        &self,
        query: &QueryDefinition,
        include_metadata_changes: bool,
    ) -> OdmResult<ListenRegistration>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOperation>) -> OdmResult<()>;
}

pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Live subscription handle; a stream of snapshots that unsubscribes on drop.
pub struct ListenRegistration {
    stream: BoxStream<'static, OdmResult<QuerySnapshot>>,
    unsubscribe: Option<Unsubscribe>,
}

impl ListenRegistration {
    pub fn new(
        stream: BoxStream<'static, OdmResult<QuerySnapshot>>,
        unsubscribe: Option<Unsubscribe>,
    ) -> Self {
        Self {
            stream,
            unsubscribe,
        }
    }

    /// Cancels the subscription now instead of at drop time.
    pub fn detach(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Stream for ListenRegistration {
    type Item = OdmResult<QuerySnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl Drop for ListenRegistration {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Debug for ListenRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenRegistration")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
