#![doc = include_str!("RUSTDOC.md")]

pub mod api;
pub mod batch;
pub mod codec;
pub mod data_source;
pub mod document;
pub mod error;
pub mod model;
pub mod platform;
pub mod storage;
pub mod store;
pub mod value;

pub use api::{
    CollectionReference, Database, DocumentChange, DocumentChangeType, DocumentReference,
    DocumentSnapshot, Query, QuerySnapshot,
};
pub use batch::{Batch, BatchState};
pub use data_source::{
    ChangeTypes, CollectionChange, DataSource, DataSourceOptions, Filter, IndexChanges, Page,
    SubscriptionState,
};
pub use document::{Document, ServerTimestamp};
pub use error::{OdmError, OdmErrorCode, OdmResult};
pub use storage::{BlobStore, InMemoryBlobStore, StorageFile, Uploader};
pub use store::{DocumentStore, InMemoryStore};

#[cfg(test)]
pub mod test_support;
