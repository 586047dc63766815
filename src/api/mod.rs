mod change;
mod database;
pub(crate) mod query;
mod reference;
mod snapshot;

pub use change::{compute_document_changes, DocumentChange, DocumentChangeType};
pub use database::Database;
pub use query::{
    Cursor, FieldFilter, FilterOperator, OrderBy, OrderDirection, Query, QueryDefinition,
    QuerySnapshot,
};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{DocumentSnapshot, SnapshotMetadata};
