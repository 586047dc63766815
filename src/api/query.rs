use crate::error::{invalid_argument, OdmResult};
use crate::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::store::{query_evaluator, ListenRegistration};
use crate::value::FieldValue;

use super::change::{DocumentChange, DocumentChangeType};
use super::database::Database;
use super::snapshot::{DocumentSnapshot, SnapshotMetadata};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    In,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FieldValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// Position right after a consumed document, expressed in the query's ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    values: Vec<FieldValue>,
    key: DocumentKey,
}

impl Cursor {
    pub fn new(values: Vec<FieldValue>, key: DocumentKey) -> Self {
        Self { values, key }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

/// Store-facing description of a query: what the collaborator evaluates.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
    start_after: Option<Cursor>,
}

impl QueryDefinition {
    pub fn new(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn start_after(&self) -> Option<&Cursor> {
        self.start_after.as_ref()
    }

    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }
}

/// A query over one collection.
#[derive(Clone, Debug)]
pub struct Query {
    database: Database,
    definition: QueryDefinition,
}

impl Query {
    pub(crate) fn new(database: Database, collection_path: ResourcePath) -> OdmResult<Self> {
        if collection_path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Queries must reference a collection (odd number of path segments)",
            ));
        }
        Ok(Self {
            database,
            definition: QueryDefinition::new(collection_path),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.definition.collection_path
    }

    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: FieldValue,
    ) -> OdmResult<Self> {
        let field = field.into_field_path()?;
        let mut next = self.clone();
        next.definition.filters.push(FieldFilter {
            field,
            operator,
            value,
        });
        Ok(next)
    }

    pub fn order_by(&self, field: impl IntoFieldPath, direction: OrderDirection) -> OdmResult<Self> {
        if self.definition.start_after.is_some() {
            return Err(invalid_argument(
                "order_by must be applied before a cursor is set",
            ));
        }
        let field = field.into_field_path()?;
        let mut next = self.clone();
        next.definition.order_by.push(OrderBy { field, direction });
        Ok(next)
    }

    pub fn limit(&self, limit: u32) -> OdmResult<Self> {
        if limit == 0 {
            return Err(invalid_argument("limit must be greater than zero"));
        }
        let mut next = self.clone();
        next.definition.limit = Some(limit);
        Ok(next)
    }

    /// Returns a query that resumes right after `snapshot` in this query's ordering.
    pub fn start_after(&self, snapshot: &DocumentSnapshot) -> Self {
        self.start_after_cursor(self.cursor_for(snapshot))
    }

    pub fn start_after_cursor(&self, cursor: Cursor) -> Self {
        let mut next = self.clone();
        next.definition.start_after = Some(cursor);
        next
    }

    /// Drops any cursor, returning the query to its first page.
    pub fn without_cursor(&self) -> Self {
        let mut next = self.clone();
        next.definition.start_after = None;
        next
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.definition.start_after.as_ref()
    }

    pub fn cursor_for(&self, snapshot: &DocumentSnapshot) -> Cursor {
        let values = self
            .definition
            .order_by
            .iter()
            .map(|order| query_evaluator::field_value(snapshot, order.field()))
            .collect();
        Cursor::new(values, snapshot.key().clone())
    }

    /// Executes the query once.
    pub async fn get(&self) -> OdmResult<QuerySnapshot> {
        self.database.store().run_query(&self.definition).await
    }

    /// Opens a change subscription for this query.
    pub async fn listen(&self, include_metadata_changes: bool) -> OdmResult<ListenRegistration> {
        self.database
            .store()
            .listen(&self.definition, include_metadata_changes)
            .await
    }
}

/// The results of a query plus the changes since the previous delivery.
#[derive(Clone, Debug, Default)]
pub struct QuerySnapshot {
    documents: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
    metadata: SnapshotMetadata,
}

impl QuerySnapshot {
    pub fn new(
        documents: Vec<DocumentSnapshot>,
        changes: Vec<DocumentChange>,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            documents,
            changes,
            metadata,
        }
    }

    /// Builds a one-shot result where every document counts as added.
    pub fn from_documents(documents: Vec<DocumentSnapshot>, metadata: SnapshotMetadata) -> Self {
        let changes = documents
            .iter()
            .enumerate()
            .map(|(index, snapshot)| {
                DocumentChange::new(DocumentChangeType::Added, snapshot.clone(), None, Some(index))
            })
            .collect();
        Self::new(documents, changes, metadata)
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<DocumentSnapshot> {
        self.documents
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn last(&self) -> Option<&DocumentSnapshot> {
        self.documents.last()
    }

    /// The ordered element-level changes of this delivery.
    ///
    /// Metadata-only modifications are included only when asked for.
    pub fn document_changes(&self, include_metadata_changes: bool) -> Vec<DocumentChange> {
        self.changes
            .iter()
            .filter(|change| include_metadata_changes || !change.is_metadata_only())
            .cloned()
            .collect()
    }
}
