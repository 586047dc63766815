use std::collections::HashMap;

use super::snapshot::DocumentSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

/// One element-level change carried by a query snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    change_type: DocumentChangeType,
    document: DocumentSnapshot,
    old_index: Option<usize>,
    new_index: Option<usize>,
    metadata_only: bool,
}

impl DocumentChange {
    pub fn new(
        change_type: DocumentChangeType,
        document: DocumentSnapshot,
        old_index: Option<usize>,
        new_index: Option<usize>,
    ) -> Self {
        Self {
            change_type,
            document,
            old_index,
            new_index,
            metadata_only: false,
        }
    }

    /// Marks a modification that only touched snapshot metadata, not document data.
    pub fn metadata_only(mut self) -> Self {
        self.metadata_only = true;
        self
    }

    pub fn change_type(&self) -> DocumentChangeType {
        self.change_type
    }

    pub fn document(&self) -> &DocumentSnapshot {
        &self.document
    }

    pub fn into_document(self) -> DocumentSnapshot {
        self.document
    }

    pub fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    pub fn new_index(&self) -> Option<usize> {
        self.new_index
    }

    pub fn is_metadata_only(&self) -> bool {
        self.metadata_only
    }
}

/// Diffs two ordered result sets.
///
/// Removals come first (indices into `previous`), followed by additions and
/// modifications in the order of `current` (indices into `current`).
pub fn compute_document_changes(
    previous: &[DocumentSnapshot],
    current: &[DocumentSnapshot],
) -> Vec<DocumentChange> {
    let previous_index: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, snapshot)| (snapshot.id(), index))
        .collect();
    let current_index: HashMap<&str, usize> = current
        .iter()
        .enumerate()
        .map(|(index, snapshot)| (snapshot.id(), index))
        .collect();

    let mut changes = Vec::new();
    for (index, snapshot) in previous.iter().enumerate() {
        if !current_index.contains_key(snapshot.id()) {
            changes.push(DocumentChange::new(
                DocumentChangeType::Removed,
                snapshot.clone(),
                Some(index),
                None,
            ));
        }
    }

    for (index, snapshot) in current.iter().enumerate() {
        match previous_index.get(snapshot.id()) {
            None => changes.push(DocumentChange::new(
                DocumentChangeType::Added,
                snapshot.clone(),
                None,
                Some(index),
            )),
            Some(&old_index) => {
                let before = &previous[old_index];
                if before.data() != snapshot.data() {
                    changes.push(DocumentChange::new(
                        DocumentChangeType::Modified,
                        snapshot.clone(),
                        Some(old_index),
                        Some(index),
                    ));
                } else if before.metadata() != snapshot.metadata() {
                    changes.push(
                        DocumentChange::new(
                            DocumentChangeType::Modified,
                            snapshot.clone(),
                            Some(old_index),
                            Some(index),
                        )
                        .metadata_only(),
                    );
                }
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SnapshotMetadata;
    use crate::model::DocumentKey;
    use crate::value::{FieldValue, MapValue};

    fn snapshot(id: &str, rank: i64) -> DocumentSnapshot {
        let mut map = MapValue::default();
        map.insert("rank", FieldValue::from_integer(rank));
        DocumentSnapshot::new(
            DocumentKey::from_string(&format!("items/{id}")).unwrap(),
            Some(map),
            SnapshotMetadata::default(),
        )
    }

    #[test]
    fn reports_removed_added_and_modified() {
        let previous = vec![snapshot("a", 1), snapshot("b", 2)];
        let current = vec![snapshot("b", 3), snapshot("c", 4)];

        let changes = compute_document_changes(&previous, &current);
        let summary: Vec<_> = changes
            .iter()
            .map(|change| (change.change_type(), change.document().id().to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (DocumentChangeType::Removed, "a".to_string()),
                (DocumentChangeType::Modified, "b".to_string()),
                (DocumentChangeType::Added, "c".to_string()),
            ]
        );
        assert_eq!(changes[0].old_index(), Some(0));
        assert_eq!(changes[1].old_index(), Some(1));
        assert_eq!(changes[1].new_index(), Some(0));
        assert_eq!(changes[2].new_index(), Some(1));
    }

    #[test]
    fn identical_sets_produce_no_changes() {
        let docs = vec![snapshot("a", 1)];
        assert!(compute_document_changes(&docs, &docs).is_empty());
    }

    #[test]
    fn metadata_flip_is_flagged() {
        let before = vec![snapshot("a", 1)];
        let after = vec![DocumentSnapshot::new(
            before[0].key().clone(),
            before[0].data().cloned(),
            SnapshotMetadata::new(false, true),
        )];
        let changes = compute_document_changes(&before, &after);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_metadata_only());
    }
}
