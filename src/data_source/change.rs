use crate::error::OdmError;

/// Index lists describing how one cycle reshaped the visible collection.
///
/// `deletions` index into the view as it was before the cycle; `insertions` and
/// `modifications` index into the view after it. Each list is ascending and free
/// of duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexChanges {
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
}

impl IndexChanges {
    pub fn new(deletions: Vec<usize>, insertions: Vec<usize>, modifications: Vec<usize>) -> Self {
        Self {
            deletions: normalize(deletions),
            insertions: normalize(insertions),
            modifications: normalize(modifications),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

fn normalize(mut indices: Vec<usize>) -> Vec<usize> {
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// What observers registered with `on` receive.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionChange {
    /// The first populated delivery of a subscription has been applied.
    Initial,
    Update(IndexChanges),
    Error(OdmError),
}

impl CollectionChange {
    /// Builds an envelope from an optional change set and an optional error.
    /// An error always wins; with neither present the envelope is `Initial`.
    pub fn new(changes: Option<IndexChanges>, error: Option<OdmError>) -> Self {
        match (changes, error) {
            (_, Some(error)) => CollectionChange::Error(error),
            (Some(changes), None) => CollectionChange::Update(changes),
            (None, None) => CollectionChange::Initial,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, CollectionChange::Initial)
    }

    pub fn changes(&self) -> Option<&IndexChanges> {
        match self {
            CollectionChange::Update(changes) => Some(changes),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&OdmError> {
        match self {
            CollectionChange::Error(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::timeout;

    #[test]
    fn error_takes_precedence() {
        let change = CollectionChange::new(Some(IndexChanges::default()), Some(timeout("late")));
        assert!(change.error().is_some());
        assert!(CollectionChange::new(None, None).is_initial());
        assert!(CollectionChange::new(Some(IndexChanges::default()), None)
            .changes()
            .is_some());
    }

    #[test]
    fn index_lists_are_sorted_and_unique() {
        let changes = IndexChanges::new(vec![3, 1, 3], vec![2, 0], vec![]);
        assert_eq!(changes.deletions, vec![1, 3]);
        assert_eq!(changes.insertions, vec![0, 2]);
        assert!(!changes.is_empty());
        assert!(IndexChanges::default().is_empty());
    }
}
