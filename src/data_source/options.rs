use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::api::DocumentChangeType;
use crate::document::Document;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 16;

pub type Comparator<T> = Arc<dyn Fn(&Document<T>, &Document<T>) -> Ordering + Send + Sync>;

/// Orders by `updated_at`, newest first.
pub fn updated_at_descending<T: 'static>() -> Comparator<T> {
    Arc::new(|left: &Document<T>, right: &Document<T>| right.updated_at().cmp(&left.updated_at()))
}

/// The change types a data source reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeTypes {
    added: bool,
    modified: bool,
    removed: bool,
}

impl ChangeTypes {
    pub fn all() -> Self {
        Self {
            added: true,
            modified: true,
            removed: true,
        }
    }

    pub fn none() -> Self {
        Self {
            added: false,
            modified: false,
            removed: false,
        }
    }

    pub fn only(types: &[DocumentChangeType]) -> Self {
        types.iter().fold(Self::none(), |set, ty| set.with(*ty))
    }

    pub fn with(mut self, change_type: DocumentChangeType) -> Self {
        match change_type {
            DocumentChangeType::Added => self.added = true,
            DocumentChangeType::Modified => self.modified = true,
            DocumentChangeType::Removed => self.removed = true,
        }
        self
    }

    pub fn contains(&self, change_type: DocumentChangeType) -> bool {
        match change_type {
            DocumentChangeType::Added => self.added,
            DocumentChangeType::Modified => self.modified,
            DocumentChangeType::Removed => self.removed,
        }
    }
}

impl Default for ChangeTypes {
    fn default() -> Self {
        Self::all()
    }
}

/// A typed predicate over documents, composable with `and` / `or` / `not`.
pub struct Filter<T> {
    predicate: Arc<dyn Fn(&Document<T>) -> bool + Send + Sync>,
}

impl<T: 'static> Filter<T> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Document<T>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn and(self, other: Filter<T>) -> Self {
        Self::new(move |document| self.matches(document) && other.matches(document))
    }

    pub fn or(self, other: Filter<T>) -> Self {
        Self::new(move |document| self.matches(document) || other.matches(document))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::new(move |document| !self.matches(document))
    }
}

impl<T> Filter<T> {
    pub fn matches(&self, document: &Document<T>) -> bool {
        (self.predicate)(document)
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

/// Settings for a [`DataSource`](super::DataSource).
pub struct DataSourceOptions<T> {
    /// Deadline for resolving every document of one cycle.
    pub timeout: Duration,
    pub include_metadata_changes: bool,
    pub listening_change_types: ChangeTypes,
    pub predicate: Option<Filter<T>>,
    pub comparator: Comparator<T>,
    /// Re-read each changed document by key instead of decoding the notification payload.
    pub should_fetch_reference: bool,
    pub max_concurrent_fetches: usize,
    /// Limit applied to each `next()` page; `None` keeps the query's own limit.
    pub page_size: Option<u32>,
}

impl<T: 'static> DataSourceOptions<T> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata_changes(mut self, include: bool) -> Self {
        self.include_metadata_changes = include;
        self
    }

    pub fn with_change_types(mut self, change_types: ChangeTypes) -> Self {
        self.listening_change_types = change_types;
        self
    }

    pub fn with_predicate(mut self, predicate: Filter<T>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Document<T>, &Document<T>) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Arc::new(comparator);
        self
    }

    pub fn with_fetch_reference(mut self, should_fetch_reference: bool) -> Self {
        self.should_fetch_reference = should_fetch_reference;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

impl<T: 'static> Default for DataSourceOptions<T> {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            include_metadata_changes: true,
            listening_change_types: ChangeTypes::all(),
            predicate: None,
            comparator: updated_at_descending(),
            should_fetch_reference: false,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            page_size: None,
        }
    }
}

impl<T> Clone for DataSourceOptions<T> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            include_metadata_changes: self.include_metadata_changes,
            listening_change_types: self.listening_change_types,
            predicate: self.predicate.clone(),
            comparator: Arc::clone(&self.comparator),
            should_fetch_reference: self.should_fetch_reference,
            max_concurrent_fetches: self.max_concurrent_fetches,
            page_size: self.page_size,
        }
    }
}

impl<T> Debug for DataSourceOptions<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceOptions")
            .field("timeout", &self.timeout)
            .field("include_metadata_changes", &self.include_metadata_changes)
            .field("listening_change_types", &self.listening_change_types)
            .field("has_predicate", &self.predicate.is_some())
            .field("should_fetch_reference", &self.should_fetch_reference)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("page_size", &self.page_size)
            .finish()
    }
}
