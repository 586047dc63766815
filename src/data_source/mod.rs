//! Live, ordered local mirror of a query.
//!
//! A [`DataSource`] subscribes to a [`Query`], resolves each changed document into
//! a typed [`Document`], keeps the results filtered and sorted, and tells observers
//! which rows moved through [`CollectionChange`] envelopes.

mod change;
mod dispatcher;
mod fetch;
mod mirror;
pub mod options;
mod reconcile;

pub use change::{CollectionChange, IndexChanges};
pub use fetch::ParseHandler;
pub use options::{updated_at_descending, ChangeTypes, Comparator, DataSourceOptions, Filter};

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use async_channel::{Receiver, Sender};
use futures::future::{AbortHandle, Abortable};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;

use crate::api::{Cursor, Query, QuerySnapshot};
use crate::document::Document;
use crate::error::{empty, invalid_state, OdmError, OdmResult};
use crate::platform::runtime::spawn_detached;

use dispatcher::Dispatcher;
use fetch::FetchCoordinator;
use mirror::Mirror;
use reconcile::{lock, run_cycle, CycleKind, CycleReport};

pub type ChangeHandler = Arc<dyn Fn(&CollectionChange) + Send + Sync>;
pub type CompletedHandler<T> = Arc<dyn Fn(&[Document<T>]) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&OdmError) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Stopped,
    Failed,
}

/// One pulled page.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    /// Documents this page added to the mirror.
    pub documents: Vec<Document<T>>,
    /// The query has nothing after the cursor; further pulls return empty pages
    /// until `reset()`.
    pub is_last: bool,
}

impl<T> Page<T> {
    fn last() -> Self {
        Self {
            documents: Vec::new(),
            is_last: true,
        }
    }
}

struct Handlers<T> {
    change: Vec<ChangeHandler>,
    completed: Vec<CompletedHandler<T>>,
    error: Vec<ErrorHandler>,
    parse: Option<ParseHandler<T>>,
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Self {
            change: Vec::new(),
            completed: Vec::new(),
            error: Vec::new(),
            parse: None,
        }
    }
}

/// State changes and generation bumps happen together under `state`, which is
/// always locked before `mirror`.
struct Inner<T> {
    query: Query,
    options: DataSourceOptions<T>,
    mirror: Mutex<Mirror<T>>,
    gate: async_lock::Mutex<()>,
    handlers: RwLock<Handlers<T>>,
    state: Mutex<SubscriptionState>,
    subscription: Mutex<Option<AbortHandle>>,
    dispatcher: Dispatcher,
}

/// A live, ordered collection of documents matching a query.
///
/// Cloning yields another handle to the same mirror. When the last handle is
/// dropped the subscription is cancelled.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use firestore_odm::{Database, DataSource, DataSourceOptions, InMemoryStore};
/// # async fn run() -> firestore_odm::OdmResult<()> {
/// #[derive(Clone, serde::Deserialize)]
/// struct Item {
///     name: String,
/// }
///
/// let database = Database::new(Arc::new(InMemoryStore::new()));
/// let query = database.collection("items")?.query();
/// let source = DataSource::<Item>::new(query, DataSourceOptions::default());
/// source
///     .on(|change| println!("{change:?}"))
///     .on_completed(|documents| println!("{} items", documents.len()))
///     .listen();
/// # Ok(())
/// # }
/// ```
pub struct DataSource<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DataSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for DataSource<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("collection", &self.inner.query.collection_path().canonical_string())
            .field("state", &self.inner.state())
            .field("len", &lock(&self.inner.mirror).len())
            .finish()
    }
}

impl<T> DataSource<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(query: Query, options: DataSourceOptions<T>) -> Self {
        let mirror = Mirror::new(options.predicate.clone(), Arc::clone(&options.comparator));
        Self {
            inner: Arc::new(Inner {
                query,
                options,
                mirror: Mutex::new(mirror),
                gate: async_lock::Mutex::new(()),
                handlers: RwLock::new(Handlers::default()),
                state: Mutex::new(SubscriptionState::Unsubscribed),
                subscription: Mutex::new(None),
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    pub fn options(&self) -> &DataSourceOptions<T> {
        &self.inner.options
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.state()
    }

    /// Registers an observer for change envelopes.
    pub fn on<F>(&self, handler: F) -> &Self
    where
        F: Fn(&CollectionChange) + Send + Sync + 'static,
    {
        self.inner.handlers_mut().change.push(Arc::new(handler));
        self
    }

    /// Registers an observer that receives the full view after every cycle.
    pub fn on_completed<F>(&self, handler: F) -> &Self
    where
        F: Fn(&[Document<T>]) + Send + Sync + 'static,
    {
        self.inner.handlers_mut().completed.push(Arc::new(handler));
        self
    }

    /// Registers an observer for failures that are not tied to one document:
    /// resolution timeouts, failed pulls and subscription errors. A pull that
    /// finds nothing past the cursor reports an informational `Empty` here too.
    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&OdmError) + Send + Sync + 'static,
    {
        self.inner.handlers_mut().error.push(Arc::new(handler));
        self
    }

    /// Installs the post-decode hook, replacing any previous one.
    pub fn on_parse<F, Fut>(&self, parse: F) -> &Self
    where
        F: Fn(Document<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Document<T>>> + Send + 'static,
    {
        let parse: ParseHandler<T> = Arc::new(move |document| parse(document).boxed());
        self.inner.handlers_mut().parse = Some(parse);
        self
    }

    /// Opens the push subscription. Does nothing while one is already open.
    ///
    /// Listening again after `stop()` starts from an empty mirror.
    pub fn listen(&self) -> &Self {
        let generation = {
            let mut state = self.inner.state_guard();
            if matches!(
                *state,
                SubscriptionState::Subscribing | SubscriptionState::Active
            ) {
                log::debug!("listen() ignored; subscription already open");
                return self;
            }
            *state = SubscriptionState::Subscribing;
            let mut mirror = lock(&self.inner.mirror);
            mirror.clear();
            mirror.bump_generation()
        };

        let (sender, receiver) = async_channel::unbounded();
        let (abort_handle, registration) = AbortHandle::new_pair();
        let forwarder = Abortable::new(
            forward_snapshots(
                self.inner.query.clone(),
                self.inner.options.include_metadata_changes,
                sender,
            ),
            registration,
        );
        spawn_detached(async move {
            let _ = forwarder.await;
        });
        if let Some(previous) = self.inner.subscription_guard().replace(abort_handle) {
            previous.abort();
        }
        spawn_detached(reconcile_snapshots(
            Arc::downgrade(&self.inner),
            receiver,
            generation,
        ));

        log::debug!(
            "listening to {}",
            self.inner.query.collection_path().canonical_string()
        );
        self
    }

    /// Cancels the subscription. Idempotent.
    ///
    /// A cycle that is already resolving finishes, but its results are discarded.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Pulls the page after the cursor and merges it into the mirror.
    pub async fn next(&self) -> OdmResult<Page<T>> {
        self.inner.next_page().await
    }

    /// Fire-and-forget [`next`](Self::next). Failures reach the `on_error` observers.
    pub fn get(&self) {
        let source = self.clone();
        spawn_detached(async move {
            if let Err(err) = source.next().await {
                log::debug!("background page load failed: {err}");
            }
        });
    }

    /// Rewinds pagination to the first page.
    pub fn reset(&self) {
        lock(&self.inner.mirror).reset_cursor();
    }

    /// Waits until every observer callback queued so far has run.
    pub async fn flush(&self) {
        self.inner.dispatcher.flush().await;
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.mirror).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_document(&self, index: usize) -> Option<Document<T>> {
        lock(&self.inner.mirror).get(index).cloned()
    }

    pub fn first(&self) -> Option<Document<T>> {
        self.get_document(0)
    }

    pub fn last(&self) -> Option<Document<T>> {
        let mirror = lock(&self.inner.mirror);
        let len = mirror.len();
        len.checked_sub(1).and_then(|index| mirror.get(index).cloned())
    }

    /// Whether a document with `id` is visible.
    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        lock(&self.inner.mirror).index_of(id)
    }

    pub fn documents(&self) -> Vec<Document<T>> {
        lock(&self.inner.mirror).visible()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        lock(&self.inner.mirror).cursor().cloned()
    }

    pub fn is_last(&self) -> bool {
        lock(&self.inner.mirror).is_last()
    }
}

impl<T> Inner<T> {
    fn state(&self) -> SubscriptionState {
        *self.state_guard()
    }

    fn state_guard(&self) -> MutexGuard<'_, SubscriptionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscription_guard(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Handlers<T>> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers<T>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        lock(&self.mirror).generation()
    }

    fn abort_subscription(&self) {
        if let Some(handle) = self.subscription_guard().take() {
            handle.abort();
        }
    }

    fn stop(&self) {
        {
            let mut state = self.state_guard();
            if !matches!(
                *state,
                SubscriptionState::Subscribing | SubscriptionState::Active
            ) {
                return;
            }
            *state = SubscriptionState::Stopped;
            lock(&self.mirror).bump_generation();
        }
        self.abort_subscription();
        log::debug!(
            "stopped listening to {}",
            self.query.collection_path().canonical_string()
        );
    }

    /// Moves `from` to `to` only while the subscription of `generation` is current.
    fn transition(&self, generation: u64, from: SubscriptionState, to: SubscriptionState) -> bool {
        let mut state = self.state_guard();
        if *state != from || self.generation() != generation {
            return false;
        }
        *state = to;
        true
    }
}

impl<T> Inner<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    fn fetcher(&self) -> FetchCoordinator<T> {
        FetchCoordinator::new(
            self.query.database().clone(),
            self.options.should_fetch_reference,
            self.options.timeout,
            self.options.max_concurrent_fetches,
            self.handlers().parse.clone(),
        )
    }

    async fn apply_snapshot(&self, snapshot: QuerySnapshot, first: bool, generation: u64) {
        let _gate = self.gate.lock().await;

        let initial = first && !snapshot.is_empty() && !snapshot.metadata().has_pending_writes();
        if initial {
            if let Some(last) = snapshot.last() {
                let cursor = self.query.cursor_for(last);
                let mut mirror = lock(&self.mirror);
                if mirror.generation() == generation {
                    mirror.advance_cursor(cursor);
                }
            }
        }

        let kind = if initial {
            CycleKind::Initial
        } else {
            CycleKind::Incremental
        };
        let changes = snapshot.document_changes(self.options.include_metadata_changes);
        let fetcher = self.fetcher();
        if let Some(report) = run_cycle(
            &self.mirror,
            &fetcher,
            self.options.listening_change_types,
            changes,
            kind,
            generation,
        )
        .await
        {
            self.deliver(report);
        }
    }

    async fn next_page(&self) -> OdmResult<Page<T>> {
        let _gate = self.gate.lock().await;

        let (cursor, is_last, generation) = {
            let mirror = lock(&self.mirror);
            (mirror.cursor().cloned(), mirror.is_last(), mirror.generation())
        };
        if is_last {
            return Ok(Page::last());
        }

        let mut query = self.query.clone();
        if let Some(page_size) = self.options.page_size {
            query = query.limit(page_size)?;
        }
        if let Some(cursor) = cursor {
            query = query.start_after_cursor(cursor);
        }

        let snapshot = match query.get().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "loading a page of {} failed: {err}",
                    self.query.collection_path().canonical_string()
                );
                self.deliver_failure(err.clone());
                return Err(err);
            }
        };

        let Some(last) = snapshot.last() else {
            let documents = {
                let mut mirror = lock(&self.mirror);
                if mirror.generation() == generation {
                    mirror.mark_last();
                }
                mirror.visible()
            };
            log::debug!(
                "{} has nothing past the cursor",
                self.query.collection_path().canonical_string()
            );
            self.deliver_exhausted(
                empty("no documents after the current cursor"),
                documents,
            );
            return Ok(Page::last());
        };

        let cursor = query.cursor_for(last);
        {
            let mut mirror = lock(&self.mirror);
            if mirror.generation() != generation {
                return Err(stale_page());
            }
            mirror.advance_cursor(cursor);
        }

        let fetcher = self.fetcher();
        let report = run_cycle(
            &self.mirror,
            &fetcher,
            self.options.listening_change_types,
            snapshot.document_changes(true),
            CycleKind::Incremental,
            generation,
        )
        .await
        .ok_or_else(stale_page)?;

        Ok(Page {
            documents: self.deliver(report),
            is_last: false,
        })
    }

    /// Queues one cycle's notifications and returns the documents it inserted.
    fn deliver(&self, report: CycleReport<T>) -> Vec<Document<T>> {
        let CycleReport {
            timeout,
            envelopes,
            inserted,
            documents,
        } = report;
        let (change, completed, error) = self.observers();
        self.dispatcher.dispatch(move || {
            if let Some(err) = &timeout {
                error.iter().for_each(|handler| handler(err));
            }
            for envelope in &envelopes {
                change.iter().for_each(|handler| handler(envelope));
            }
            completed.iter().for_each(|handler| handler(&documents));
        });
        inserted
    }

    fn deliver_failure(&self, err: OdmError) {
        let (change, completed, error) = self.observers();
        self.dispatcher.dispatch(move || {
            error.iter().for_each(|handler| handler(&err));
            let envelope = CollectionChange::Error(err);
            change.iter().for_each(|handler| handler(&envelope));
            completed.iter().for_each(|handler| handler(&[]));
        });
    }

    /// The informational `Empty` error goes to `on_error`; the mirror is intact so
    /// completion still carries the full view.
    fn deliver_exhausted(&self, notice: OdmError, documents: Vec<Document<T>>) {
        let (_, completed, error) = self.observers();
        self.dispatcher.dispatch(move || {
            error.iter().for_each(|handler| handler(&notice));
            completed.iter().for_each(|handler| handler(&documents));
        });
    }

    fn observers(&self) -> (Vec<ChangeHandler>, Vec<CompletedHandler<T>>, Vec<ErrorHandler>) {
        let handlers = self.handlers();
        (
            handlers.change.clone(),
            handlers.completed.clone(),
            handlers.error.clone(),
        )
    }

    fn fail(&self, err: OdmError, generation: u64) {
        let failed = self.transition(generation, SubscriptionState::Subscribing, SubscriptionState::Failed)
            || self.transition(generation, SubscriptionState::Active, SubscriptionState::Failed);
        if !failed {
            return;
        }
        log::warn!(
            "subscription to {} failed: {err}",
            self.query.collection_path().canonical_string()
        );
        self.abort_subscription();
        self.deliver_failure(err);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.abort_subscription();
    }
}

fn stale_page() -> OdmError {
    invalid_state("data source was restarted while a page was loading")
}

/// Opens the store subscription and forwards its deliveries untouched, so the
/// store side never waits on reconciliation.
async fn forward_snapshots(
    query: Query,
    include_metadata_changes: bool,
    sender: Sender<OdmResult<QuerySnapshot>>,
) {
    let mut registration = match query.listen(include_metadata_changes).await {
        Ok(registration) => registration,
        Err(err) => {
            let _ = sender.send(Err(err)).await;
            return;
        }
    };
    while let Some(delivery) = registration.next().await {
        if sender.send(delivery).await.is_err() {
            break;
        }
    }
}

/// Applies forwarded deliveries one cycle at a time until the subscription of
/// `generation` ends, fails or is replaced.
async fn reconcile_snapshots<T>(
    source: Weak<Inner<T>>,
    receiver: Receiver<OdmResult<QuerySnapshot>>,
    generation: u64,
) where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    let mut first = true;
    while let Ok(delivery) = receiver.recv().await {
        let Some(inner) = source.upgrade() else {
            return;
        };
        if inner.generation() != generation {
            return;
        }
        match delivery {
            Ok(snapshot) => {
                inner.transition(
                    generation,
                    SubscriptionState::Subscribing,
                    SubscriptionState::Active,
                );
                inner.apply_snapshot(snapshot, first, generation).await;
                first = false;
            }
            Err(err) => {
                inner.fail(err, generation);
                return;
            }
        }
    }

    if let Some(inner) = source.upgrade() {
        inner.transition(generation, SubscriptionState::Active, SubscriptionState::Stopped);
        inner.transition(
            generation,
            SubscriptionState::Subscribing,
            SubscriptionState::Stopped,
        );
    }
}
