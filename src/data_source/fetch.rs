use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use tokio::time::{timeout_at, Instant};

use crate::api::{Database, DocumentSnapshot};
use crate::document::Document;
use crate::error::{invalid_reference, OdmError};

/// Post-decode hook; returning `None` drops the document from the cycle.
pub type ParseHandler<T> =
    Arc<dyn Fn(Document<T>) -> BoxFuture<'static, Option<Document<T>>> + Send + Sync>;

/// How one change's document was resolved.
pub(crate) enum Resolution<T> {
    Resolved(Document<T>),
    /// Nothing to apply and nothing to report.
    Skipped,
    Failed(OdmError),
}

pub(crate) struct FetchOutcome<T> {
    /// Finished resolutions keyed by the ordinal of the change they belong to,
    /// in completion order.
    pub(crate) resolutions: Vec<(usize, Resolution<T>)>,
    /// Ordinals still outstanding when the deadline passed.
    pub(crate) abandoned: Vec<usize>,
}

/// Resolves the documents of one cycle concurrently under a shared deadline.
pub(crate) struct FetchCoordinator<T> {
    database: Database,
    should_fetch_reference: bool,
    timeout: Duration,
    max_concurrent: usize,
    parse: Option<ParseHandler<T>>,
}

impl<T> FetchCoordinator<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(
        database: Database,
        should_fetch_reference: bool,
        timeout: Duration,
        max_concurrent: usize,
        parse: Option<ParseHandler<T>>,
    ) -> Self {
        Self {
            database,
            should_fetch_reference,
            timeout,
            max_concurrent: max_concurrent.max(1),
            parse,
        }
    }

    pub(crate) async fn resolve_all(
        &self,
        requests: Vec<(usize, DocumentSnapshot)>,
    ) -> FetchOutcome<T> {
        if requests.is_empty() {
            return FetchOutcome {
                resolutions: Vec::new(),
                abandoned: Vec::new(),
            };
        }

        let deadline = Instant::now() + self.timeout;
        let mut outstanding: BTreeSet<usize> = requests.iter().map(|(ordinal, _)| *ordinal).collect();
        let mut resolutions = Vec::with_capacity(requests.len());

        let mut pending = stream::iter(requests.into_iter().map(|(ordinal, snapshot)| async move {
            (ordinal, self.resolve(snapshot).await)
        }))
        .buffer_unordered(self.max_concurrent);

        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((ordinal, resolution))) => {
                    outstanding.remove(&ordinal);
                    resolutions.push((ordinal, resolution));
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "{} document resolutions still pending after {:?}; applying partial results",
                        outstanding.len(),
                        self.timeout
                    );
                    break;
                }
            }
        }

        FetchOutcome {
            resolutions,
            abandoned: outstanding.into_iter().collect(),
        }
    }

    async fn resolve(&self, snapshot: DocumentSnapshot) -> Resolution<T> {
        let document = if self.should_fetch_reference {
            match self.fetch_reference(&snapshot).await {
                Ok(document) => document,
                Err(err) => return Resolution::Failed(err),
            }
        } else {
            match Document::from_snapshot(&snapshot) {
                Ok(document) => document,
                Err(err) => {
                    log::debug!("skipping {}: {err}", snapshot.key());
                    return Resolution::Skipped;
                }
            }
        };

        match &self.parse {
            Some(parse) => match parse(document).await {
                Some(document) => Resolution::Resolved(document),
                None => Resolution::Skipped,
            },
            None => Resolution::Resolved(document),
        }
    }

    async fn fetch_reference(&self, snapshot: &DocumentSnapshot) -> Result<Document<T>, OdmError> {
        let fetched = self.database.store().get_document(snapshot.key()).await?;
        if !fetched.exists() {
            return Err(invalid_reference(format!(
                "referenced document {} returned no data",
                snapshot.key()
            )));
        }
        Document::from_snapshot(&fetched)
    }
}
