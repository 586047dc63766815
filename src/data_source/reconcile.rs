use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;

use crate::api::{DocumentChange, DocumentChangeType};
use crate::document::Document;
use crate::error::{timeout, OdmError};

use super::change::{CollectionChange, IndexChanges};
use super::fetch::{FetchCoordinator, Resolution};
use super::mirror::Mirror;
use super::options::ChangeTypes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CycleKind {
    /// The first populated delivery of a subscription.
    Initial,
    Incremental,
}

/// Everything observers must hear about one applied cycle, in delivery order.
pub(crate) struct CycleReport<T> {
    /// Raised when the resolution deadline passed before every document arrived.
    pub(crate) timeout: Option<OdmError>,
    pub(crate) envelopes: Vec<CollectionChange>,
    /// Documents this cycle inserted, in change order.
    pub(crate) inserted: Vec<Document<T>>,
    /// The visible view after the cycle.
    pub(crate) documents: Vec<Document<T>>,
}

enum Step {
    Add(String),
    Modify(String),
    Remove(String),
}

impl Step {
    fn id(&self) -> &str {
        match self {
            Step::Add(id) | Step::Modify(id) | Step::Remove(id) => id,
        }
    }
}

/// Applies one batch of element changes to the mirror.
///
/// Planning happens against the mirror as it is when the cycle starts, reading
/// the changes in order as if each were applied before the next. Documents are
/// then resolved without holding the mirror, and the results are applied in
/// change order regardless of the order resolutions completed in.
///
/// Returns `None` when the mirror moved to another generation while the cycle
/// was resolving; nothing is applied in that case.
pub(crate) async fn run_cycle<T>(
    mirror: &Mutex<Mirror<T>>,
    fetcher: &FetchCoordinator<T>,
    change_types: ChangeTypes,
    changes: Vec<DocumentChange>,
    kind: CycleKind,
    generation: u64,
) -> Option<CycleReport<T>>
where
    T: Clone + DeserializeOwned + Send + 'static,
{
    let (steps, requests) = {
        let guard = lock(mirror);
        if guard.generation() != generation {
            return None;
        }
        plan(&guard, change_types, changes)
    };

    let outcome = fetcher.resolve_all(requests).await;
    let timed_out = (!outcome.abandoned.is_empty()).then(|| {
        timeout(format!(
            "{} of {} document resolutions did not finish in time",
            outcome.abandoned.len(),
            outcome.abandoned.len() + outcome.resolutions.len()
        ))
    });
    let mut resolutions: HashMap<usize, Resolution<T>> = outcome.resolutions.into_iter().collect();

    let mut guard = lock(mirror);
    if guard.generation() != generation {
        log::debug!("discarding results of a stale reconciliation cycle");
        return None;
    }

    let before = guard.visible_positions();
    let mut touched: Vec<(String, DocumentChangeType)> = Vec::new();
    let mut inserted = Vec::new();
    let mut errors: Vec<(usize, OdmError)> = Vec::new();

    for (ordinal, step) in steps.into_iter().enumerate() {
        if let Step::Remove(id) = &step {
            if guard.remove(id).is_some() {
                touched.push((id.clone(), DocumentChangeType::Removed));
            }
            continue;
        }
        match resolutions.remove(&ordinal) {
            Some(Resolution::Resolved(document)) => match step {
                Step::Add(id) => {
                    let copy = document.clone();
                    if guard.insert(document) {
                        inserted.push(copy);
                        touched.push((id, DocumentChangeType::Added));
                    }
                }
                Step::Modify(id) => {
                    if guard.replace(document) {
                        touched.push((id, DocumentChangeType::Modified));
                    }
                }
                Step::Remove(_) => {}
            },
            Some(Resolution::Failed(err)) => {
                log::debug!("resolution of {} failed: {err}", step.id());
                errors.push((ordinal, err));
            }
            Some(Resolution::Skipped) | None => {}
        }
    }

    guard.refresh();
    let after = guard.visible_positions();
    let index_changes = diff_views(&before, &after, &touched);
    let documents = guard.visible();
    drop(guard);

    let envelopes = match kind {
        CycleKind::Initial => initial_envelopes(errors),
        CycleKind::Incremental => {
            let mut envelopes: Vec<CollectionChange> = errors
                .into_iter()
                .map(|(_, err)| CollectionChange::Error(err))
                .collect();
            if !index_changes.is_empty() {
                envelopes.push(CollectionChange::Update(index_changes));
            }
            envelopes
        }
    };

    Some(CycleReport {
        timeout: timed_out,
        envelopes,
        inserted,
        documents,
    })
}

/// Decides what each change will do and which documents need resolving.
///
/// Step ordinals line up with resolution ordinals.
fn plan<T>(
    mirror: &Mirror<T>,
    change_types: ChangeTypes,
    changes: Vec<DocumentChange>,
) -> (Vec<Step>, Vec<(usize, crate::api::DocumentSnapshot)>) {
    let mut present: HashSet<String> = HashSet::new();
    let mut absent: HashSet<String> = HashSet::new();
    let held = |id: &str, present: &HashSet<String>, absent: &HashSet<String>| {
        present.contains(id) || (!absent.contains(id) && mirror.holds(id))
    };

    let mut steps = Vec::new();
    let mut requests = Vec::new();
    for change in changes {
        let change_type = change.change_type();
        if !change_types.contains(change_type) {
            continue;
        }
        let id = change.document().id().to_string();
        let is_held = held(&id, &present, &absent);
        match change_type {
            DocumentChangeType::Added if !is_held => {
                requests.push((steps.len(), change.into_document()));
                absent.remove(&id);
                present.insert(id.clone());
                steps.push(Step::Add(id));
            }
            DocumentChangeType::Modified if is_held => {
                requests.push((steps.len(), change.into_document()));
                steps.push(Step::Modify(id));
            }
            DocumentChangeType::Removed if is_held => {
                present.remove(&id);
                absent.insert(id.clone());
                steps.push(Step::Remove(id));
            }
            _ => log::debug!("ignoring {change_type:?} for {id}"),
        }
    }
    (steps, requests)
}

/// Converts touched ids into index lists.
///
/// A touched document visible on both sides is a modification, one that only
/// appears afterwards is an insertion and one that disappeared is a deletion.
fn diff_views(
    before: &HashMap<String, usize>,
    after: &HashMap<String, usize>,
    touched: &[(String, DocumentChangeType)],
) -> IndexChanges {
    let mut deletions = Vec::new();
    let mut insertions = Vec::new();
    let mut modifications = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let added: HashSet<&str> = touched
        .iter()
        .filter(|(_, change)| *change == DocumentChangeType::Added)
        .map(|(id, _)| id.as_str())
        .collect();

    for (id, _) in touched {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match (before.get(id), after.get(id)) {
            (Some(&old_index), Some(&new_index)) => {
                if added.contains(id.as_str()) {
                    // Removed and added back inside one cycle: the old row goes away
                    // and a new one appears.
                    deletions.push(old_index);
                    insertions.push(new_index);
                } else {
                    modifications.push(new_index);
                }
            }
            (None, Some(&new_index)) => insertions.push(new_index),
            (Some(&old_index), None) => deletions.push(old_index),
            (None, None) => {}
        }
    }

    IndexChanges::new(deletions, insertions, modifications)
}

/// The initial cycle reports one `Initial` envelope. Resolution failures are
/// swallowed except when the very first change failed, which is surfaced ahead
/// of it.
fn initial_envelopes(errors: Vec<(usize, OdmError)>) -> Vec<CollectionChange> {
    let mut envelopes = Vec::with_capacity(2);
    for (ordinal, err) in errors {
        if ordinal == 0 {
            envelopes.push(CollectionChange::Error(err));
        } else {
            log::warn!("initial load could not resolve a document: {err}");
        }
    }
    envelopes.push(CollectionChange::Initial);
    envelopes
}

pub(crate) fn lock<T>(mirror: &Mutex<Mirror<T>>) -> MutexGuard<'_, Mirror<T>> {
    mirror.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Database, DocumentSnapshot, SnapshotMetadata};
    use crate::data_source::options::{Comparator, Filter};
    use crate::data_source::ParseHandler;
    use crate::error::OdmErrorCode;
    use crate::model::DocumentKey;
    use crate::store::InMemoryStore;
    use crate::value::{FieldValue, MapValue};
    use serde::Deserialize;
    use std::cmp::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Deserialize)]
    struct Item {
        rank: i64,
    }

    fn snapshot(id: &str, rank: i64) -> DocumentSnapshot {
        let mut map = MapValue::default();
        map.insert("rank", FieldValue::from_integer(rank));
        DocumentSnapshot::new(
            DocumentKey::from_string(&format!("items/{id}")).unwrap(),
            Some(map),
            SnapshotMetadata::default(),
        )
    }

    fn change(change_type: DocumentChangeType, id: &str, rank: i64) -> DocumentChange {
        DocumentChange::new(change_type, snapshot(id, rank), None, None)
    }

    fn by_rank() -> Mutex<Mirror<Item>> {
        Mutex::new(Mirror::new(
            None,
            Arc::new(|left: &Document<Item>, right: &Document<Item>| -> Ordering {
                left.data().rank.cmp(&right.data().rank)
            }),
        ))
    }

    fn fetcher(fetch_reference: bool) -> FetchCoordinator<Item> {
        let database = Database::new(Arc::new(InMemoryStore::new()));
        FetchCoordinator::new(database, fetch_reference, Duration::from_secs(5), 8, None)
    }

    fn ids(mirror: &Mutex<Mirror<Item>>) -> Vec<String> {
        mirror
            .lock()
            .unwrap()
            .iter()
            .map(|doc| doc.id().to_string())
            .collect()
    }

    async fn cycle(
        mirror: &Mutex<Mirror<Item>>,
        changes: Vec<DocumentChange>,
        kind: CycleKind,
    ) -> CycleReport<Item> {
        run_cycle(mirror, &fetcher(false), ChangeTypes::all(), changes, kind, 0)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initial_cycle_emits_single_initial_envelope() {
        let mirror = by_rank();
        let report = cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Added, "b", 2),
                change(DocumentChangeType::Added, "a", 1),
            ],
            CycleKind::Initial,
        )
        .await;
        assert_eq!(report.envelopes, vec![CollectionChange::Initial]);
        assert_eq!(ids(&mirror), vec!["a", "b"]);
        assert_eq!(report.documents.len(), 2);
    }

    #[tokio::test]
    async fn modification_that_reorders_is_reported_at_new_position() {
        let mirror = by_rank();
        cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Added, "a", 1),
                change(DocumentChangeType::Added, "b", 2),
            ],
            CycleKind::Initial,
        )
        .await;

        let report = cycle(
            &mirror,
            vec![change(DocumentChangeType::Modified, "a", 3)],
            CycleKind::Incremental,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["b", "a"]);
        assert_eq!(
            report.envelopes,
            vec![CollectionChange::Update(IndexChanges::new(vec![], vec![], vec![1]))]
        );
    }

    #[tokio::test]
    async fn large_batches_apply_in_one_pass() {
        let mirror = by_rank();
        let added: Vec<DocumentChange> = (0..5_000)
            .rev()
            .map(|rank| change(DocumentChangeType::Added, &format!("d{rank}"), rank))
            .collect();
        let report = cycle(&mirror, added, CycleKind::Initial).await;
        assert_eq!(report.envelopes, vec![CollectionChange::Initial]);
        assert_eq!(report.documents.len(), 5_000);

        let removed: Vec<DocumentChange> = (0..5_000)
            .filter(|rank| rank % 2 == 0)
            .map(|rank| change(DocumentChangeType::Removed, &format!("d{rank}"), rank))
            .collect();
        let report = cycle(&mirror, removed, CycleKind::Incremental).await;
        match &report.envelopes[..] {
            [CollectionChange::Update(changes)] => {
                assert_eq!(changes.deletions.len(), 2_500);
                assert_eq!(changes.deletions[1], 2);
            }
            other => panic!("unexpected envelopes {other:?}"),
        }

        let guard = mirror.lock().unwrap();
        assert_eq!(guard.len(), 2_500);
        assert_eq!(guard.index_of("d1"), Some(0));
        assert_eq!(guard.index_of("d4999"), Some(2_499));
    }

    #[tokio::test]
    async fn results_apply_in_change_order_whatever_order_they_resolve_in() {
        use futures::FutureExt;

        // Every document ties, so the view order is the order changes were applied.
        let unordered = || {
            Mutex::new(Mirror::new(
                None,
                Arc::new(|_: &Document<Item>, _: &Document<Item>| Ordering::Equal)
                    as Comparator<Item>,
            ))
        };
        let changes = || {
            vec![
                change(DocumentChangeType::Added, "a", 1),
                change(DocumentChangeType::Added, "b", 2),
                change(DocumentChangeType::Added, "c", 3),
            ]
        };
        // Earlier changes take longer, so they finish last.
        let slow_first: ParseHandler<Item> = Arc::new(|document: Document<Item>| {
            async move {
                let delay = 20 * (3 - document.data().rank) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Some(document)
            }
            .boxed()
        });
        let database = Database::new(Arc::new(InMemoryStore::new()));
        let reversed =
            FetchCoordinator::new(database, false, Duration::from_secs(5), 8, Some(slow_first));

        let in_order = unordered();
        let expected = run_cycle(
            &in_order,
            &fetcher(false),
            ChangeTypes::all(),
            changes(),
            CycleKind::Incremental,
            0,
        )
        .await
        .unwrap();
        let out_of_order = unordered();
        let report = run_cycle(
            &out_of_order,
            &reversed,
            ChangeTypes::all(),
            changes(),
            CycleKind::Incremental,
            0,
        )
        .await
        .unwrap();

        assert_eq!(ids(&out_of_order), vec!["a", "b", "c"]);
        assert_eq!(ids(&out_of_order), ids(&in_order));
        assert_eq!(report.envelopes, expected.envelopes);
        assert_eq!(
            report.envelopes,
            vec![CollectionChange::Update(IndexChanges::new(vec![], vec![0, 1, 2], vec![]))]
        );
        let inserted: Vec<&str> = report.inserted.iter().map(|document| document.id()).collect();
        assert_eq!(inserted, vec!["a", "b", "c"]);
    }

    fn stamped(change_type: DocumentChangeType, id: &str, seconds: i64) -> DocumentChange {
        let mut map = MapValue::default();
        map.insert("rank", FieldValue::from_integer(0));
        map.insert(
            "updatedAt",
            FieldValue::from_timestamp(crate::model::Timestamp::new(seconds, 0)),
        );
        let snapshot = DocumentSnapshot::new(
            DocumentKey::from_string(&format!("items/{id}")).unwrap(),
            Some(map),
            SnapshotMetadata::default(),
        );
        DocumentChange::new(change_type, snapshot, None, None)
    }

    #[tokio::test]
    async fn newest_update_moves_to_front_with_default_order() {
        let mirror = Mutex::new(Mirror::new(
            None,
            crate::data_source::options::updated_at_descending::<Item>(),
        ));
        cycle(
            &mirror,
            vec![
                stamped(DocumentChangeType::Added, "a", 1),
                stamped(DocumentChangeType::Added, "b", 2),
            ],
            CycleKind::Initial,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["b", "a"]);

        let report = cycle(
            &mirror,
            vec![stamped(DocumentChangeType::Modified, "a", 3)],
            CycleKind::Incremental,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["a", "b"]);
        assert_eq!(
            report.envelopes,
            vec![CollectionChange::Update(IndexChanges::new(vec![], vec![], vec![0]))]
        );
    }

    #[tokio::test]
    async fn duplicate_adds_are_ignored() {
        let mirror = by_rank();
        cycle(&mirror, vec![change(DocumentChangeType::Added, "a", 1)], CycleKind::Initial).await;
        let report = cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Added, "a", 1),
                change(DocumentChangeType::Added, "a", 1),
            ],
            CycleKind::Incremental,
        )
        .await;
        assert!(report.envelopes.is_empty());
        assert_eq!(mirror.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removals_are_idempotent_and_index_pre_cycle_view() {
        let mirror = by_rank();
        cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Added, "a", 1),
                change(DocumentChangeType::Added, "b", 2),
                change(DocumentChangeType::Added, "c", 3),
            ],
            CycleKind::Initial,
        )
        .await;

        let report = cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Removed, "b", 2),
                change(DocumentChangeType::Removed, "b", 2),
                change(DocumentChangeType::Removed, "zzz", 0),
                change(DocumentChangeType::Added, "d", 0),
            ],
            CycleKind::Incremental,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["d", "a", "c"]);
        assert_eq!(
            report.envelopes,
            vec![CollectionChange::Update(IndexChanges::new(vec![1], vec![0], vec![]))]
        );
    }

    #[tokio::test]
    async fn modify_of_unknown_document_is_a_no_op() {
        let mirror = by_rank();
        let report = cycle(
            &mirror,
            vec![change(DocumentChangeType::Modified, "ghost", 1)],
            CycleKind::Incremental,
        )
        .await;
        assert!(report.envelopes.is_empty());
        assert_eq!(mirror.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_change_types_are_skipped() {
        let mirror = by_rank();
        let report = run_cycle(
            &mirror,
            &fetcher(false),
            ChangeTypes::only(&[DocumentChangeType::Removed]),
            vec![change(DocumentChangeType::Added, "a", 1)],
            CycleKind::Incremental,
            0,
        )
        .await
        .unwrap();
        assert!(report.envelopes.is_empty());
        assert_eq!(mirror.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn failed_resolutions_become_error_envelopes() {
        let mirror = by_rank();
        let report = run_cycle(
            &mirror,
            &fetcher(true),
            ChangeTypes::all(),
            vec![
                change(DocumentChangeType::Added, "x", 1),
                change(DocumentChangeType::Added, "y", 2),
            ],
            CycleKind::Incremental,
            0,
        )
        .await
        .unwrap();
        assert_eq!(report.envelopes.len(), 2);
        for envelope in &report.envelopes {
            assert_eq!(envelope.error().unwrap().code, OdmErrorCode::InvalidReference);
        }
    }

    #[tokio::test]
    async fn initial_cycle_only_surfaces_first_failure() {
        let mirror = by_rank();
        let report = run_cycle(
            &mirror,
            &fetcher(true),
            ChangeTypes::all(),
            vec![
                change(DocumentChangeType::Added, "x", 1),
                change(DocumentChangeType::Added, "y", 2),
            ],
            CycleKind::Initial,
            0,
        )
        .await
        .unwrap();
        assert_eq!(report.envelopes.len(), 2);
        assert!(report.envelopes[0].error().is_some());
        assert!(report.envelopes[1].is_initial());
    }

    #[tokio::test]
    async fn predicate_changes_surface_as_insertions_and_deletions() {
        let positive = Filter::new(|doc: &Document<Item>| doc.data().rank > 0);
        let mirror = Mutex::new(Mirror::new(
            Some(positive),
            Arc::new(|left: &Document<Item>, right: &Document<Item>| {
                left.data().rank.cmp(&right.data().rank)
            }),
        ));
        cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Added, "a", 1),
                change(DocumentChangeType::Added, "b", -1),
            ],
            CycleKind::Initial,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["a"]);

        let report = cycle(
            &mirror,
            vec![
                change(DocumentChangeType::Modified, "a", -5),
                change(DocumentChangeType::Modified, "b", 4),
            ],
            CycleKind::Incremental,
        )
        .await;
        assert_eq!(ids(&mirror), vec!["b"]);
        assert_eq!(
            report.envelopes,
            vec![CollectionChange::Update(IndexChanges::new(vec![0], vec![0], vec![]))]
        );
    }

    #[tokio::test]
    async fn stale_generation_discards_results() {
        let mirror = by_rank();
        mirror.lock().unwrap().bump_generation();
        let report = run_cycle(
            &mirror,
            &fetcher(false),
            ChangeTypes::all(),
            vec![change(DocumentChangeType::Added, "a", 1)],
            CycleKind::Incremental,
            0,
        )
        .await;
        assert!(report.is_none());
        assert_eq!(mirror.lock().unwrap().len(), 0);
    }
}
