use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use futures::StreamExt;

use crate::api::{
    compute_document_changes, DocumentSnapshot, QueryDefinition, QuerySnapshot, SnapshotMetadata,
};
use crate::error::{internal_error, invalid_argument, not_found, OdmResult};
use crate::model::{DocumentKey, FieldPath, Timestamp};
use crate::value::{FieldValue, MapValue, ValueKind};

use super::query_evaluator::apply_query_to_documents;
use super::{DocumentStore, ListenRegistration, WriteOperation};

/// Store that keeps documents in process memory and pushes changes to listeners.
///
/// Writes are authoritative as soon as `commit` returns, so snapshots never carry
/// pending writes. Server-timestamp sentinels resolve to the commit time.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<String, StoredDocument>,
    watchers: BTreeMap<u64, Watcher>,
    next_watcher_id: u64,
}

#[derive(Clone)]
struct StoredDocument {
    key: DocumentKey,
    data: MapValue,
}

struct Watcher {
    query: QueryDefinition,
    sender: async_channel::Sender<OdmResult<QuerySnapshot>>,
    last: Vec<DocumentSnapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open listeners; mainly useful to assert that subscriptions were released.
    pub fn listener_count(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // a poisoned lock only means a listener callback panicked; the map is still valid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StoreState {
    fn snapshots(&self) -> Vec<DocumentSnapshot> {
        self.documents
            .values()
            .map(|doc| {
                DocumentSnapshot::new(
                    doc.key.clone(),
                    Some(doc.data.clone()),
                    SnapshotMetadata::new(false, false),
                )
            })
            .collect()
    }

    fn evaluate(&self, query: &QueryDefinition) -> Vec<DocumentSnapshot> {
        apply_query_to_documents(self.snapshots(), query)
    }

    fn validate(&self, writes: &[WriteOperation]) -> OdmResult<()> {
        // updates may target documents created earlier in the same batch
        let mut present: BTreeMap<String, bool> = BTreeMap::new();
        for write in writes {
            let canonical = write.key().path().canonical_string();
            let exists = present
                .get(&canonical)
                .copied()
                .unwrap_or_else(|| self.documents.contains_key(&canonical));
            match write {
                WriteOperation::Set { .. } => {
                    present.insert(canonical, true);
                }
                WriteOperation::Update { data, .. } => {
                    if !exists {
                        return Err(not_found(format!("Document {canonical} does not exist")));
                    }
                    if data.is_empty() {
                        return Err(invalid_argument("update requires at least one field"));
                    }
                    for field in data.fields().keys() {
                        FieldPath::from_dot_separated(field)?;
                    }
                }
                WriteOperation::Delete { .. } => {
                    present.insert(canonical, false);
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: WriteOperation, now: Timestamp) -> OdmResult<()> {
        match write {
            WriteOperation::Set { key, data, merge } => {
                let canonical = key.path().canonical_string();
                let mut fields = match (merge, self.documents.get(&canonical)) {
                    (true, Some(existing)) => existing.data.fields().clone(),
                    _ => BTreeMap::new(),
                };
                for (field, value) in data.into_fields() {
                    fields.insert(field, value.resolve_server_timestamps(now));
                }
                self.documents.insert(
                    canonical,
                    StoredDocument {
                        key,
                        data: MapValue::new(fields),
                    },
                );
            }
            WriteOperation::Update { key, data } => {
                let canonical = key.path().canonical_string();
                let stored = self
                    .documents
                    .get_mut(&canonical)
                    .ok_or_else(|| internal_error(format!("validated document {canonical} vanished")))?;
                let mut fields = stored.data.fields().clone();
                for (field, value) in data.into_fields() {
                    let path = FieldPath::from_dot_separated(&field)?;
                    set_value_at_field_path(&mut fields, path.segments(), value.resolve_server_timestamps(now));
                }
                stored.data = MapValue::new(fields);
            }
            WriteOperation::Delete { key } => {
                self.documents.remove(&key.path().canonical_string());
            }
        }
        Ok(())
    }

    fn notify_watchers(&mut self) {
        let ids: Vec<u64> = self.watchers.keys().copied().collect();
        for id in ids {
            let current = match self.watchers.get(&id) {
                Some(watcher) => self.evaluate(&watcher.query),
                None => continue,
            };
            let Some(watcher) = self.watchers.get_mut(&id) else {
                continue;
            };
            let changes = compute_document_changes(&watcher.last, &current);
            if changes.is_empty() {
                continue;
            }
            watcher.last = current.clone();
            let snapshot = QuerySnapshot::new(current, changes, SnapshotMetadata::new(false, false));
            if watcher.sender.try_send(Ok(snapshot)).is_err() {
                log::debug!("dropping closed listener {id}");
                self.watchers.remove(&id);
            }
        }
    }
}

fn set_value_at_field_path(fields: &mut BTreeMap<String, FieldValue>, segments: &[String], value: FieldValue) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }
    let mut child = match fields.get(first).map(FieldValue::kind) {
        Some(ValueKind::Map(map)) => map.fields().clone(),
        _ => BTreeMap::new(),
    };
    set_value_at_field_path(&mut child, rest, value);
    fields.insert(first.clone(), FieldValue::from_map(child));
}

fn remove_watcher(state: &Weak<Mutex<StoreState>>, id: u64) {
    if let Some(state) = state.upgrade() {
        let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.watchers.remove(&id);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_document(&self, key: &DocumentKey) -> OdmResult<DocumentSnapshot> {
        let state = self.lock();
        let data = state
            .documents
            .get(&key.path().canonical_string())
            .map(|doc| doc.data.clone());
        Ok(DocumentSnapshot::new(
            key.clone(),
            data,
            SnapshotMetadata::new(false, false),
        ))
    }

    async fn run_query(&self, query: &QueryDefinition) -> OdmResult<QuerySnapshot> {
        let documents = self.lock().evaluate(query);
        Ok(QuerySnapshot::from_documents(
            documents,
            SnapshotMetadata::new(false, false),
        ))
    }

    async fn listen(
        &self,
        query: &QueryDefinition,
        _include_metadata_changes: bool,
    ) -> OdmResult<ListenRegistration> {
        let (sender, receiver) = async_channel::unbounded();
        let id = {
            let mut state = self.lock();
            let current = state.evaluate(query);
            let initial = QuerySnapshot::from_documents(current.clone(), SnapshotMetadata::new(false, false));
            sender
                .try_send(Ok(initial))
                .map_err(|err| internal_error(format!("failed to seed listener: {err}")))?;

            let id = state.next_watcher_id;
            state.next_watcher_id += 1;
            state.watchers.insert(
                id,
                Watcher {
                    query: query.clone(),
                    sender,
                    last: current,
                },
            );
            id
        };

        let weak = Arc::downgrade(&self.state);
        Ok(ListenRegistration::new(
            receiver.boxed(),
            Some(Box::new(move || remove_watcher(&weak, id))),
        ))
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> OdmResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        state.validate(&writes)?;
        let now = Timestamp::now();
        for write in writes {
            state.apply(write, now)?;
        }
        state.notify_watchers();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DocumentChangeType;
    use crate::error::OdmErrorCode;
    use futures::StreamExt;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn fields(entries: &[(&str, FieldValue)]) -> MapValue {
        let mut map = MapValue::default();
        for (name, value) in entries {
            map.insert(*name, value.clone());
        }
        map
    }

    fn set(path: &str, entries: &[(&str, FieldValue)]) -> WriteOperation {
        WriteOperation::Set {
            key: key(path),
            data: fields(entries),
            merge: false,
        }
    }

    #[tokio::test]
    async fn set_get_roundtrip_resolves_server_timestamps() {
        let store = InMemoryStore::new();
        store
            .commit(vec![set(
                "items/a",
                &[("at", FieldValue::server_timestamp()), ("n", FieldValue::from_integer(1))],
            )])
            .await
            .unwrap();

        let snapshot = store.get_document(&key("items/a")).await.unwrap();
        assert!(snapshot.exists());
        assert!(snapshot.get("at").and_then(FieldValue::as_timestamp).is_some());
        assert!(!snapshot.has_pending_writes());
    }

    #[tokio::test]
    async fn batch_is_atomic_when_update_targets_missing_document() {
        let store = InMemoryStore::new();
        let writes = vec![
            set("items/a", &[("n", FieldValue::from_integer(1))]),
            WriteOperation::Update {
                key: key("items/missing"),
                data: fields(&[("n", FieldValue::from_integer(2))]),
            },
        ];
        let err = store.commit(writes).await.unwrap_err();
        assert_eq!(err.code, OdmErrorCode::NotFound);
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn update_writes_nested_paths() {
        let store = InMemoryStore::new();
        store
            .commit(vec![set("items/a", &[("n", FieldValue::from_integer(1))])])
            .await
            .unwrap();
        store
            .commit(vec![WriteOperation::Update {
                key: key("items/a"),
                data: fields(&[("meta.color", FieldValue::from_string("red"))]),
            }])
            .await
            .unwrap();

        let snapshot = store.get_document(&key("items/a")).await.unwrap();
        let path = FieldPath::from_dot_separated("meta.color").unwrap();
        assert_eq!(
            snapshot.data().and_then(|map| map.get_path(&path)),
            Some(&FieldValue::from_string("red"))
        );
        assert_eq!(snapshot.get("n"), Some(&FieldValue::from_integer(1)));
    }

    #[tokio::test]
    async fn listeners_receive_initial_and_incremental_snapshots() {
        let store = InMemoryStore::new();
        store
            .commit(vec![set("items/a", &[("n", FieldValue::from_integer(1))])])
            .await
            .unwrap();

        let query = QueryDefinition::new(crate::model::ResourcePath::from_string("items").unwrap());
        let mut registration = store.listen(&query, true).await.unwrap();

        let initial = registration.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial.document_changes(true)[0].change_type(), DocumentChangeType::Added);

        store
            .commit(vec![
                set("items/b", &[("n", FieldValue::from_integer(2))]),
                WriteOperation::Delete { key: key("items/a") },
            ])
            .await
            .unwrap();
        let update = registration.next().await.unwrap().unwrap();
        let kinds: Vec<_> = update
            .document_changes(true)
            .iter()
            .map(|change| (change.change_type(), change.document().id().to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (DocumentChangeType::Removed, "a".to_string()),
                (DocumentChangeType::Added, "b".to_string()),
            ]
        );

        assert_eq!(store.listener_count(), 1);
        drop(registration);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn listeners_ignore_other_collections() {
        let store = InMemoryStore::new();
        let query = QueryDefinition::new(crate::model::ResourcePath::from_string("items").unwrap());
        let mut registration = store.listen(&query, false).await.unwrap();
        assert!(registration.next().await.unwrap().unwrap().is_empty());

        store
            .commit(vec![set("users/u", &[("n", FieldValue::from_integer(1))])])
            .await
            .unwrap();
        store
            .commit(vec![set("items/x", &[("n", FieldValue::from_integer(1))])])
            .await
            .unwrap();

        let update = registration.next().await.unwrap().unwrap();
        assert_eq!(update.documents()[0].id(), "x");
    }
}
