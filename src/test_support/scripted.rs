use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_channel::Sender;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;

use crate::api::{DocumentSnapshot, QueryDefinition, QuerySnapshot, SnapshotMetadata};
use crate::codec;
use crate::error::{OdmError, OdmResult};
use crate::model::DocumentKey;
use crate::store::{DocumentStore, ListenRegistration, WriteOperation};
use crate::value::MapValue;

/// A store driven by the test: listeners only see what the test pushes, reads
/// of selected documents never finish, and queries can be made to fail.
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    documents: BTreeMap<String, MapValue>,
    hung: HashSet<String>,
    listeners: Vec<Sender<OdmResult<QuerySnapshot>>>,
    query_failure: Option<OdmError>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn listener_count(&self) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    /// Point reads of `path` never complete.
    pub fn hang_document(&self, path: &str) {
        self.lock().hung.insert(path.to_string());
    }

    pub fn fail_queries(&self, err: OdmError) {
        self.lock().query_failure = Some(err);
    }

    /// Stores the documents and delivers them to every listener as additions.
    pub fn push_added<T: Serialize>(&self, documents: &[(&str, &T)]) {
        let mut state = self.lock();
        let snapshots: Vec<DocumentSnapshot> = documents
            .iter()
            .map(|(path, data)| {
                let map = codec::encode(*data).expect("test payload encodes");
                state.documents.insert(path.to_string(), map.clone());
                DocumentSnapshot::new(
                    DocumentKey::from_string(path).expect("test path is a document path"),
                    Some(map),
                    SnapshotMetadata::default(),
                )
            })
            .collect();
        let snapshot = QuerySnapshot::from_documents(snapshots, SnapshotMetadata::default());
        for listener in &state.listeners {
            let _ = listener.try_send(Ok(snapshot.clone()));
        }
    }

    /// Delivers `err` to every listener.
    pub fn fail(&self, err: OdmError) {
        for listener in &self.lock().listeners {
            let _ = listener.try_send(Err(err.clone()));
        }
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn get_document(&self, key: &DocumentKey) -> OdmResult<DocumentSnapshot> {
        let path = key.path().canonical_string();
        let (hung, data) = {
            let state = self.lock();
            (state.hung.contains(&path), state.documents.get(&path).cloned())
        };
        if hung {
            futures::future::pending::<()>().await;
        }
        Ok(DocumentSnapshot::new(key.clone(), data, SnapshotMetadata::default()))
    }

    async fn run_query(&self, query: &QueryDefinition) -> OdmResult<QuerySnapshot> {
        let state = self.lock();
        if let Some(err) = &state.query_failure {
            return Err(err.clone());
        }
        let documents = state
            .documents
            .iter()
            .filter_map(|(path, data)| {
                let key = DocumentKey::from_string(path).ok()?;
                query
                    .matches_collection(&key)
                    .then(|| DocumentSnapshot::new(key, Some(data.clone()), SnapshotMetadata::default()))
            })
            .collect();
        Ok(QuerySnapshot::from_documents(documents, SnapshotMetadata::default()))
    }

    async fn listen(
        &self,
        _query: &QueryDefinition,
        _include_metadata_changes: bool,
    ) -> OdmResult<ListenRegistration> {
        let (sender, receiver) = async_channel::unbounded();
        self.lock().listeners.push(sender);
        Ok(ListenRegistration::new(receiver.boxed(), None))
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> OdmResult<()> {
        let mut state = self.lock();
        for write in writes {
            let path = write.key().path().canonical_string();
            match write {
                WriteOperation::Set { data, .. } => {
                    state.documents.insert(path, data);
                }
                WriteOperation::Update { data, .. } => {
                    let entry = state.documents.entry(path).or_default();
                    for (field, value) in data.into_fields() {
                        entry.insert(field, value);
                    }
                }
                WriteOperation::Delete { .. } => {
                    state.documents.remove(&path);
                }
            }
        }
        Ok(())
    }
}
