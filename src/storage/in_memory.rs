use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{not_found, OdmResult};
use crate::model::Timestamp;
use crate::platform::runtime::sleep;

use super::{BlobStore, FileMetadata};

struct StoredObject {
    data: Bytes,
    metadata: FileMetadata,
}

/// Blob store kept in process memory. Objects are addressed as `memory://<path>`.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    latency: Duration,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `put` by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.lock().get(path).map(|object| object.data.clone())
    }

    pub fn metadata(&self, path: &str) -> Option<FileMetadata> {
        self.lock().get(path).map(|object| object.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> OdmResult<FileMetadata> {
        sleep(self.latency).await;
        let metadata = FileMetadata {
            path: path.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            url: format!("memory://{path}"),
            updated: Timestamp::now(),
        };
        self.lock().insert(
            path.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        log::debug!("stored blob {path} ({} bytes)", metadata.size);
        Ok(metadata)
    }

    async fn delete(&self, path: &str) -> OdmResult<()> {
        match self.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(not_found(format!("no blob stored at {path}"))),
        }
    }
}
