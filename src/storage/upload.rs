use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};

use crate::error::{timeout, OdmError, OdmResult};
use crate::model::DocumentKey;

use super::{BlobStore, StorageFile};

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// Represents the execution state of one file's upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadTaskState {
    Pending,
    Running,
    Completed,
    Error,
    /// The deadline passed before the upload finished.
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSettings {
    /// Deadline for the whole group of uploads.
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl UploadSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }
}

/// A file together with how its upload ended.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub file: StorageFile,
    pub state: UploadTaskState,
    pub error: Option<OdmError>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadOutcome {
    /// One entry per input file, in input order.
    pub files: Vec<UploadedFile>,
}

impl UploadOutcome {
    pub fn is_complete(&self) -> bool {
        self.files
            .iter()
            .all(|entry| entry.state == UploadTaskState::Completed)
    }

    pub fn first_error(&self) -> Option<&OdmError> {
        self.files.iter().find_map(|entry| entry.error.as_ref())
    }

    /// The files, updated with their stored location where the upload succeeded.
    pub fn into_files(self) -> Vec<StorageFile> {
        self.files.into_iter().map(|entry| entry.file).collect()
    }
}

/// Uploads the files attached to a document concurrently under one deadline.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn BlobStore>,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_settings(store, UploadSettings::default())
    }

    pub fn with_settings(store: Arc<dyn BlobStore>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Uploads every file that still holds bytes to a path under `owner`.
    ///
    /// Files already uploaded are reported as completed without touching the
    /// store. A failed upload keeps its bytes so it can be retried.
    pub async fn upload(&self, owner: &DocumentKey, files: Vec<StorageFile>) -> UploadOutcome {
        let mut entries: Vec<UploadedFile> = files
            .into_iter()
            .map(|file| UploadedFile {
                state: if file.needs_upload() {
                    UploadTaskState::Pending
                } else {
                    UploadTaskState::Completed
                },
                file,
                error: None,
            })
            .collect();

        let mut jobs = Vec::new();
        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.state != UploadTaskState::Pending {
                continue;
            }
            if let Some(data) = entry.file.take_data() {
                let path = entry.file.storage_path(owner);
                let content_type = entry.file.content_type().to_string();
                entry.state = UploadTaskState::Running;
                jobs.push((index, path, data, content_type));
            }
        }
        if jobs.is_empty() {
            return UploadOutcome { files: entries };
        }

        let retained: Vec<_> = jobs
            .iter()
            .map(|(index, _, data, _)| (*index, data.clone()))
            .collect();
        let mut outstanding: BTreeSet<usize> = jobs.iter().map(|(index, ..)| *index).collect();
        let deadline = Instant::now() + self.settings.timeout;
        let store = &self.store;
        let mut running = stream::iter(jobs.into_iter().map(|(index, path, data, content_type)| async move {
            let result = store.put(&path, data, &content_type).await;
            (index, result)
        }))
        .buffer_unordered(self.settings.max_concurrent.max(1));

        loop {
            match timeout_at(deadline, running.next()).await {
                Ok(Some((index, result))) => {
                    outstanding.remove(&index);
                    let entry = &mut entries[index];
                    match result {
                        Ok(metadata) => {
                            entry.file.apply_metadata(&metadata);
                            entry.state = UploadTaskState::Completed;
                        }
                        Err(err) => {
                            log::warn!("upload of {} failed: {err}", entry.file.name());
                            entry.state = UploadTaskState::Error;
                            entry.error = Some(err);
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "{} uploads still running after {:?}",
                        outstanding.len(),
                        self.settings.timeout
                    );
                    break;
                }
            }
        }
        drop(running);

        for index in outstanding {
            let entry = &mut entries[index];
            entry.state = UploadTaskState::Canceled;
            entry.error = Some(timeout(format!(
                "upload of {} did not finish in time",
                entry.file.name()
            )));
        }
        for (index, data) in retained {
            let entry = &mut entries[index];
            if entry.state != UploadTaskState::Completed {
                entry.file.restore_data(data);
            }
        }

        UploadOutcome { files: entries }
    }

    /// Removes an uploaded file from the blob store.
    pub async fn delete(&self, file: &StorageFile) -> OdmResult<()> {
        match file.path() {
            Some(path) => self.store.delete(path).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlobStore;
    use crate::error::OdmErrorCode;

    fn owner() -> DocumentKey {
        DocumentKey::from_string("users/u1").unwrap()
    }

    #[tokio::test]
    async fn uploads_pending_files_in_order() {
        let store = Arc::new(InMemoryBlobStore::new());
        let uploader = Uploader::new(store.clone());
        let files = vec![
            StorageFile::new("a.txt", b"alpha".to_vec(), "text/plain").unwrap(),
            StorageFile::new("b.txt", b"beta".to_vec(), "text/plain").unwrap(),
        ];

        let outcome = uploader.upload(&owner(), files).await;
        assert!(outcome.is_complete());
        let files = outcome.into_files();
        assert_eq!(files[0].name(), "a.txt");
        assert_eq!(files[0].path(), Some("users/u1/a.txt"));
        assert_eq!(files[1].size(), Some(4));
        assert!(!files[1].needs_upload());
        assert_eq!(store.get("users/u1/b.txt").unwrap().as_ref(), b"beta");
    }

    #[tokio::test]
    async fn already_uploaded_files_are_left_alone() {
        let store = Arc::new(InMemoryBlobStore::new());
        let uploader = Uploader::new(store.clone());
        let first = uploader
            .upload(&owner(), vec![StorageFile::new("a.txt", b"x".to_vec(), "text/plain").unwrap()])
            .await
            .into_files();
        store.delete("users/u1/a.txt").await.unwrap();

        let again = uploader.upload(&owner(), first).await;
        assert!(again.is_complete());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn slow_uploads_are_canceled_and_keep_their_bytes() {
        let store = Arc::new(InMemoryBlobStore::new().with_latency(Duration::from_secs(5)));
        let uploader = Uploader::with_settings(
            store,
            UploadSettings::default().with_timeout(Duration::from_millis(50)),
        );
        let outcome = uploader
            .upload(&owner(), vec![StorageFile::new("big.bin", vec![0u8; 16], "application/octet-stream").unwrap()])
            .await;

        assert!(!outcome.is_complete());
        let entry = &outcome.files[0];
        assert_eq!(entry.state, UploadTaskState::Canceled);
        assert_eq!(entry.error.as_ref().unwrap().code, OdmErrorCode::Timeout);
        assert!(entry.file.needs_upload());
    }

    #[tokio::test]
    async fn delete_ignores_files_never_uploaded() {
        let uploader = Uploader::new(Arc::new(InMemoryBlobStore::new()));
        let file = StorageFile::new("a.txt", b"x".to_vec(), "text/plain").unwrap();
        uploader.delete(&file).await.unwrap();
    }
}
