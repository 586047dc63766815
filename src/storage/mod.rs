//! Blob attachments: files stored next to documents in a companion blob store.

mod file;
pub mod in_memory;
mod upload;

pub use file::{FileMetadata, StorageFile};
pub use in_memory::InMemoryBlobStore;
pub use upload::{UploadOutcome, UploadSettings, UploadTaskState, UploadedFile, Uploader};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::OdmResult;

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stores `data` at `path`, replacing whatever was there.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> OdmResult<FileMetadata>;

    /// Fails with `NotFound` when nothing is stored at `path`.
    async fn delete(&self, path: &str) -> OdmResult<()>;
}
