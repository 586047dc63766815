use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_argument, OdmResult};
use crate::model::{DocumentKey, Timestamp};

/// What the blob store reports about a stored object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub url: String,
    pub updated: Timestamp,
}

/// A file attached to a document.
///
/// Serializes to its descriptive fields only, so it can live inside a document
/// payload; the bytes are held locally until uploaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFile {
    name: String,
    content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip)]
    data: Option<Bytes>,
}

impl StorageFile {
    /// A file that still has to be uploaded.
    pub fn new(name: &str, data: impl Into<Bytes>, content_type: &str) -> OdmResult<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(invalid_argument(format!(
                "invalid file name '{name}': must be non-empty and contain no '/'"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            path: None,
            url: None,
            size: None,
            data: Some(data.into()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Whether the bytes still need to reach the blob store.
    pub fn needs_upload(&self) -> bool {
        self.data.is_some()
    }

    /// Blob path of this file when attached to the document at `owner`.
    pub fn storage_path(&self, owner: &DocumentKey) -> String {
        format!("{}/{}", owner.path().canonical_string(), self.name)
    }

    pub(crate) fn take_data(&mut self) -> Option<Bytes> {
        self.data.take()
    }

    pub(crate) fn restore_data(&mut self, data: Bytes) {
        self.data = Some(data);
    }

    pub(crate) fn apply_metadata(&mut self, metadata: &FileMetadata) {
        self.path = Some(metadata.path.clone());
        self.url = Some(metadata.url.clone());
        self.size = Some(metadata.size);
        self.content_type = metadata.content_type.clone();
    }
}
