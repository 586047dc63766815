use std::sync::Arc;

use firestore_odm::storage::{UploadTaskState, Uploader};
use firestore_odm::{
    BatchState, Database, Document, InMemoryBlobStore, InMemoryStore, OdmErrorCode,
    ServerTimestamp, StorageFile,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    #[serde(default)]
    avatar: Option<StorageFile>,
}

#[tokio::test]
async fn batch_commits_documents_atomically() {
    let store = Arc::new(InMemoryStore::new());
    let database = Database::new(store.clone());
    let users = database.collection("users").unwrap();

    let alice = Document::with_id(&users, "alice", Profile { name: "Alice".into(), avatar: None }).unwrap();
    let bob = Document::with_id(&users, "bob", Profile { name: "Bob".into(), avatar: None }).unwrap();
    assert_eq!(alice.created_at(), ServerTimestamp::Pending);

    let mut batch = database.batch();
    batch.save(&alice).unwrap().save(&bob).unwrap();
    batch.commit().await.unwrap();
    assert_eq!(batch.state(), BatchState::Committed);
    assert_eq!(store.document_count(), 2);

    let err = batch.commit().await.unwrap_err();
    assert_eq!(err.code, OdmErrorCode::InvalidState);

    let stored = Document::<Profile>::get(&database.doc("users/alice").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.created_at().resolved().is_some());
    assert_eq!(stored.data().name, "Alice");

    let mut cleanup = database.batch();
    cleanup.delete(&stored).unwrap();
    cleanup.delete(&bob).unwrap();
    cleanup.commit().await.unwrap();
    assert_eq!(store.document_count(), 0);
}

#[tokio::test]
async fn failed_update_leaves_store_untouched() {
    let store = Arc::new(InMemoryStore::new());
    let database = Database::new(store.clone());
    let users = database.collection("users").unwrap();
    let saved = Document::with_id(&users, "saved", Profile { name: "S".into(), avatar: None }).unwrap();
    let missing = Document::with_id(&users, "missing", Profile { name: "M".into(), avatar: None }).unwrap();

    let mut batch = database.batch();
    batch.save(&saved).unwrap().update(&missing).unwrap();
    let err = batch.commit().await.unwrap_err();
    assert_eq!(err.code, OdmErrorCode::NotFound);
    assert_eq!(store.document_count(), 0);
}

#[tokio::test]
async fn attachments_upload_before_the_document_is_saved() {
    let database = Database::new(Arc::new(InMemoryStore::new()));
    let blobs = Arc::new(InMemoryBlobStore::new());
    let uploader = Uploader::new(blobs.clone());
    let users = database.collection("users").unwrap();

    let mut profile = Document::with_id(
        &users,
        "carol",
        Profile {
            name: "Carol".into(),
            avatar: Some(StorageFile::new("avatar.png", vec![137u8, 80, 78, 71], "image/png").unwrap()),
        },
    )
    .unwrap();

    let files = profile.data_mut().avatar.take().into_iter().collect();
    let outcome = uploader.upload(profile.key(), files).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.files[0].state, UploadTaskState::Completed);
    profile.data_mut().avatar = outcome.into_files().into_iter().next();
    profile.save(&database).await.unwrap();

    let stored = Document::<Profile>::get(&database.doc("users/carol").unwrap())
        .await
        .unwrap()
        .unwrap();
    let avatar = stored.data().avatar.clone().unwrap();
    assert_eq!(avatar.path(), Some("users/carol/avatar.png"));
    assert_eq!(avatar.url(), Some("memory://users/carol/avatar.png"));
    assert_eq!(blobs.get("users/carol/avatar.png").unwrap().len(), 4);

    uploader.delete(&avatar).await.unwrap();
    assert!(blobs.is_empty());
}
