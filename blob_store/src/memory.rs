use std::collections::BTreeMap;

use async_trait::async_trait;
use hashing::Fingerprint;
use parking_lot::Mutex;

use crate::{BlobStore, BlobStoreError, HeadResult};

/// An in-process `BlobStore` backed by a sorted map. Used by tests and by single-process
/// `require_all_results` demos; never durable across a restart.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> InMemoryBlobStore {
        InMemoryBlobStore::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        self.blobs.lock().insert(uri.to_owned(), bytes);
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.blobs
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(uri.to_owned()))
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        Ok(match self.blobs.lock().get(uri) {
            Some(bytes) => HeadResult {
                exists: true,
                size: Some(bytes.len()),
                content_hash: Some(Fingerprint::from_bytes(bytes)),
            },
            None => HeadResult::absent(),
        })
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        Ok(self
            .blobs
            .lock()
            .range(uri_prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(uri_prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        self.blobs
            .lock()
            .remove(uri)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::NotFound(uri.to_owned()))
    }
}
