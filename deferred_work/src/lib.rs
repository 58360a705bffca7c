// Licensed under the Apache License, Version 2.0.

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! A bounded worker pool draining the three idempotent side-effect queues a call may produce:
//! uploading large objects, writing their hashref sidecars, and appending to the summary log. The
//! first two are drained before a call's `invocation` is declared written; the summary entry is
//! drained once the call's outcome is known, at the very end of the call. A cache hit from
//! `fast_result_probe` skips the upload/hashref queues entirely, so those only ever run on the
//! cold path.

use std::collections::HashSet;
use std::sync::Arc;

use blob_store::{BlobStore, BlobStoreError};
use hashing::Fingerprint;
use log::warn;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Matches the spec's stated typical cap for concurrent deferred-work tasks.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum DeferredWorkError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error("{count} deferred task(s) failed to complete")]
    TasksFailed { count: usize },
}

/// One unit of deferred work. All three kinds are idempotent puts: retrying or duplicating one is
/// harmless.
pub enum DeferredTask {
    /// Upload `bytes` to `uri`, a content-addressed path. Deduplicated per pool by `content_hash`
    /// so a large object referenced by several arguments is only uploaded once.
    UploadLargeObject {
        content_hash: Fingerprint,
        uri: String,
        bytes: Vec<u8>,
    },
    /// Write a small metadata sidecar describing a large object's provenance.
    WriteHashRef { uri: String, bytes: Vec<u8> },
    /// Append one record to the per-process summary log.
    WriteSummaryEntry { uri: String, bytes: Vec<u8> },
}

/// A bounded pool draining `DeferredTask`s against a `BlobStore`. One pool is expected to live for
/// the lifetime of a pipeline, so its content-hash dedup set stays warm across calls.
pub struct DeferredWorkPool {
    store: Arc<dyn BlobStore>,
    semaphore: Arc<Semaphore>,
    uploaded: Arc<Mutex<HashSet<Fingerprint>>>,
}

impl DeferredWorkPool {
    pub fn new(store: Arc<dyn BlobStore>, concurrency: usize) -> DeferredWorkPool {
        DeferredWorkPool {
            store,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            uploaded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Runs every task to completion, fully draining the pool before returning. A caller whose
    /// `invocation` write depends on these tasks having landed should always await this.
    pub async fn run_all(&self, tasks: Vec<DeferredTask>) -> Result<(), DeferredWorkError> {
        let mut join_set = JoinSet::new();
        for task in tasks {
            let store = self.store.clone();
            let semaphore = self.semaphore.clone();
            let uploaded = self.uploaded.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("deferred work semaphore is never closed");
                execute(&*store, task, &uploaded).await
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("deferred task failed: {e}");
                    failures += 1;
                }
                Err(join_err) => {
                    warn!("deferred task panicked: {join_err}");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            return Err(DeferredWorkError::TasksFailed { count: failures });
        }
        Ok(())
    }
}

async fn execute(
    store: &dyn BlobStore,
    task: DeferredTask,
    uploaded: &Mutex<HashSet<Fingerprint>>,
) -> Result<(), BlobStoreError> {
    match task {
        DeferredTask::UploadLargeObject {
            content_hash,
            uri,
            bytes,
        } => {
            {
                let mut guard = uploaded.lock();
                if guard.contains(&content_hash) {
                    return Ok(());
                }
                guard.insert(content_hash);
            }
            store.put(&uri, bytes).await
        }
        DeferredTask::WriteHashRef { uri, bytes } => store.put(&uri, bytes).await,
        DeferredTask::WriteSummaryEntry { uri, bytes } => store.put(&uri, bytes).await,
    }
}

#[cfg(test)]
mod tests {
    use blob_store::InMemoryBlobStore;

    use super::*;

    #[tokio::test]
    async fn run_all_writes_every_task() {
        let store = Arc::new(InMemoryBlobStore::new());
        let pool = DeferredWorkPool::new(store.clone(), 4);

        pool.run_all(vec![
            DeferredTask::UploadLargeObject {
                content_hash: Fingerprint::from_bytes(b"payload"),
                uri: "mem://root/obj/abc".to_owned(),
                bytes: b"payload".to_vec(),
            },
            DeferredTask::WriteHashRef {
                uri: "mem://root/hashref/abc".to_owned(),
                bytes: b"ref".to_vec(),
            },
            DeferredTask::WriteSummaryEntry {
                uri: "mem://root/summary/001".to_owned(),
                bytes: b"entry".to_vec(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(store.get("mem://root/obj/abc").await.unwrap(), b"payload");
        assert_eq!(store.get("mem://root/hashref/abc").await.unwrap(), b"ref");
        assert_eq!(store.get("mem://root/summary/001").await.unwrap(), b"entry");
    }

    #[tokio::test]
    async fn duplicate_large_objects_upload_only_once() {
        let store = Arc::new(InMemoryBlobStore::new());
        let pool = DeferredWorkPool::new(store.clone(), 4);
        let content_hash = Fingerprint::from_bytes(b"shared");

        pool.run_all(vec![
            DeferredTask::UploadLargeObject {
                content_hash,
                uri: "mem://root/obj/shared".to_owned(),
                bytes: b"shared".to_vec(),
            },
            DeferredTask::UploadLargeObject {
                content_hash,
                uri: "mem://root/obj/shared".to_owned(),
                bytes: b"different-but-deduped-away".to_vec(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(store.get("mem://root/obj/shared").await.unwrap(), b"shared");
    }

    struct AlwaysFailsBlobStore;

    #[async_trait::async_trait]
    impl BlobStore for AlwaysFailsBlobStore {
        async fn put(&self, uri: &str, _bytes: Vec<u8>) -> Result<(), BlobStoreError> {
            Err(BlobStoreError::WriteFailed(uri.to_owned(), "disk full".to_owned()))
        }
        async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
            Err(BlobStoreError::NotFound(uri.to_owned()))
        }
        async fn head(&self, _uri: &str) -> Result<blob_store::HeadResult, BlobStoreError> {
            Ok(blob_store::HeadResult::absent())
        }
        async fn list(&self, _uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
            Ok(vec![])
        }
        async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
            Err(BlobStoreError::NotFound(uri.to_owned()))
        }
    }

    #[tokio::test]
    async fn a_failed_task_is_reported_as_tasks_failed() {
        let pool = DeferredWorkPool::new(Arc::new(AlwaysFailsBlobStore), 4);

        let err = pool
            .run_all(vec![DeferredTask::WriteHashRef {
                uri: "mem://root/hashref/ok".to_owned(),
                bytes: b"ref".to_vec(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, DeferredWorkError::TasksFailed { count: 1 }));
    }
}
