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

//! Test doubles and scenario builders shared across this workspace's integration tests: a
//! `BlobStore` that fails transiently on demand, a `ShimContract` that counts and scripts its own
//! dispatches, and small constructors for the `Thunk`/`MemoKeyParams` boilerplate every scenario
//! needs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use blob_store::{BlobStore, BlobStoreError, HeadResult, InMemoryBlobStore};
use memo_key::{CalledFunction, MemoKeyParams};
use serializer::{ArgValue, ExceptionInfo, ResultEnvelope, ResultMetadata, SerializeError, Thunk};
use shim::{ShimContract, ShimError, ShimResult};

/// Wraps an [`InMemoryBlobStore`] so that the first `failures_remaining` calls into a chosen
/// operation return [`BlobStoreError::TransientError`] before falling through to the real store.
/// Grounded in the same failure-injection shape the `blob_store` crate uses to test its own
/// retry wrapper, generalized to cover whichever operation a test cares about.
pub struct FlakyBlobStore {
    inner: InMemoryBlobStore,
    op: FlakyOp,
    failures_remaining: AtomicU32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlakyOp {
    Put,
    Get,
    Head,
    List,
    Delete,
}

impl FlakyBlobStore {
    pub fn new(op: FlakyOp, failures: u32) -> FlakyBlobStore {
        FlakyBlobStore {
            inner: InMemoryBlobStore::new(),
            op,
            failures_remaining: AtomicU32::new(failures),
        }
    }

    fn maybe_fail(&self, op: FlakyOp, uri: &str) -> Option<BlobStoreError> {
        if op != self.op {
            return None;
        }
        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        consumed
            .is_ok()
            .then(|| BlobStoreError::TransientError(uri.to_owned(), "injected by testutil".to_owned()))
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        if let Some(e) = self.maybe_fail(FlakyOp::Put, uri) {
            return Err(e);
        }
        self.inner.put(uri, bytes).await
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        if let Some(e) = self.maybe_fail(FlakyOp::Get, uri) {
            return Err(e);
        }
        self.inner.get(uri).await
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        if let Some(e) = self.maybe_fail(FlakyOp::Head, uri) {
            return Err(e);
        }
        self.inner.head(uri).await
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        if let Some(e) = self.maybe_fail(FlakyOp::List, uri_prefix) {
            return Err(e);
        }
        self.inner.list(uri_prefix).await
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        if let Some(e) = self.maybe_fail(FlakyOp::Delete, uri) {
            return Err(e);
        }
        self.inner.delete(uri).await
    }
}

/// A scripted [`ShimContract`]: counts every `dispatch` call and, unless told to stay silent,
/// writes a canned `result` or `exception` envelope and releases the lease itself -- standing in
/// for a remote that ran to completion synchronously.
pub struct ScriptedShim {
    pub dispatches: AtomicUsize,
    store: std::sync::Arc<dyn BlobStore>,
    script: Mutex<Box<dyn FnMut() -> ScriptedOutcome + Send>>,
}

/// What [`ScriptedShim`] should do on its next dispatch.
pub enum ScriptedOutcome {
    /// Write a successful result for `value` and release the lease.
    Succeed(ArgValue),
    /// Write an exception envelope and release the lease.
    Fail(ExceptionInfo),
    /// Do nothing; leaves the lease held and no result written (simulates a silent crash).
    GoSilent,
    /// Report the lease was stolen without writing anything.
    LockStolen,
    /// Accept the dispatch immediately and hand back a future that resolves to `resolution` later,
    /// for exercising `ShimContract` backends that only report completion asynchronously.
    Pending(PendingResolution),
}

/// How a [`ScriptedOutcome::Pending`] future eventually resolves.
pub enum PendingResolution {
    /// Writes a successful result for `value`, releases the lease, then resolves `Ok(())`.
    Succeed(ArgValue),
    /// Resolves `Err(ShimError::LockWasStolen)` without writing anything, simulating a backend
    /// that learns the lock was stolen only after the dispatch was already accepted.
    LockStolen,
    /// Resolves `Err(ShimError::RemoteCrashed)`, simulating a backend-reported remote failure.
    RemoteCrashed,
}

impl ScriptedShim {
    pub fn new(store: std::sync::Arc<dyn BlobStore>, script: impl FnMut() -> ScriptedOutcome + Send + 'static) -> ScriptedShim {
        ScriptedShim {
            dispatches: AtomicUsize::new(0),
            store,
            script: Mutex::new(Box::new(script)),
        }
    }

    /// A shim that always succeeds with the same value, for the common warm/cold-call case.
    pub fn always_succeeds(store: std::sync::Arc<dyn BlobStore>, value: ArgValue) -> ScriptedShim {
        ScriptedShim::new(store, move || ScriptedOutcome::Succeed(value.clone()))
    }
}

#[async_trait]
impl ShimContract for ScriptedShim {
    async fn dispatch(&self, memo_uri: &str, remote_writer_id: &str) -> Result<ShimResult, ShimError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.script.lock().unwrap())();
        match outcome {
            ScriptedOutcome::Succeed(value) => {
                write_envelope(&*self.store, memo_uri, ResultEnvelope::ok(&value, ResultMetadata::default(), vec![])).await?;
                release(&*self.store, memo_uri, remote_writer_id).await?;
                Ok(ShimResult::Completed)
            }
            ScriptedOutcome::Fail(exception) => {
                write_envelope(&*self.store, memo_uri, ResultEnvelope::err(&exception, ResultMetadata::default())).await?;
                release(&*self.store, memo_uri, remote_writer_id).await?;
                Ok(ShimResult::Completed)
            }
            ScriptedOutcome::GoSilent => Ok(ShimResult::Completed),
            ScriptedOutcome::LockStolen => Err(ShimError::LockWasStolen {
                memo_uri: memo_uri.to_owned(),
            }),
            ScriptedOutcome::Pending(resolution) => {
                let store = self.store.clone();
                let memo_uri = memo_uri.to_owned();
                let writer_id = remote_writer_id.to_owned();
                let future: shim::PFuture = Box::pin(async move {
                    match resolution {
                        PendingResolution::Succeed(value) => {
                            write_envelope(&*store, &memo_uri, ResultEnvelope::ok(&value, ResultMetadata::default(), vec![])).await?;
                            release(&*store, &memo_uri, &writer_id).await?;
                            Ok(())
                        }
                        PendingResolution::LockStolen => Err(ShimError::LockWasStolen { memo_uri }),
                        PendingResolution::RemoteCrashed => Err(ShimError::RemoteCrashed {
                            memo_uri,
                            message: "scripted remote crash".to_owned(),
                        }),
                    }
                });
                Ok(ShimResult::Pending(future))
            }
        }
    }
}

async fn write_envelope(
    store: &dyn BlobStore,
    memo_uri: &str,
    envelope: Result<ResultEnvelope, SerializeError>,
) -> Result<(), ShimError> {
    let envelope = envelope.map_err(|e| ShimError::RemoteCrashed {
        memo_uri: memo_uri.to_owned(),
        message: e.to_string(),
    })?;
    let segment = match envelope.kind {
        serializer::EnvelopeKind::Ok => "result",
        serializer::EnvelopeKind::Err => "exception",
    };
    let bytes = envelope.to_bytes().map_err(|e| ShimError::RemoteCrashed {
        memo_uri: memo_uri.to_owned(),
        message: e.to_string(),
    })?;
    store
        .put(&format!("{memo_uri}{segment}/{}", hashing::two_word_token()), bytes)
        .await
        .map_err(|e| ShimError::RemoteCrashed {
            memo_uri: memo_uri.to_owned(),
            message: e.to_string(),
        })
}

async fn release(store: &dyn BlobStore, memo_uri: &str, writer_id: &str) -> Result<(), ShimError> {
    lease::release(store, &format!("{memo_uri}lock"), writer_id)
        .await
        .map_err(|e| ShimError::RemoteCrashed {
            memo_uri: memo_uri.to_owned(),
            message: e.to_string(),
        })
}

/// Builds a minimal [`MemoKeyParams`] for `function_id` under `pipeline_id`, rooted at `blob_root`,
/// with no callable arguments.
pub fn memo_params(blob_root: &str, pipeline_id: &str, function_id: &str) -> MemoKeyParams {
    MemoKeyParams {
        blob_root: blob_root.to_owned(),
        pipeline_id: pipeline_id.to_owned(),
        function_id: function_id.to_owned(),
        logic_key: None,
        calls: vec![],
    }
}

/// Adds one callable argument's `logic_key` to a [`MemoKeyParams`] already built by
/// [`memo_params`], for scenarios exercising auto-invalidation.
pub fn with_called_function(mut params: MemoKeyParams, arg_name: &str, function_id: &str, logic_key: &str) -> MemoKeyParams {
    params.calls.push(CalledFunction {
        arg_name: arg_name.to_owned(),
        function_id: function_id.to_owned(),
        logic_key: Some(logic_key.to_owned()),
    });
    params
}

/// A `Thunk` with no keyword arguments, for scenarios that only care about positional args.
pub fn thunk(func_ref: &str, args: Vec<ArgValue>) -> Thunk {
    Thunk::new(func_ref, args, BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn flaky_store_fails_the_configured_number_of_times_then_succeeds() {
        let store = FlakyBlobStore::new(FlakyOp::Get, 2);
        store.put("k", b"v".to_vec()).await.unwrap();

        assert!(matches!(store.get("k").await, Err(BlobStoreError::TransientError(..))));
        assert!(matches!(store.get("k").await, Err(BlobStoreError::TransientError(..))));
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn flaky_store_leaves_other_operations_alone() {
        let store = FlakyBlobStore::new(FlakyOp::Get, 5);
        store.put("k", b"v".to_vec()).await.unwrap();
        assert!(store.head("k").await.unwrap().exists);
    }

    #[tokio::test]
    async fn scripted_shim_counts_dispatches_and_writes_the_scripted_result() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let shim = ScriptedShim::always_succeeds(store.clone(), ArgValue::Int(9));
        lease::try_acquire(&*store, "mem://root/p/f/abc/lock", "writer-1", 60, lease::DEFAULT_CONFIRM_DELAY)
            .await
            .unwrap();

        shim.dispatch("mem://root/p/f/abc/", "writer-1").await.unwrap();
        assert_eq!(shim.dispatches.load(Ordering::SeqCst), 1);

        let entries = store.list("mem://root/p/f/abc/result/").await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
