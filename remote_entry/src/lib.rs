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

//! The handler that runs on the remote side of a dispatch: confirms it still owns the lease,
//! loads and deserializes the invocation, runs the registered user function, and writes back a
//! `result` or `exception` envelope together with its metadata sidecar.

mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use blob_store::{BlobRef, BlobStore, BlobStoreError};
use chrono::Utc;
use deferred_work::{DeferredTask, DeferredWorkError, DeferredWorkPool};
use lease::{LeaseError, LeaseMaintainer};
use log::{info, warn};
use serializer::{ArgValue, EnvelopeKind, ExceptionInfo, ResultEnvelope, ResultMetadata, SerializeError, Thunk};
use thiserror::Error;

pub use registry::{simple, FunctionRegistry, UserFunction};

#[derive(Debug, Error)]
pub enum RemoteEntryError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    DeferredWork(#[from] DeferredWorkError),
    #[error("lock for {memo_uri} was stolen before this remote could start running")]
    LockWasStolen { memo_uri: String },
    #[error("no function registered for {func_ref}")]
    FunctionNotFound { func_ref: String },
}

/// What a user function produced, beyond the value or exception itself.
pub struct FunctionOutput {
    pub value: Result<ArgValue, ExceptionInfo>,
    /// The `logic_key` observed for every sub-function this invocation called, keyed by
    /// `function_id`; written into the result's metadata for the runner's auto-invalidation check.
    pub called_logic_keys: BTreeMap<String, String>,
    /// Any large objects discovered while producing `value`, queued for upload before the result
    /// is written.
    pub pending_uploads: Vec<DeferredTask>,
}

/// What `run` wrote, for the caller (ordinarily the shim handler wiring) to report back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub kind: EnvelopeKind,
}

/// Runs one invocation to completion. `base_metadata` carries the fields the orchestrator already
/// knows (who invoked this, under what pipeline and code version); this fills in the
/// remote-observed fields and writes the result.
///
/// `memo_uri` must end in `/`; control files are addressed relative to it.
pub async fn run(
    store: Arc<dyn BlobStore>,
    registry: &FunctionRegistry,
    deferred: &DeferredWorkPool,
    memo_uri: &str,
    remote_writer_id: &str,
    lease_ttl_seconds: i64,
    heartbeat: Duration,
    mut base_metadata: ResultMetadata,
) -> Result<RunOutcome, RemoteEntryError> {
    let lock_uri = format!("{memo_uri}lock");

    match lease::read(&*store, &lock_uri).await? {
        Some(current) if current.writer_id == remote_writer_id => {}
        _ => {
            return Err(RemoteEntryError::LockWasStolen {
                memo_uri: memo_uri.to_owned(),
            })
        }
    }

    let invocation_bytes = store.get(&format!("{memo_uri}invocation")).await?;
    let thunk = Thunk::from_bytes(&invocation_bytes)?;

    let maintainer = LeaseMaintainer::spawn(
        store.clone(),
        lock_uri.clone(),
        remote_writer_id.to_owned(),
        lease_ttl_seconds,
        heartbeat,
    );

    let function = registry
        .get(&thunk.func_ref)
        .ok_or_else(|| RemoteEntryError::FunctionNotFound {
            func_ref: thunk.func_ref.clone(),
        })?
        .clone();

    let remote_started_at = Utc::now();
    let output = function(&thunk).await;
    let remote_ended_at = Utc::now();

    if let Some(foreign_writer_id) = maintainer.stolen_by() {
        maintainer.stop();
        warn!(
            "lock for {memo_uri} was stolen by {foreign_writer_id} while the remote was running; discarding result"
        );
        return Err(RemoteEntryError::LockWasStolen {
            memo_uri: memo_uri.to_owned(),
        });
    }

    let sources: Vec<BlobRef> = output
        .pending_uploads
        .iter()
        .filter_map(|task| match task {
            DeferredTask::UploadLargeObject { uri, .. } => Some(BlobRef::new(uri.clone())),
            _ => None,
        })
        .collect();
    if !output.pending_uploads.is_empty() {
        deferred.run_all(output.pending_uploads).await?;
    }

    base_metadata.remote_started_at = Some(remote_started_at.to_rfc3339());
    base_metadata.remote_ended_at = Some(remote_ended_at.to_rfc3339());
    base_metadata.remote_wall_seconds =
        Some((remote_ended_at - remote_started_at).num_milliseconds() as f64 / 1000.0);
    base_metadata.called_logic_keys = output.called_logic_keys;

    let run_id = hashing::new_run_id(Utc::now());
    let envelope = match output.value {
        Ok(value) => ResultEnvelope::ok(&value, base_metadata, sources)?,
        Err(exception) => ResultEnvelope::err(&exception, base_metadata)?,
    };
    let path_segment = match envelope.kind {
        EnvelopeKind::Ok => "result",
        EnvelopeKind::Err => "exception",
    };

    store
        .put(&format!("{memo_uri}{path_segment}/{run_id}"), envelope.to_bytes()?)
        .await?;

    let sidecar = serde_json::to_vec_pretty(&envelope.metadata).map_err(|e| SerializeError::Encode {
        path: "result-metadata".to_owned(),
        message: e.to_string(),
    })?;
    store
        .put(&format!("{memo_uri}result-metadata/{run_id}"), sidecar)
        .await?;

    let kind = envelope.kind;
    maintainer.stop();
    info!("{memo_uri} finished run {run_id}");

    Ok(RunOutcome { run_id, kind })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blob_store::InMemoryBlobStore;
    use lease::DEFAULT_CONFIRM_DELAY;
    use serializer::ExceptionInfo;

    use super::*;

    async fn setup(
        func_ref: &str,
        registry: &mut FunctionRegistry,
        function: UserFunction,
    ) -> (Arc<dyn BlobStore>, DeferredWorkPool, String, String) {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let memo_uri = "mem://root/mops2-mpf/default/mod--f/abc/".to_owned();
        let writer_id = "orchestrator-1".to_owned();

        lease::try_acquire(&*store, &format!("{memo_uri}lock"), &writer_id, 60, DEFAULT_CONFIRM_DELAY)
            .await
            .unwrap();
        store
            .put(
                &format!("{memo_uri}invocation"),
                Thunk::new(func_ref, vec![], Default::default())
                    .to_bytes()
                    .unwrap(),
            )
            .await
            .unwrap();
        registry.register(func_ref, function);

        let deferred = DeferredWorkPool::new(store.clone(), 4);
        (store, deferred, memo_uri, writer_id)
    }

    #[tokio::test]
    async fn run_writes_a_result_for_a_successful_function() {
        let mut registry = FunctionRegistry::new();
        let (store, deferred, memo_uri, writer_id) = setup(
            "mod--f",
            &mut registry,
            registry::simple(|_thunk| Ok(ArgValue::Int(42))),
        )
        .await;

        let outcome = run(
            store.clone(),
            &registry,
            &deferred,
            &memo_uri,
            &writer_id,
            60,
            Duration::from_secs(20),
            ResultMetadata::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.kind, EnvelopeKind::Ok);
        let bytes = store
            .get(&format!("{memo_uri}result/{}", outcome.run_id))
            .await
            .unwrap();
        let envelope = ResultEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.value().unwrap(), ArgValue::Int(42));

        assert!(
            store
                .head(&format!("{memo_uri}result-metadata/{}", outcome.run_id))
                .await
                .unwrap()
                .exists
        );
        // `run` does not release the lock itself; that is the orchestrator's responsibility once
        // it has observed the result.
        assert!(store.head(&format!("{memo_uri}lock")).await.unwrap().exists);
    }

    #[tokio::test]
    async fn run_writes_an_exception_envelope_for_a_failed_function() {
        let mut registry = FunctionRegistry::new();
        let (store, deferred, memo_uri, writer_id) = setup(
            "mod--f",
            &mut registry,
            registry::simple(|_thunk| {
                Err(ExceptionInfo {
                    exception_type: "ValueError".to_owned(),
                    exception_repr: "boom".to_owned(),
                    remote_traceback: String::new(),
                })
            }),
        )
        .await;

        let outcome = run(
            store.clone(),
            &registry,
            &deferred,
            &memo_uri,
            &writer_id,
            60,
            Duration::from_secs(20),
            ResultMetadata::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.kind, EnvelopeKind::Err);
        let bytes = store
            .get(&format!("{memo_uri}exception/{}", outcome.run_id))
            .await
            .unwrap();
        let envelope = ResultEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.exception().unwrap().exception_type, "ValueError");
    }

    #[tokio::test]
    async fn run_rejects_a_writer_id_that_does_not_hold_the_lock() {
        let mut registry = FunctionRegistry::new();
        let (store, deferred, memo_uri, _writer_id) = setup(
            "mod--f",
            &mut registry,
            registry::simple(|_thunk| Ok(ArgValue::Int(1))),
        )
        .await;

        let err = run(
            store,
            &registry,
            &deferred,
            &memo_uri,
            "someone-else",
            60,
            Duration::from_secs(20),
            ResultMetadata::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RemoteEntryError::LockWasStolen { .. }));
    }

    #[tokio::test]
    async fn run_reports_function_not_found() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let memo_uri = "mem://root/mops2-mpf/default/mod--missing/abc/".to_owned();
        let writer_id = "orchestrator-1".to_owned();
        lease::try_acquire(&*store, &format!("{memo_uri}lock"), &writer_id, 60, DEFAULT_CONFIRM_DELAY)
            .await
            .unwrap();
        store
            .put(
                &format!("{memo_uri}invocation"),
                Thunk::new("mod--missing", vec![], Default::default())
                    .to_bytes()
                    .unwrap(),
            )
            .await
            .unwrap();
        let registry = FunctionRegistry::new();
        let deferred = DeferredWorkPool::new(store.clone(), 4);

        let err = run(
            store,
            &registry,
            &deferred,
            &memo_uri,
            &writer_id,
            60,
            Duration::from_secs(20),
            ResultMetadata::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RemoteEntryError::FunctionNotFound { .. }));
    }
}
