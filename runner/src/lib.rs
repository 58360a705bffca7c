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

//! The orchestrator side of one call: derive its `memo_uri`, probe for an already-written result,
//! and -- on a miss -- upload whatever large objects the arguments reference, acquire the call's
//! lease, dispatch to a [`shim::ShimContract`], and probe again once the remote is done.
//!
//! Everything here is driven by one `Runner` per process (or per pipeline); `config::RunnerConfig`
//! holds the tunables shared across every call it makes.

mod config;
mod large_object;
mod probe;

use std::sync::Arc;
use std::time::Duration;

use blob_store::{BlobStore, BlobStoreError};
use chrono::Utc;
use deferred_work::{DeferredTask, DeferredWorkError, DeferredWorkPool};
use hashing::Fingerprint;
use lease::{AcquireOutcome, LeaseError, LeaseMaintainer};
use log::{info, warn};
use memo_key::MemoKeyParams;
use serializer::{ArgValue, ExceptionInfo, ResultMetadata, SerializeError, Source, Thunk};
use shim::{ShimContract, ShimError, ShimResult};
use summary::{Outcome, SummaryLog, SummaryRecord};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use config::RunnerConfig;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Shim(#[from] ShimError),
    #[error(transparent)]
    DeferredWork(#[from] DeferredWorkError),
    #[error("no result was found at {memo_uri} after dispatch completed")]
    ResultMissing { memo_uri: String },
    #[error("no cached result exists at {memo_uri} and required-results mode is enabled")]
    RequiredResultMissing { memo_uri: String },
    #[error("gave up waiting for the lock on {memo_uri} to free")]
    WaitBudgetExceeded { memo_uri: String },
    #[error("content hash mismatch while resolving a large object at {uri}")]
    HashMismatch { uri: String },
    #[error("remote function raised {}: {}", .0.exception_type, .0.exception_repr)]
    Exception(Box<ExceptionInfo>),
}

enum AfterShimError {
    Retry,
    Fatal(RunnerError),
}

fn classify_shim_error(e: ShimError) -> AfterShimError {
    match e {
        ShimError::LockWasStolen { .. } => AfterShimError::Retry,
        other => AfterShimError::Fatal(other.into()),
    }
}

enum LeaseOutcome {
    Maintaining(LeaseMaintainer),
    ResolvedWhileWaiting(probe::ProbeHit),
}

/// Orchestrates calls for one pipeline (or process): holds the shared [`BlobStore`],
/// [`ShimContract`], and [`DeferredWorkPool`] every call dispatches through.
pub struct Runner {
    store: Arc<dyn BlobStore>,
    shim: Arc<dyn ShimContract>,
    deferred: DeferredWorkPool,
    summary: Option<SummaryLog>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(store: Arc<dyn BlobStore>, shim: Arc<dyn ShimContract>, config: RunnerConfig) -> Runner {
        let deferred = DeferredWorkPool::new(store.clone(), config.deferred_concurrency);
        let summary = config
            .summary_dir
            .as_deref()
            .map(|dir| SummaryLog::new(store.clone(), dir, Utc::now()));
        Runner {
            store,
            shim,
            deferred,
            summary,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs one call to completion, following the memoized-dispatch state machine: probe, upload,
    /// lease, dispatch, probe again. Retries from the top whenever the shim reports the lock was
    /// stolen out from under it.
    pub async fn call(
        &self,
        params: MemoKeyParams,
        thunk: Thunk,
        sources: Vec<Source>,
        mut metadata: ResultMetadata,
    ) -> Result<ArgValue, RunnerError> {
        let started_at = Utc::now();
        loop {
            let memo_uri = memo_key::derive_memo_uri(&params, &thunk, &self.config.pipeline_memospace_handlers)?;

            if let Some(hit) = probe::fast_result_probe(&*self.store, &memo_uri, &params.calls).await? {
                self.write_summary(&memo_uri, Outcome::CacheHit, started_at, hit.source_uris)
                    .await;
                return hit.outcome;
            }

            if self.config.require_all_results {
                return Err(RunnerError::RequiredResultMissing { memo_uri });
            }

            self.upload_sources(&sources).await?;

            metadata.pipeline_id.clone_from(&params.pipeline_id);

            let invocation_uri = format!("{memo_uri}invocation");
            if !self.store.head(&invocation_uri).await?.exists {
                self.store.put(&invocation_uri, thunk.to_bytes()?).await?;
            }
            let invocation_metadata_uri = format!("{memo_uri}invocation-metadata");
            if !self.store.head(&invocation_metadata_uri).await?.exists {
                self.store
                    .put(&invocation_metadata_uri, serializer::encode("invocation-metadata", &metadata)?)
                    .await?;
            }

            let writer_id = format!("{}-{}", self.config.orchestrator_id, hashing::two_word_token());
            let lock_uri = format!("{memo_uri}lock");

            let mut maintainer = match self.acquire_lease(&lock_uri, &writer_id, &memo_uri, &params).await? {
                LeaseOutcome::Maintaining(m) => Some(m),
                LeaseOutcome::ResolvedWhileWaiting(hit) => {
                    let outcome = match &hit.outcome {
                        Ok(_) => Outcome::Dispatched { run_id: hit.run_id.clone() },
                        Err(RunnerError::Exception(_)) => Outcome::DispatchedException { run_id: hit.run_id.clone() },
                        Err(_) => Outcome::ResultMissing,
                    };
                    self.write_summary(&memo_uri, outcome, started_at, hit.source_uris).await;
                    return hit.outcome;
                }
            };

            match self.shim.dispatch(&memo_uri, &writer_id).await {
                Ok(ShimResult::Completed) => {}
                Ok(ShimResult::Pending(future)) => {
                    if let Err(e) = future.await {
                        match classify_shim_error(e) {
                            AfterShimError::Retry => {
                                if let Some(m) = maintainer.take() {
                                    m.stop();
                                }
                                continue;
                            }
                            AfterShimError::Fatal(err) => {
                                if let Some(m) = maintainer.take() {
                                    m.stop();
                                }
                                return Err(err);
                            }
                        }
                    }
                }
                Err(e) => match classify_shim_error(e) {
                    AfterShimError::Retry => {
                        if let Some(m) = maintainer.take() {
                            m.stop();
                        }
                        continue;
                    }
                    AfterShimError::Fatal(err) => {
                        if let Some(m) = maintainer.take() {
                            m.stop();
                        }
                        return Err(err);
                    }
                },
            }

            let resolved = probe::fast_result_probe(&*self.store, &memo_uri, &params.calls).await?;
            if let Some(m) = maintainer.take() {
                lease::release(&*self.store, &lock_uri, &writer_id).await?;
                m.stop();
            }

            return match resolved {
                Some(hit) => {
                    let outcome = match &hit.outcome {
                        Ok(_) => Outcome::Dispatched { run_id: hit.run_id.clone() },
                        Err(RunnerError::Exception(_)) => Outcome::DispatchedException { run_id: hit.run_id.clone() },
                        Err(_) => Outcome::ResultMissing,
                    };
                    self.write_summary(&memo_uri, outcome, started_at, hit.source_uris).await;
                    hit.outcome
                }
                None => {
                    warn!("{memo_uri} was dispatched but no result appeared");
                    self.write_summary(&memo_uri, Outcome::ResultMissing, started_at, vec![])
                        .await;
                    Err(RunnerError::ResultMissing { memo_uri })
                }
            };
        }
    }

    async fn write_summary(&self, memo_uri: &str, outcome: Outcome, started_at: chrono::DateTime<Utc>, large_object_uris: Vec<String>) {
        let Some(summary) = &self.summary else {
            return;
        };
        let ended_at = Utc::now();
        let record = SummaryRecord {
            memo_uri: memo_uri.to_owned(),
            outcome,
            started_at,
            ended_at,
            wall_seconds: (ended_at - started_at).num_milliseconds() as f64 / 1000.0,
            large_object_uris,
        };
        let (uri, bytes) = match summary.next_entry(&record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("failed to render summary record for {memo_uri}: {e}");
                return;
            }
        };
        if let Err(e) = self.deferred.run_all(vec![DeferredTask::WriteSummaryEntry { uri, bytes }]).await {
            warn!("failed to append summary record for {memo_uri}: {e}");
        }
    }

    /// Spawns `call` onto the runtime, for fanning many calls out concurrently. The caller must
    /// hold this `Runner` behind an `Arc` to use this; `call` itself is perfectly usable without
    /// one for a single sequential call.
    pub fn submit(
        self: Arc<Self>,
        params: MemoKeyParams,
        thunk: Thunk,
        sources: Vec<Source>,
        metadata: ResultMetadata,
    ) -> JoinHandle<Result<ArgValue, RunnerError>> {
        tokio::spawn(async move { self.call(params, thunk, sources, metadata).await })
    }

    /// Downloads and hash-verifies a large object previously produced by a call's return value.
    pub async fn resolve_large_object(&self, large: &serializer::LargeObjectRef) -> Result<Vec<u8>, RunnerError> {
        let uri = large_object::large_object_uri(&self.config.blob_root, &large.content_hash.hash);
        let bytes = self.store.get(&uri).await?;
        if Fingerprint::from_bytes(&bytes) != large.content_hash.hash {
            return Err(RunnerError::HashMismatch { uri });
        }
        Ok(bytes)
    }

    async fn upload_sources(&self, sources: &[Source]) -> Result<(), RunnerError> {
        if sources.is_empty() {
            return Ok(());
        }
        let mut tasks = Vec::with_capacity(sources.len() * 2);
        for source in sources {
            let content_hash = source.content_hash();
            let uri = large_object::large_object_uri(&self.config.blob_root, &content_hash.hash);
            let hashref = large_object::HashRefEntry {
                content_hash: content_hash.hash.to_hex(),
                size: source.bytes.len(),
                logical_name: source.logical_name.clone(),
            };
            tasks.push(DeferredTask::UploadLargeObject {
                content_hash: content_hash.hash,
                uri: uri.clone(),
                bytes: source.bytes.clone(),
            });
            tasks.push(DeferredTask::WriteHashRef {
                uri: large_object::hashref_uri(&uri),
                bytes: serializer::encode("hashref", &hashref)?,
            });
        }
        self.deferred.run_all(tasks).await?;
        Ok(())
    }

    async fn acquire_lease(
        &self,
        lock_uri: &str,
        writer_id: &str,
        memo_uri: &str,
        params: &MemoKeyParams,
    ) -> Result<LeaseOutcome, RunnerError> {
        if lease::leasing_disabled(self.config.lease_ttl_seconds) {
            let maintainer = LeaseMaintainer::spawn(
                self.store.clone(),
                lock_uri.to_owned(),
                writer_id.to_owned(),
                self.config.lease_ttl_seconds,
                self.config.lease_heartbeat,
            );
            return Ok(LeaseOutcome::Maintaining(maintainer));
        }

        let deadline = Instant::now() + self.config.wait_budget;
        loop {
            match lease::try_acquire(
                &*self.store,
                lock_uri,
                writer_id,
                self.config.lease_ttl_seconds,
                self.config.confirm_delay,
            )
            .await?
            {
                AcquireOutcome::Acquired => {
                    let maintainer = LeaseMaintainer::spawn(
                        self.store.clone(),
                        lock_uri.to_owned(),
                        writer_id.to_owned(),
                        self.config.lease_ttl_seconds,
                        self.config.lease_heartbeat,
                    );
                    return Ok(LeaseOutcome::Maintaining(maintainer));
                }
                AcquireOutcome::HeldByOther(holder) => {
                    if let Some(hit) = probe::fast_result_probe(&*self.store, memo_uri, &params.calls).await? {
                        return Ok(LeaseOutcome::ResolvedWhileWaiting(hit));
                    }
                    if Instant::now() >= deadline {
                        return Err(RunnerError::WaitBudgetExceeded {
                            memo_uri: memo_uri.to_owned(),
                        });
                    }
                    info!("{memo_uri} lock held by {holder}, waiting");
                    tokio::time::sleep(self.config.confirm_delay).await;
                }
            }
        }
    }
}
