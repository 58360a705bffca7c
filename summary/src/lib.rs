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

//! An append-only, per-process log of what the runner did for each call: one JSON record per
//! call, rotated into a fresh run directory every process lifetime so logs from overlapping runs
//! never interleave in the same file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blob_store::{BlobStore, BlobStoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error("failed to serialize summary record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How a call was resolved, for reporting in the summary log.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Satisfied entirely from `fast_result_probe`; nothing was dispatched.
    CacheHit,
    /// Dispatched and a result was found.
    Dispatched { run_id: String },
    /// Dispatched and a result was found, but it was an exception.
    DispatchedException { run_id: String },
    /// No result was found after dispatch completed.
    ResultMissing,
}

/// One append-only record: what happened for a single call.
#[derive(Clone, Debug, Serialize)]
pub struct SummaryRecord {
    pub memo_uri: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub wall_seconds: f64,
    /// URIs of any large objects discovered while serializing the return value.
    pub large_object_uris: Vec<String>,
}

/// The log for a single process lifetime, rooted at `<summary_dir>/<run_id>/`.
pub struct SummaryLog {
    store: Arc<dyn BlobStore>,
    dir_uri: String,
    sequence: AtomicU64,
}

impl SummaryLog {
    /// Opens a fresh log rooted under `summary_dir`, named by the process's own run_id.
    pub fn new(store: Arc<dyn BlobStore>, summary_dir: &str, now: DateTime<Utc>) -> SummaryLog {
        let run_id = hashing::new_run_id(now);
        SummaryLog {
            store,
            dir_uri: format!("{}/{run_id}", summary_dir.trim_end_matches('/')),
            sequence: AtomicU64::new(0),
        }
    }

    /// The run directory this log writes into; useful for diagnostics and tests.
    pub fn dir_uri(&self) -> &str {
        &self.dir_uri
    }

    /// Appends one record under the next sequence number in this process's run directory.
    pub async fn append(&self, record: &SummaryRecord) -> Result<(), SummaryError> {
        let (uri, bytes) = self.next_entry(record)?;
        self.store.put(&uri, bytes).await?;
        Ok(())
    }

    /// Reserves the next sequence number and renders `record` to its on-disk bytes, without
    /// writing anything. Lets a caller route the actual `put` through its own worker pool (e.g.
    /// `deferred_work::DeferredWorkPool`) while still using this log's naming and sequencing.
    pub fn next_entry(&self, record: &SummaryRecord) -> Result<(String, Vec<u8>), SummaryError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let uri = format!("{}/{seq:010}.json", self.dir_uri);
        let bytes = serde_json::to_vec(record)?;
        Ok((uri, bytes))
    }

    /// Lists every record written so far by this log.
    pub async fn list_entries(&self) -> Result<Vec<String>, SummaryError> {
        let mut entries = self.store.list(&format!("{}/", self.dir_uri)).await?;
        entries.sort();
        Ok(entries)
    }
}
