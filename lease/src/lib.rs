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

//! The expiring-lock protocol shared by an orchestrator and the remote worker it dispatches to.
//!
//! A lease lives at a single `lock` URI in a `BlobStore`; its holder is identified by an opaque
//! `writer_id`. Two cooperating owners -- the orchestrator that acquires it and the remote that
//! later confirms it's still the rightful one -- never hold a lock, only read and overwrite it, so
//! mutual exclusion here is best-effort: the tie-break on a race is last-writer-wins, and anyone
//! who notices a foreign `writer_id` where they expected their own must treat that as
//! [`LeaseError::LockWasStolen`] and stop.

mod record;

use std::sync::Arc;
use std::time::Duration;

use blob_store::{BlobStore, BlobStoreError};
use log::{info, warn};
use serializer::SerializeError;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use record::LeaseRecord;

/// The small, fixed delay `try_acquire` waits after writing a tentative lock before re-reading it
/// to check whether a concurrent writer overwrote it. Sized so that a competing acquisition
/// started around the same time is overwhelmingly likely to have also completed its own write by
/// the time this delay elapses.
pub const DEFAULT_CONFIRM_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("lock at {lock_uri} was stolen by writer {foreign_writer_id}")]
    LockWasStolen {
        lock_uri: String,
        foreign_writer_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    HeldByOther(String),
}

fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn encode_record(record: &LeaseRecord) -> Result<Vec<u8>, SerializeError> {
    serializer::encode("lease_record", record)
}

fn decode_record(bytes: &[u8]) -> Result<LeaseRecord, SerializeError> {
    serializer::decode("lease_record", bytes)
}

/// Reads the current `lock` record at `lock_uri`, or `None` if no lock has ever been written.
/// Exposed for callers (like `remote_entry`) that need to check the current holder directly
/// rather than attempt an acquisition.
pub async fn read(store: &dyn BlobStore, lock_uri: &str) -> Result<Option<LeaseRecord>, LeaseError> {
    match store.get(lock_uri).await {
        Ok(bytes) => Ok(Some(decode_record(&bytes)?)),
        Err(BlobStoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `ttl_seconds <= 0` disables leasing: every `try_acquire` trivially succeeds and `maintain`/
/// `release` are no-ops. Used for single-process workloads where coordination is pointless.
pub fn leasing_disabled(ttl_seconds: i64) -> bool {
    ttl_seconds <= 0
}

/// Attempts to become the holder of `lock_uri`. Returns `Acquired` if, after the confirmation
/// delay, the lock still reads back as `writer_id`; `HeldByOther` if a fresh lock belonging to a
/// different writer was found, or if a race was lost during confirmation.
pub async fn try_acquire(
    store: &dyn BlobStore,
    lock_uri: &str,
    writer_id: &str,
    ttl_seconds: i64,
    confirm_delay: Duration,
) -> Result<AcquireOutcome, LeaseError> {
    if leasing_disabled(ttl_seconds) {
        return Ok(AcquireOutcome::Acquired);
    }

    let now = now_unix_ms();
    if let Some(existing) = read(store, lock_uri).await? {
        if existing.is_fresh(now) && existing.writer_id != writer_id {
            return Ok(AcquireOutcome::HeldByOther(existing.writer_id));
        }
    }

    let record = LeaseRecord::new(writer_id, now, ttl_seconds);
    store.put(lock_uri, encode_record(&record)?).await?;

    tokio::time::sleep(confirm_delay).await;

    match read(store, lock_uri).await? {
        Some(current) if current.writer_id == writer_id => Ok(AcquireOutcome::Acquired),
        Some(current) => Ok(AcquireOutcome::HeldByOther(current.writer_id)),
        None => Ok(AcquireOutcome::HeldByOther(String::new())),
    }
}

/// One heartbeat write: refreshes `lock_uri` with a new timestamp, provided it still belongs to
/// `writer_id`. A lock found under a different `writer_id` is never overwritten; that case is
/// reported as [`LeaseError::LockWasStolen`] so the caller can abort before doing further work.
pub async fn maintain_once(
    store: &dyn BlobStore,
    lock_uri: &str,
    writer_id: &str,
    ttl_seconds: i64,
) -> Result<(), LeaseError> {
    if leasing_disabled(ttl_seconds) {
        return Ok(());
    }

    if let Some(existing) = read(store, lock_uri).await? {
        if existing.writer_id != writer_id {
            return Err(LeaseError::LockWasStolen {
                lock_uri: lock_uri.to_owned(),
                foreign_writer_id: existing.writer_id,
            });
        }
    }

    let record = LeaseRecord::new(writer_id, now_unix_ms(), ttl_seconds);
    store.put(lock_uri, encode_record(&record)?).await?;
    Ok(())
}

/// Deletes `lock_uri`, but only if it still belongs to `writer_id`; releasing a lock that was
/// already stolen would erase the new holder's claim.
pub async fn release(store: &dyn BlobStore, lock_uri: &str, writer_id: &str) -> Result<(), LeaseError> {
    match read(store, lock_uri).await? {
        Some(existing) if existing.writer_id == writer_id => match store.delete(lock_uri).await {
            Ok(()) | Err(BlobStoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        },
        _ => Ok(()),
    }
}

/// A running background task that heartbeats a held lease every `heartbeat` until dropped or
/// until it observes the lock was stolen, at which point `stolen()` starts reporting `true`.
///
/// One `LeaseMaintainer` is the per-lease primitive; a `runner` orchestrating many concurrent
/// calls is expected to fan many of these out rather than share one task across leases, coalescing
/// only the process-wide tokio scheduler itself.
pub struct LeaseMaintainer {
    handle: JoinHandle<()>,
    stolen_rx: watch::Receiver<Option<String>>,
}

impl LeaseMaintainer {
    /// Spawns the maintenance loop. `heartbeat` must be well under `ttl_seconds` (the `Config`
    /// layer upstream enforces `heartbeat < ttl / 3`); this constructor trusts its caller.
    pub fn spawn(
        store: Arc<dyn BlobStore>,
        lock_uri: impl Into<String>,
        writer_id: impl Into<String>,
        ttl_seconds: i64,
        heartbeat: Duration,
    ) -> LeaseMaintainer {
        let lock_uri = lock_uri.into();
        let writer_id = writer_id.into();
        let (stolen_tx, stolen_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            if leasing_disabled(ttl_seconds) {
                return;
            }
            loop {
                tokio::time::sleep(heartbeat).await;
                match maintain_once(&*store, &lock_uri, &writer_id, ttl_seconds).await {
                    Ok(()) => {}
                    Err(LeaseError::LockWasStolen { foreign_writer_id, .. }) => {
                        warn!("lease at {lock_uri} stolen by {foreign_writer_id}, stopping maintenance");
                        let _ = stolen_tx.send(Some(foreign_writer_id));
                        return;
                    }
                    Err(e) => {
                        warn!("lease maintenance for {lock_uri} failed: {e}; will retry next heartbeat");
                    }
                }
            }
        });

        LeaseMaintainer { handle, stolen_rx }
    }

    /// `Some(foreign_writer_id)` once maintenance has observed the lock belongs to someone else.
    pub fn stolen_by(&self) -> Option<String> {
        self.stolen_rx.borrow().clone()
    }

    /// Stops the maintenance loop without releasing the lock (the caller releases explicitly).
    pub fn stop(self) {
        info!("stopping lease maintenance");
        self.handle.abort();
    }
}
