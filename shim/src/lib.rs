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

//! The dispatch contract between a `runner` and whatever executes a call: a subprocess, a
//! Kubernetes pod, or (the one driver shipped here) a bounded in-process thread pool.
//!
//! A successful [`ShimContract::dispatch`] only grants permission to go probe for a result; it is
//! never a promise that one was written (the remote may have crashed silently after the lock was
//! confirmed but before it finished). Distinguishing "never reached the remote" from "reached the
//! remote and it died" is what [`ShimError`] is for.

mod in_process;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

pub use in_process::{BoundedInProcessShim, RemoteHandler};

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("dispatch of {memo_uri} never reached the remote: {message}")]
    DispatchFailed { memo_uri: String, message: String },
    #[error("remote for {memo_uri} crashed before writing a result: {message}")]
    RemoteCrashed { memo_uri: String, message: String },
    #[error("lock for {memo_uri} was stolen; the remote exited voluntarily")]
    LockWasStolen { memo_uri: String },
}

/// A future representing a dispatch accepted by an asynchronous backend (a job queue, a cluster
/// scheduler): resolved once the remote run has actually finished, possibly from another process
/// that polled the backend on this one's behalf.
pub type PFuture = Pin<Box<dyn Future<Output = Result<(), ShimError>> + Send>>;

/// What a successful `dispatch` call hands back.
pub enum ShimResult {
    /// The remote already ran to completion (successfully or not) by the time `dispatch` returned.
    Completed,
    /// The remote was accepted by the backend but has not necessarily finished; await the future
    /// to learn when it has.
    Pending(PFuture),
}

/// A pluggable dispatch backend. `memo_uri` names the invocation; `remote_writer_id` is the lease
/// holder the remote must present to avoid being treated as stale (see the `lease` crate).
#[async_trait]
pub trait ShimContract: Send + Sync {
    async fn dispatch(&self, memo_uri: &str, remote_writer_id: &str) -> Result<ShimResult, ShimError>;
}

#[async_trait]
impl<T: ShimContract + ?Sized> ShimContract for std::sync::Arc<T> {
    async fn dispatch(&self, memo_uri: &str, remote_writer_id: &str) -> Result<ShimResult, ShimError> {
        (**self).dispatch(memo_uri, remote_writer_id).await
    }
}
