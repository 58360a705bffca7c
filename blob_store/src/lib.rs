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

//! The abstract object store that every other crate in this workspace addresses by opaque URI.
//!
//! `BlobStore` is the narrow contract (`put`/`get`/`head`/`list`/`delete`); `registry` is the
//! scheme-keyed plugin table concrete drivers are installed into at process startup; `retry` wraps
//! any driver with the bounded-backoff policy the specification requires of every call through a
//! `BlobStore`. Two reference drivers ship here: `memory` (for tests) and `local_fs` (for
//! single-node deployments); anything else (a cloud blob service) is an external collaborator that
//! implements the same trait.

mod local_fs;
mod memory;
mod registry;
mod retry;

use async_trait::async_trait;
use hashing::Fingerprint;

pub use local_fs::LocalFsBlobStore;
pub use memory::InMemoryBlobStore;
pub use registry::BlobStoreRegistry;
pub use retry::{RetryPolicy, RetryingBlobStore};

/// Errors a `BlobStore` implementation may report. Transience is load-bearing: only
/// `TransientError` is retried by `RetryingBlobStore`.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("no blob at {0}")]
    NotFound(String),
    #[error("permission denied for {0}")]
    PermissionDenied(String),
    #[error("write failed for {0}: {1}")]
    WriteFailed(String, String),
    #[error("transient error for {0}: {1}")]
    TransientError(String, String),
}

impl BlobStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobStoreError::TransientError(..))
    }
}

/// An opaque handle to a single blob. Identity is `uri`; blobs are immutable once written (save
/// for the `lock` control file, which is explicitly mutable).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlobRef {
    pub uri: String,
}

impl BlobRef {
    pub fn new(uri: impl Into<String>) -> BlobRef {
        BlobRef { uri: uri.into() }
    }
}

/// The result of a `head` call: existence plus whatever metadata the driver can report cheaply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeadResult {
    pub exists: bool,
    pub size: Option<usize>,
    pub content_hash: Option<Fingerprint>,
}

impl HeadResult {
    pub fn absent() -> HeadResult {
        HeadResult {
            exists: false,
            size: None,
            content_hash: None,
        }
    }
}

/// Opaque, addressable bytes. No cross-key transactions; overwrites are allowed; no strong
/// compare-and-swap is required of implementations (the `lease` crate's last-writer-wins tie-break
/// depends on this being true).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError>;

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError>;

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError>;

    /// A finite list of every URI with prefix `uri_prefix`. Implementations may paginate
    /// internally but must return the complete set.
    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError>;

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError>;
}
