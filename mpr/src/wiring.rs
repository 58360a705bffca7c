use std::sync::Arc;
use std::time::Duration;

use blob_store::BlobStore;
use deferred_work::DeferredWorkPool;
use log::warn;
use remote_entry::{FunctionRegistry, RemoteEntryError};
use serializer::ResultMetadata;
use shim::{BoundedInProcessShim, RemoteHandler, ShimContract, ShimError};

async fn load_invocation_metadata(store: &dyn BlobStore, memo_uri: &str) -> ResultMetadata {
    let uri = format!("{memo_uri}invocation-metadata");
    match store.get(&uri).await {
        Ok(bytes) => serializer::decode("invocation-metadata", &bytes).unwrap_or_else(|e| {
            warn!("invocation-metadata at {uri} was unreadable ({e}); using defaults");
            ResultMetadata::default()
        }),
        Err(e) => {
            warn!("no invocation-metadata at {uri} ({e}); using defaults");
            ResultMetadata::default()
        }
    }
}

fn to_shim_error(memo_uri: &str, e: RemoteEntryError) -> ShimError {
    match e {
        RemoteEntryError::LockWasStolen { memo_uri } => ShimError::LockWasStolen { memo_uri },
        other => ShimError::RemoteCrashed {
            memo_uri: memo_uri.to_owned(),
            message: other.to_string(),
        },
    }
}

/// Builds the [`RemoteHandler`] that bridges `remote_entry::run` into a [`BoundedInProcessShim`]:
/// the "remote" is just another spawned task in this process, sharing the orchestrator's own blob
/// store but draining its uploads through a deferred-work pool of its own.
pub fn build_in_process_shim(
    store: Arc<dyn BlobStore>,
    registry: Arc<FunctionRegistry>,
    lease_ttl_seconds: i64,
    lease_heartbeat: Duration,
    deferred_concurrency: usize,
    shim_concurrency: usize,
) -> Arc<dyn ShimContract> {
    let deferred = Arc::new(DeferredWorkPool::new(store.clone(), deferred_concurrency));

    let handler: RemoteHandler = Arc::new(move |memo_uri, writer_id| {
        let store = store.clone();
        let registry = registry.clone();
        let deferred = deferred.clone();
        Box::pin(async move {
            let base_metadata = load_invocation_metadata(&*store, &memo_uri).await;
            remote_entry::run(
                store,
                &registry,
                &deferred,
                &memo_uri,
                &writer_id,
                lease_ttl_seconds,
                lease_heartbeat,
                base_metadata,
            )
            .await
            .map(|_outcome| ())
            .map_err(|e| to_shim_error(&memo_uri, e))
        })
    });

    Arc::new(BoundedInProcessShim::new(handler, shim_concurrency))
}
