use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Semaphore;

use crate::{ShimContract, ShimError, ShimResult};

/// The remote-side handler invoked by [`BoundedInProcessShim`]: given `(memo_uri,
/// remote_writer_id)`, runs the invocation to completion and reports whether it got far enough to
/// write a result. This crate is deliberately ignorant of `remote_entry`'s internals; a handler is
/// supplied by whoever assembles the runner.
pub type RemoteHandler =
    Arc<dyn Fn(String, String) -> Pin<Box<dyn Future<Output = Result<(), ShimError>> + Send>> + Send + Sync>;

/// A bounded in-process thread-pool shim: runs `handler` as a spawned task, gated by a semaphore
/// so at most `concurrency` remotes are in flight at once. Used for tests and single-node
/// deployments where the "remote" is just another task in this process.
pub struct BoundedInProcessShim {
    handler: RemoteHandler,
    semaphore: Arc<Semaphore>,
}

impl BoundedInProcessShim {
    pub fn new(handler: RemoteHandler, concurrency: usize) -> BoundedInProcessShim {
        BoundedInProcessShim {
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }
}

#[async_trait]
impl ShimContract for BoundedInProcessShim {
    async fn dispatch(&self, memo_uri: &str, remote_writer_id: &str) -> Result<ShimResult, ShimError> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|e| {
            ShimError::DispatchFailed {
                memo_uri: memo_uri.to_owned(),
                message: e.to_string(),
            }
        })?;

        debug!("dispatching {memo_uri} to in-process handler as writer {remote_writer_id}");
        let handler = self.handler.clone();
        let memo_uri_owned = memo_uri.to_owned();
        let writer_owned = remote_writer_id.to_owned();

        let joined = tokio::spawn(async move {
            let _permit = permit;
            handler(memo_uri_owned, writer_owned).await
        })
        .await;

        match joined {
            Ok(Ok(())) => Ok(ShimResult::Completed),
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(ShimError::RemoteCrashed {
                memo_uri: memo_uri.to_owned(),
                message: join_err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn handler_that_succeeds() -> RemoteHandler {
        Arc::new(|_memo_uri, _writer_id| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn dispatch_reports_completion_on_success() {
        let shim = BoundedInProcessShim::new(handler_that_succeeds(), 4);
        let outcome = shim.dispatch("mem://p/f/abc/", "writer-a").await.unwrap();
        assert!(matches!(outcome, ShimResult::Completed));
    }

    #[tokio::test]
    async fn dispatch_propagates_a_lock_was_stolen_error() {
        let handler: RemoteHandler = Arc::new(|memo_uri, _writer_id| {
            Box::pin(async move { Err(ShimError::LockWasStolen { memo_uri }) })
        });
        let shim = BoundedInProcessShim::new(handler, 4);
        let err = shim.dispatch("mem://p/f/abc/", "writer-a").await.unwrap_err();
        assert!(matches!(err, ShimError::LockWasStolen { .. }));
    }

    #[tokio::test]
    async fn dispatch_reports_remote_crashed_on_panic() {
        let handler: RemoteHandler = Arc::new(|_memo_uri, _writer_id| Box::pin(async { panic!("boom") }));
        let shim = BoundedInProcessShim::new(handler, 4);
        let err = shim.dispatch("mem://p/f/abc/", "writer-a").await.unwrap_err();
        assert!(matches!(err, ShimError::RemoteCrashed { .. }));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let in_flight_for_handler = in_flight.clone();
        let max_observed_for_handler = max_observed.clone();
        let handler: RemoteHandler = Arc::new(move |_memo_uri, _writer_id| {
            let in_flight = in_flight_for_handler.clone();
            let max_observed = max_observed_for_handler.clone();
            Box::pin(async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let shim = Arc::new(BoundedInProcessShim::new(handler, 2));
        let mut tasks = Vec::new();
        for i in 0..6 {
            let shim = shim.clone();
            tasks.push(tokio::spawn(async move {
                shim.dispatch(&format!("mem://p/f/{i}/"), "writer-a").await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
