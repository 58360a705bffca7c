use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use rand::Rng;

use crate::{BlobStore, BlobStoreError, HeadResult};

/// Bounded exponential backoff with jitter. All retries performed by `RetryingBlobStore` are safe
/// because every `BlobStore` operation is idempotent (overwrites are allowed; deletes and reads
/// are naturally idempotent).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter_frac: f64 = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(capped.as_secs_f64() * jitter_frac)
    }
}

/// Wraps any `BlobStore` so that `TransientError` results are retried per `RetryPolicy`;
/// `NotFound`, `PermissionDenied`, and `WriteFailed` are never retried.
pub struct RetryingBlobStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BlobStore> RetryingBlobStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> RetryingBlobStore<S> {
        RetryingBlobStore { inner, policy }
    }

    async fn with_retry<T, F, Fut>(&self, uri: &str, op: F) -> Result<T, BlobStoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, BlobStoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.policy.max_attempts => {
                    warn!("blob_store: transient error on {uri} (attempt {attempt}): {e}");
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for RetryingBlobStore<S> {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        self.with_retry(uri, || self.inner.put(uri, bytes.clone()))
            .await
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.with_retry(uri, || self.inner.get(uri)).await
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        self.with_retry(uri, || self.inner.head(uri)).await
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        self.with_retry(uri_prefix, || self.inner.list(uri_prefix))
            .await
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        self.with_retry(uri, || self.inner.delete(uri)).await
    }
}

#[async_trait]
impl BlobStore for Arc<dyn BlobStore> {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        (**self).put(uri, bytes).await
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        (**self).get(uri).await
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        (**self).head(uri).await
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        (**self).list(uri_prefix).await
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        (**self).delete(uri).await
    }
}
