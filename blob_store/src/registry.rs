use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{BlobStore, BlobStoreError, HeadResult};

/// A scheme-keyed plugin table of `BlobStore` drivers, populated once at process startup and
/// immutable thereafter (mirrors the teacher's `choose_byte_store_provider` registry). Dispatches
/// each call to the driver whose registered scheme prefixes the URI, after stripping the
/// `<scheme>://` prefix so that drivers only ever see their own opaque path.
pub struct BlobStoreRegistry {
    drivers: HashMap<String, Arc<dyn BlobStore>>,
}

impl BlobStoreRegistry {
    pub fn builder() -> BlobStoreRegistryBuilder {
        BlobStoreRegistryBuilder {
            drivers: HashMap::new(),
        }
    }

    fn split(uri: &str) -> Result<(&str, &str), BlobStoreError> {
        uri.split_once("://")
            .ok_or_else(|| BlobStoreError::PermissionDenied(format!("no scheme in uri {uri:?}")))
    }

    fn driver_for<'a>(&'a self, uri: &str) -> Result<(&'a Arc<dyn BlobStore>, String), BlobStoreError> {
        let (scheme, rest) = Self::split(uri)?;
        let driver = self
            .drivers
            .get(scheme)
            .ok_or_else(|| BlobStoreError::PermissionDenied(format!("no driver registered for scheme {scheme:?}")))?;
        Ok((driver, rest.to_owned()))
    }
}

pub struct BlobStoreRegistryBuilder {
    drivers: HashMap<String, Arc<dyn BlobStore>>,
}

impl BlobStoreRegistryBuilder {
    pub fn register(mut self, scheme: impl Into<String>, driver: Arc<dyn BlobStore>) -> Self {
        self.drivers.insert(scheme.into(), driver);
        self
    }

    pub fn build(self) -> BlobStoreRegistry {
        BlobStoreRegistry {
            drivers: self.drivers,
        }
    }
}

#[async_trait]
impl BlobStore for BlobStoreRegistry {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        let (driver, rest) = self.driver_for(uri)?;
        driver.put(&rest, bytes).await
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        let (driver, rest) = self.driver_for(uri)?;
        driver.get(&rest).await
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        let (driver, rest) = self.driver_for(uri)?;
        driver.head(&rest).await
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let (driver, rest) = self.driver_for(uri_prefix)?;
        let (scheme, _) = Self::split(uri_prefix)?;
        Ok(driver
            .list(&rest)
            .await?
            .into_iter()
            .map(|p| format!("{scheme}://{p}"))
            .collect())
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        let (driver, rest) = self.driver_for(uri)?;
        driver.delete(&rest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBlobStore;

    #[tokio::test]
    async fn dispatches_by_scheme() {
        let registry = BlobStoreRegistry::builder()
            .register("mem", Arc::new(InMemoryBlobStore::new()))
            .build();
        registry.put("mem://a/b", b"hi".to_vec()).await.unwrap();
        assert_eq!(registry.get("mem://a/b").await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn unregistered_scheme_is_permission_denied() {
        let registry = BlobStoreRegistry::builder().build();
        assert!(matches!(
            registry.get("s3://a/b").await,
            Err(BlobStoreError::PermissionDenied(_))
        ));
    }
}
