use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hashing::Fingerprint;
use log::trace;

use crate::{BlobStore, BlobStoreError, HeadResult};

/// A `BlobStore` backed by the local filesystem, rooted at a single directory. This is the
/// reference driver for single-node deployments and for exercising the control-file layout in
/// tests without a real network service.
pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: PathBuf) -> LocalFsBlobStore {
        LocalFsBlobStore { root }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, BlobStoreError> {
        if uri.split('/').any(|segment| segment == "..") {
            return Err(BlobStoreError::PermissionDenied(uri.to_owned()));
        }
        Ok(self.root.join(uri))
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        let path = self.resolve(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobStoreError::WriteFailed(uri.to_owned(), e.to_string()))?;
        }
        trace!("blob_store: writing {} bytes to {:?}", bytes.len(), path);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BlobStoreError::WriteFailed(uri.to_owned(), e.to_string()))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.resolve(uri)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobStoreError::NotFound(uri.to_owned())
            } else {
                BlobStoreError::TransientError(uri.to_owned(), e.to_string())
            }
        })
    }

    async fn head(&self, uri: &str) -> Result<HeadResult, BlobStoreError> {
        let path = self.resolve(uri)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| BlobStoreError::TransientError(uri.to_owned(), e.to_string()))?;
                Ok(HeadResult {
                    exists: true,
                    size: Some(metadata.len() as usize),
                    content_hash: Some(Fingerprint::from_bytes(&bytes)),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HeadResult::absent()),
            Err(e) => Err(BlobStoreError::TransientError(uri.to_owned(), e.to_string())),
        }
    }

    async fn list(&self, uri_prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let prefix_path = self.resolve(uri_prefix)?;
        let (dir, file_prefix) = match split_for_listing(&prefix_path) {
            Some(pair) => pair,
            None => return Ok(vec![]),
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(BlobStoreError::TransientError(uri_prefix.to_owned(), e.to_string())),
        };
        let mut out = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobStoreError::TransientError(uri_prefix.to_owned(), e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&file_prefix) {
                out.extend(collect_recursive(&entry.path(), &self.root).await?);
            }
        }
        Ok(out)
    }

    async fn delete(&self, uri: &str) -> Result<(), BlobStoreError> {
        let path = self.resolve(uri)?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobStoreError::NotFound(uri.to_owned())
            } else {
                BlobStoreError::PermissionDenied(uri.to_owned())
            }
        })
    }
}

/// Splits a prefix path into the directory to scan and the file-name prefix to match within it.
fn split_for_listing(prefix_path: &Path) -> Option<(PathBuf, String)> {
    let file_prefix = prefix_path.file_name()?.to_string_lossy().into_owned();
    let dir = prefix_path.parent()?.to_path_buf();
    Some((dir, file_prefix))
}

async fn collect_recursive(path: &Path, root: &Path) -> Result<Vec<String>, BlobStoreError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| BlobStoreError::TransientError(path.display().to_string(), e.to_string()))?;
    if metadata.is_file() {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| BlobStoreError::TransientError(path.display().to_string(), "not under root".to_owned()))?;
        return Ok(vec![relative.to_string_lossy().replace('\\', "/")]);
    }
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| BlobStoreError::TransientError(path.display().to_string(), e.to_string()))?;
    let mut out = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BlobStoreError::TransientError(path.display().to_string(), e.to_string()))?
    {
        out.extend(Box::pin(collect_recursive(&entry.path(), root)).await?);
    }
    Ok(out)
}
