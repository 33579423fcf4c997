#[cfg(feature = "fs")]
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Asynchronous byte source addressed by url.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError>;

    /// Reads `length` bytes at `offset`. Clients that can seek should
    /// override this; the default fetches the whole resource and slices it.
    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self.get(url, headers).await?;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(length)?))
            .filter(|range| range.end <= bytes.len())
            .ok_or_else(|| ResourceError::OutOfRange {
                url: url.to_string(),
                offset,
                length,
            })?;
        Ok(bytes[range].to_vec())
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        let bytes = self.get(url, headers).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl<C: ResourceClient> ResourceClient for Arc<C> {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get(url, headers).await
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get_range(url, offset, length, headers).await
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        (**self).get_json(url, headers).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Requested range {offset}+{length} is outside of {url}")]
    OutOfRange { url: String, offset: u64, length: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Unsupported scheme: {0}")]
    Unsupported(String),
}
