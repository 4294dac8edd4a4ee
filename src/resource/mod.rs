pub mod ehttp;
pub mod memory;

#[cfg(feature = "fs")]
pub mod file;

#[cfg(feature = "reqwest")]
pub mod reqwest;

#[cfg(feature = "fs")]
pub mod hybrid;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A source of bytes addressed by URL, with optional range reads.
///
/// `get_range` is expressed as an HTTP `Range: bytes=a-b` request;
/// implementations must treat both `206 Partial Content` and a `200 OK`
/// full body as valid (a server that ignores the header still satisfies
/// the contract as long as the requested window is returned or sliced by
/// the caller).
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError>;

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let end = offset
            .checked_add(length as u64)
            .map(|v| v - 1)
            .ok_or_else(|| ResourceError::Other("Range overflow".into()))?;
        let range_value = format!("bytes={}-{}", offset, end);

        let mut all_headers = headers.unwrap_or_default();
        all_headers.insert("Range".to_string(), range_value);

        let bytes = self.get(url, Some(all_headers)).await?;
        // a 200 fallback returns the whole body; slice the window out
        if bytes.len() > length {
            let start = offset as usize;
            let end = (start + length).min(bytes.len());
            if start >= bytes.len() {
                return Err(ResourceError::Other(format!(
                    "Range {}..{} outside body of {} bytes",
                    offset,
                    offset + length as u64,
                    bytes.len()
                )));
            }
            return Ok(bytes[start..end].to_vec());
        }
        Ok(bytes)
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
    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected HTTP status code: {0}")]
    Status(u16),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),

    #[error("Unsupported scheme: {0}")]
    Unsupported(String),
}

/// One URL bound to a client: the byte-range getter handed to the
/// hierarchy loader and the point decoder.
#[derive(Clone, Debug)]
pub struct Resource<C: ResourceClient> {
    url: String,
    client: C,
}

impl<C: ResourceClient> Resource<C> {
    pub fn new(url: &str, client: C) -> Self {
        Self { url: url.to_string(), client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get(
        &self,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        self.client.get(&self.url, headers).await
    }

    pub async fn get_range(
        &self,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        self.client.get_range(&self.url, offset, length, headers).await
    }

    pub async fn get_json<T: DeserializeOwned + Send>(
        &self,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        self.client.get_json(&self.url, headers).await
    }
}
