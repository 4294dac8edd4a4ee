use super::{ResourceClient, ResourceError};
use crate::resource::file::FileClient;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Dispatches `file://` urls to the file client and everything else to
/// the wrapped network client.
pub struct HybridClient<T: ResourceClient> {
    file_client: FileClient,
    inner: T,
}

impl<T: ResourceClient> HybridClient<T> {
    pub fn new(inner: T) -> Self {
        Self { file_client: FileClient, inner }
    }
}

#[async_trait]
impl<T: ResourceClient + Send + Sync> ResourceClient for HybridClient<T> {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        if url.starts_with("file://") {
            self.file_client.get(url, headers).await
        } else {
            self.inner.get(url, headers).await
        }
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        if url.starts_with("file://") {
            self.file_client.get_range(url, offset, length, headers).await
        } else {
            self.inner.get_range(url, offset, length, headers).await
        }
    }
}
