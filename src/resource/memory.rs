use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Preloaded in-memory store keyed by URL. Backs tests and demos, and
/// wasm hosts that ship a dataset inside the bundle.
#[derive(Clone, Default)]
pub struct MemoryClient {
    files: Arc<HashMap<String, Bytes>>,
}

impl MemoryClient {
    pub fn new(files: HashMap<String, Bytes>) -> Self {
        Self { files: Arc::new(files) }
    }

    fn lookup(&self, url: &str) -> Result<&Bytes, ResourceError> {
        self.files
            .get(url)
            .ok_or_else(|| ResourceError::Status(404))
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(
        &self,
        url: &str,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        Ok(self.lookup(url)?.to_vec())
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self.lookup(url)?;
        let start = offset as usize;
        let end = start + length;
        if end > bytes.len() {
            return Err(ResourceError::Other(format!(
                "Range {}..{} outside body of {} bytes",
                start,
                end,
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }
}
