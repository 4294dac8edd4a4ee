use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
#[cfg(target_arch = "wasm32")]
use ehttp::Mode;

/// Default client: works on native and wasm targets alike.
pub struct EhttpClient;

#[async_trait]
impl ResourceClient for EhttpClient {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>, // `ehttp` has limited headers support
    ) -> Result<Vec<u8>, ResourceError> {
        let (tx, rx) = futures::channel::oneshot::channel();

        let headers = {
            if let Some(hdrs) = headers {
                let mut headers = ehttp::Headers::default();
                for (k, v) in hdrs {
                    headers.insert(k, v);
                }
                headers
            } else {
                Default::default()
            }
        };
        let request = ehttp::Request {
            method: "GET".to_owned(),
            url: url.to_string(),
            body: vec![],
            headers,
            #[cfg(target_arch = "wasm32")]
            mode: Mode::default(),
        };

        ehttp::fetch(request, move |res| {
            let _ = tx.send(res);
        });

        let response = rx
            .await
            .map_err(|_| ResourceError::Network("channel closed".to_string()))?;
        let response = response.map_err(|e| ResourceError::Network(format!("{:?}", e)))?;

        // 206 for honored range requests, 200 for full-body fallbacks
        if response.status != 200 && response.status != 206 {
            return Err(ResourceError::Status(response.status));
        }

        Ok(response.bytes)
    }
}
