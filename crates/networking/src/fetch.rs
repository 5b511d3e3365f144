//! Image asset fetching.

use crate::http_error;
use async_trait::async_trait;
use bytes::Bytes;
use common::{CompositorError, CompositorResult};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Fetches the raw bytes of an image asset.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_bytes(&self, location: &str) -> CompositorResult<Bytes>;
}

/// Fetches `http(s)://` assets with reqwest and everything else from disk.
///
/// Relative paths resolve against `base_dir`, normally the directory that
/// holds the scene document.
pub struct AssetLoader {
    client: reqwest::Client,
    base_dir: PathBuf,
}

impl AssetLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> CompositorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_error)?;
        Ok(Self {
            client,
            base_dir: base_dir.into(),
        })
    }

    fn resolve_path(&self, location: &str) -> CompositorResult<PathBuf> {
        if location.starts_with("file://") {
            let url = Url::parse(location).map_err(|e| CompositorError::parse(e.to_string()))?;
            return url
                .to_file_path()
                .map_err(|_| CompositorError::parse(format!("not a local path: {location}")));
        }
        let path = PathBuf::from(location.trim_start_matches("./"));
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.base_dir.join(path))
        }
    }
}

#[async_trait]
impl AssetFetcher for AssetLoader {
    async fn fetch_bytes(&self, location: &str) -> CompositorResult<Bytes> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .client
                .get(location)
                .send()
                .await
                .map_err(http_error)?
                .error_for_status()
                .map_err(http_error)?;
            return response.bytes().await.map_err(http_error);
        }

        let path = self.resolve_path(location)?;
        tracing::trace!(path = %path.display(), "reading asset");
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }
}
