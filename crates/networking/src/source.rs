//! Scene document sources.

use crate::http_error;
use async_trait::async_trait;
use common::{CompositorError, CompositorResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use url::Url;

/// Where a scene document comes from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch and parse the full document.
    async fn fetch(&self) -> CompositorResult<Value>;

    /// A value that grows whenever the document changes, such as a
    /// modification timestamp in milliseconds. `None` when the source
    /// cannot tell.
    async fn change_marker(&self) -> CompositorResult<Option<u64>>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// A scene document on the local filesystem.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    async fn fetch(&self) -> CompositorResult<Value> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn change_marker(&self) -> CompositorResult<Option<u64>> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Ok(Some(modified.as_millis() as u64))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A scene document served over HTTP.
///
/// Change detection needs a marker endpoint returning
/// `{"lastModified": <number>}`; without one the document is never
/// considered changed.
pub struct HttpSource {
    client: reqwest::Client,
    url: Url,
    marker_url: Option<Url>,
}

impl HttpSource {
    pub fn new(url: &str) -> CompositorResult<Self> {
        let url = Url::parse(url).map_err(|e| CompositorError::parse(format!("invalid URL {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_error)?;

        Ok(Self {
            client,
            url,
            marker_url: None,
        })
    }

    pub fn with_marker_url(mut self, marker_url: &str) -> CompositorResult<Self> {
        let parsed = Url::parse(marker_url)
            .map_err(|e| CompositorError::parse(format!("invalid URL {marker_url}: {e}")))?;
        self.marker_url = Some(parsed);
        Ok(self)
    }

    async fn get_json(&self, url: &Url) -> CompositorResult<Value> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?;
        response.json().await.map_err(http_error)
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn fetch(&self) -> CompositorResult<Value> {
        self.get_json(&self.url).await
    }

    async fn change_marker(&self) -> CompositorResult<Option<u64>> {
        let Some(marker_url) = &self.marker_url else {
            return Ok(None);
        };
        let body = self.get_json(marker_url).await?;
        Ok(body.get("lastModified").and_then(Value::as_f64).map(|v| v as u64))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// An in-memory document, bumped by hand. Used by embedders that generate
/// scenes programmatically, and by tests.
pub struct MemorySource {
    inner: Mutex<MemoryDocument>,
}

struct MemoryDocument {
    value: Value,
    marker: u64,
    failures: usize,
}

impl MemorySource {
    pub fn new(value: Value) -> Self {
        Self {
            inner: Mutex::new(MemoryDocument {
                value,
                marker: 1,
                failures: 0,
            }),
        }
    }

    /// Replace the document and advance the change marker.
    pub fn update(&self, value: Value) {
        let mut inner = self.inner.lock();
        inner.value = value;
        inner.marker += 1;
    }

    /// Make the next `count` fetches fail with a network error.
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().failures = count;
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn fetch(&self) -> CompositorResult<Value> {
        let mut inner = self.inner.lock();
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(CompositorError::network("document fetch failed"));
        }
        Ok(inner.value.clone())
    }

    async fn change_marker(&self) -> CompositorResult<Option<u64>> {
        Ok(Some(self.inner.lock().marker))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
