//! Fetching for the compositor.
//!
//! This crate handles:
//! - Scene documents from files, HTTP endpoints or memory
//! - Image assets referenced by the scene's image registry
//! - Polling a scene document for changes (hot reload)

pub mod fetch;
pub mod source;
pub mod watcher;

pub use fetch::{AssetFetcher, AssetLoader};
pub use source::{DocumentSource, FileSource, HttpSource, MemorySource};
pub use watcher::{ConfigWatcher, WatcherHandle, DEFAULT_POLL_INTERVAL};

use common::CompositorError;

/// Map a reqwest failure onto the compositor's error categories.
pub(crate) fn http_error(err: reqwest::Error) -> CompositorError {
    if err.is_timeout() {
        CompositorError::timeout(err.to_string())
    } else if err.is_decode() {
        CompositorError::parse(err.to_string())
    } else {
        CompositorError::network(err.to_string())
    }
}
