//! Texture caching for the compositor.

pub mod texture_cache;

pub use texture_cache::{TextureCache, TextureEvent, DEFAULT_LOAD_TIMEOUT};
