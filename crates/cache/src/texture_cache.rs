//! Deduplicated, timeout-bounded texture loading.

use common::{CompositorError, CompositorResult, Size};
use futures::future::join_all;
use gpu::{ImageData, SceneGraph, TextureHandle};
use indexmap::IndexMap;
use networking::AssetFetcher;
use parking_lot::Mutex;
use scene::LoadingProgress;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Per-image load timeout.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Locations with this prefix are served by the fallback texture.
pub const BUILTIN_SCHEME: &str = "builtin:";

const EVENT_CAPACITY: usize = 256;

/// Events published while textures load.
#[derive(Clone, Debug)]
pub enum TextureEvent {
    Progress(LoadingProgress),
    /// The image resolved to the fallback texture.
    Failed { image_id: String, error: CompositorError },
}

/// A loaded texture and the location it was loaded from.
struct CachedTexture {
    location: String,
    texture: TextureHandle,
}

#[derive(Default)]
struct CacheState {
    textures: HashMap<String, CachedTexture>,
    in_flight: HashMap<String, broadcast::Sender<TextureHandle>>,
    destroyed: bool,
}

/// Clears an in-flight entry if the load driving it is dropped before it
/// completes, so waiters resolve instead of hanging.
struct InFlightGuard<'a> {
    state: &'a Mutex<CacheState>,
    image_id: &'a str,
    completed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.state.lock().in_flight.remove(self.image_id);
        }
    }
}

/// Texture cache keyed by image id.
///
/// Failed and timed-out loads resolve to a shared fallback texture; the
/// failure is published as a [`TextureEvent::Failed`] and never fails the
/// surrounding batch. Failures are not cached, and an entry whose location
/// changed is reloaded.
pub struct TextureCache {
    graph: Arc<dyn SceneGraph>,
    fetcher: Arc<dyn AssetFetcher>,
    fallback: TextureHandle,
    timeout: Duration,
    state: Mutex<CacheState>,
    events: broadcast::Sender<TextureEvent>,
}

impl TextureCache {
    pub fn new(graph: Arc<dyn SceneGraph>, fetcher: Arc<dyn AssetFetcher>) -> CompositorResult<Self> {
        let fallback = graph.create_texture(&ImageData::solid(64, 64, [200, 200, 200, 255]))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            graph,
            fetcher,
            fallback,
            timeout: DEFAULT_LOAD_TIMEOUT,
            state: Mutex::new(CacheState::default()),
            events,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribe to progress and failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<TextureEvent> {
        self.events.subscribe()
    }

    pub fn fallback(&self) -> &TextureHandle {
        &self.fallback
    }

    pub fn is_fallback(&self, texture: &TextureHandle) -> bool {
        texture.id == self.fallback.id
    }

    /// Load every registry entry concurrently.
    pub async fn preload(&self, registry: &IndexMap<String, String>) -> CompositorResult<()> {
        self.preload_observed(registry, &|_| {}).await
    }

    /// [`preload`](Self::preload), also handing every event to `observer`.
    pub async fn preload_observed(
        &self,
        registry: &IndexMap<String, String>,
        observer: &(dyn Fn(&TextureEvent) + Sync),
    ) -> CompositorResult<()> {
        if self.state.lock().destroyed {
            return Err(CompositorError::cancelled("texture cache destroyed"));
        }

        let total = registry.len();
        let loaded = AtomicUsize::new(0);
        tracing::info!(images = total, "preloading textures");

        let loads = registry.iter().map(|(image_id, location)| {
            let loaded = &loaded;
            async move {
                self.load_observed(image_id, location, observer).await;
                let done = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                self.publish(
                    TextureEvent::Progress(LoadingProgress::new(done, total, Some(image_id.clone()))),
                    observer,
                );
            }
        });
        join_all(loads).await;

        tracing::debug!(cached = self.len(), "texture preload finished");
        Ok(())
    }

    /// Load one image, sharing the result with any concurrent load of the
    /// same id. A cached texture is reused only when it came from the same
    /// location.
    pub async fn load(&self, image_id: &str, location: &str) -> TextureHandle {
        self.load_observed(image_id, location, &|_| {}).await
    }

    async fn load_observed(
        &self,
        image_id: &str,
        location: &str,
        observer: &(dyn Fn(&TextureEvent) + Sync),
    ) -> TextureHandle {
        let (waiter, replaced) = {
            let mut state = self.state.lock();
            let mut replaced = None;
            if let Some(cached) = state.textures.get(image_id) {
                if cached.location == location {
                    return cached.texture.clone();
                }
                replaced = state.textures.remove(image_id);
            }
            let waiter = match state.in_flight.get(image_id) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    state.in_flight.insert(image_id.to_string(), tx);
                    None
                }
            };
            (waiter, replaced)
        };

        if let Some(old) = replaced {
            tracing::debug!(image_id, from = %old.location, to = location, "image location changed");
            if !self.is_fallback(&old.texture) {
                self.graph.destroy_texture(&old.texture);
            }
        }

        if let Some(mut rx) = waiter {
            return rx.recv().await.unwrap_or_else(|_| self.fallback.clone());
        }

        let mut guard = InFlightGuard {
            state: &self.state,
            image_id,
            completed: false,
        };

        let (texture, failed) = match tokio::time::timeout(self.timeout, self.fetch_texture(location)).await {
            Ok(Ok(texture)) => (texture, false),
            Ok(Err(error)) => (self.fail(image_id, error, observer), true),
            Err(_) => {
                let error = CompositorError::timeout(format!(
                    "{image_id} did not load within {}ms",
                    self.timeout.as_millis()
                ));
                (self.fail(image_id, error, observer), true)
            }
        };

        let tx = {
            let mut state = self.state.lock();
            guard.completed = true;
            let tx = state.in_flight.remove(image_id);
            if state.destroyed {
                None
            } else {
                if !failed {
                    state.textures.insert(
                        image_id.to_string(),
                        CachedTexture {
                            location: location.to_string(),
                            texture: texture.clone(),
                        },
                    );
                }
                tx
            }
        };

        match tx {
            Some(tx) => {
                let _ = tx.send(texture.clone());
                texture
            }
            // Destroyed while loading: the result is released, not cached.
            None => {
                if !self.is_fallback(&texture) {
                    self.graph.destroy_texture(&texture);
                }
                self.fallback.clone()
            }
        }
    }

    async fn fetch_texture(&self, location: &str) -> CompositorResult<TextureHandle> {
        if location.starts_with(BUILTIN_SCHEME) {
            return Ok(self.fallback.clone());
        }
        let bytes = self.fetcher.fetch_bytes(location).await?;
        let image = ImageData::decode(&bytes)?;
        self.graph.create_texture(&image)
    }

    fn fail(
        &self,
        image_id: &str,
        error: CompositorError,
        observer: &(dyn Fn(&TextureEvent) + Sync),
    ) -> TextureHandle {
        tracing::warn!(image_id, error = %error, "texture load failed, using fallback");
        self.publish(
            TextureEvent::Failed {
                image_id: image_id.to_string(),
                error,
            },
            observer,
        );
        self.fallback.clone()
    }

    fn publish(&self, event: TextureEvent, observer: &(dyn Fn(&TextureEvent) + Sync)) {
        observer(&event);
        let _ = self.events.send(event);
    }

    /// The texture for `image_id`, or the fallback when absent.
    pub fn get(&self, image_id: &str) -> TextureHandle {
        self.state
            .lock()
            .textures
            .get(image_id)
            .map(|cached| cached.texture.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.state.lock().textures.contains_key(image_id)
    }

    /// Real sizes of successfully loaded textures, keyed by image id.
    pub fn sizes(&self) -> HashMap<String, Size> {
        self.state
            .lock()
            .textures
            .iter()
            .filter(|(_, cached)| !self.is_fallback(&cached.texture))
            .map(|(id, cached)| (id.clone(), cached.texture.size()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().textures.is_empty()
    }

    /// Estimated bytes held by cached textures, counting the fallback once.
    pub fn memory_usage(&self) -> u64 {
        let state = self.state.lock();
        let owned: u64 = state
            .textures
            .values()
            .filter(|cached| !self.is_fallback(&cached.texture))
            .map(|cached| cached.texture.memory_size())
            .sum();
        owned + self.fallback.memory_size()
    }

    /// Evict and dispose every texture whose image id is not in `keep`.
    pub fn trim(&self, keep: &HashSet<&str>) -> usize {
        let evicted: Vec<TextureHandle> = {
            let mut state = self.state.lock();
            let stale: Vec<String> = state
                .textures
                .keys()
                .filter(|id| !keep.contains(id.as_str()))
                .cloned()
                .collect();
            stale
                .into_iter()
                .filter_map(|id| state.textures.remove(&id))
                .map(|cached| cached.texture)
                .collect()
        };

        for texture in &evicted {
            if !self.is_fallback(texture) {
                self.graph.destroy_texture(texture);
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "trimmed texture cache");
        }
        evicted.len()
    }

    /// Dispose every cached texture, then empty the cache.
    pub fn clear(&self) {
        let textures: Vec<TextureHandle> = self
            .state
            .lock()
            .textures
            .drain()
            .map(|(_, cached)| cached.texture)
            .collect();
        for texture in &textures {
            if !self.is_fallback(texture) {
                self.graph.destroy_texture(texture);
            }
        }
    }

    /// Clear the cache and release the fallback. Loads still in flight are
    /// discarded when they finish.
    pub fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.clear();
        self.graph.destroy_texture(&self.fallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use gpu::HeadlessGraph;
    use std::io::Cursor;

    struct TestFetcher {
        calls: AtomicUsize,
        delay: Duration,
        png: Bytes,
    }

    impl TestFetcher {
        fn new(delay: Duration) -> Self {
            let img = image::RgbaImage::from_pixel(32, 16, image::Rgba([0, 0, 255, 255]));
            let mut bytes = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut bytes, image::ImageFormat::Png)
                .unwrap();
            Self {
                calls: AtomicUsize::new(0),
                delay,
                png: Bytes::from(bytes.into_inner()),
            }
        }
    }

    #[async_trait]
    impl AssetFetcher for TestFetcher {
        async fn fetch_bytes(&self, location: &str) -> CompositorResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match location {
                "missing" => Err(CompositorError::network("404")),
                "garbage" => Ok(Bytes::from_static(b"garbage")),
                _ => Ok(self.png.clone()),
            }
        }
    }

    fn setup(delay: Duration) -> (Arc<HeadlessGraph>, Arc<TestFetcher>, TextureCache) {
        let graph = Arc::new(HeadlessGraph::new());
        let fetcher = Arc::new(TestFetcher::new(delay));
        let cache = TextureCache::new(graph.clone(), fetcher.clone()).unwrap();
        (graph, fetcher, cache)
    }

    fn registry(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(id, url)| (id.to_string(), url.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_are_deduplicated() {
        let (_, fetcher, cache) = setup(Duration::from_millis(50));

        let (a, b) = tokio::join!(cache.load("sky", "sky.png"), cache.load("sky", "sky.png"));
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!((a.width, a.height), (32, 16));

        cache.load("sky", "sky.png").await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_fall_back_without_failing_batch() {
        let (_, _, cache) = setup(Duration::ZERO);
        let mut events = cache.subscribe();

        let registry = registry(&[("ok", "ok.png"), ("gone", "missing"), ("bad", "garbage")]);
        cache.preload(&registry).await.unwrap();

        assert!(!cache.is_fallback(&cache.get("ok")));
        assert!(cache.is_fallback(&cache.get("gone")));
        assert!(cache.is_fallback(&cache.get("bad")));

        let mut failed = Vec::new();
        let mut progress = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                TextureEvent::Failed { image_id, .. } => failed.push(image_id),
                TextureEvent::Progress(p) => progress = progress.max(p.loaded),
            }
        }
        failed.sort();
        assert_eq!(failed, vec!["bad".to_string(), "gone".to_string()]);
        assert_eq!(progress, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_times_out() {
        let (_, _, cache) = setup(Duration::from_secs(30));
        let mut events = cache.subscribe();

        let texture = cache.load("slow", "slow.png").await;
        assert!(cache.is_fallback(&texture));
        match events.try_recv().unwrap() {
            TextureEvent::Failed { error, .. } => assert_eq!(error.kind(), common::ErrorKind::Timeout),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let (_, fetcher, cache) = setup(Duration::ZERO);

        cache.preload(&registry(&[("a", "missing")])).await.unwrap();
        assert!(!cache.contains("a"));

        cache.preload(&registry(&[("a", "a.png")])).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_fallback(&cache.get("a")));
    }

    #[tokio::test]
    async fn test_changed_location_reloads() {
        let (graph, fetcher, cache) = setup(Duration::ZERO);

        cache.preload(&registry(&[("a", "a.png")])).await.unwrap();
        let first = cache.get("a");
        cache.preload(&registry(&[("a", "a.png")])).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        cache.preload(&registry(&[("a", "b.png")])).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_ne!(cache.get("a"), first);
        assert_eq!(graph.textures_destroyed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_load_does_not_block_later_loads() {
        let (_, fetcher, cache) = setup(Duration::from_millis(50));

        let cancelled = tokio::time::timeout(Duration::from_millis(10), cache.load("sky", "sky.png")).await;
        assert!(cancelled.is_err());

        let texture = tokio::time::timeout(Duration::from_secs(60), cache.load("sky", "sky.png"))
            .await
            .unwrap();
        assert!(!cache.is_fallback(&texture));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_missing_returns_fallback() {
        let (_, _, cache) = setup(Duration::ZERO);
        assert!(cache.is_fallback(&cache.get("nothing")));
        assert!(!cache.contains("nothing"));
    }

    #[tokio::test]
    async fn test_builtin_location_skips_fetch() {
        let (_, fetcher, cache) = setup(Duration::ZERO);
        let texture = cache.load("placeholder", "builtin:placeholder").await;
        assert!(cache.is_fallback(&texture));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_disposes_textures() {
        let (graph, _, cache) = setup(Duration::ZERO);
        cache
            .preload(&registry(&[("a", "a.png"), ("b", "b.png"), ("c", "missing")]))
            .await
            .unwrap();
        assert_eq!(graph.live_textures(), 3);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(graph.textures_destroyed(), 2);
        assert_eq!(graph.live_textures(), 1);

        cache.destroy();
        assert_eq!(graph.live_textures(), 0);
        assert!(cache.preload(&registry(&[("a", "a.png")])).await.is_err());
    }

    #[tokio::test]
    async fn test_trim_keeps_referenced() {
        let (graph, _, cache) = setup(Duration::ZERO);
        cache
            .preload(&registry(&[("a", "a.png"), ("b", "b.png")]))
            .await
            .unwrap();

        let keep: HashSet<&str> = ["a"].into_iter().collect();
        assert_eq!(cache.trim(&keep), 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(graph.textures_destroyed(), 1);
        assert_eq!(cache.sizes()["a"], Size::new(32.0, 16.0));
    }
}
