//! A scene document bound to a compositor.

use common::{CompositorResult, ErrorKind};
use compositor::{Compositor, CompositorConfig};
use gpu::{SceneGraph, Surface};
use networking::{AssetFetcher, DocumentSource};
use scene::{LoaderEvent, SceneLoader};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct ViewerSession<S: Surface> {
    loader: SceneLoader<dyn DocumentSource>,
    compositor: Compositor<S>,
}

impl<S: Surface> ViewerSession<S> {
    /// Initialise the compositor, load the document and draw it.
    ///
    /// Validation errors are returned as-is. Fetch failures are retried
    /// through the compositor's recovery controller and parse failures
    /// switch to the built-in fallback scene.
    pub async fn open(
        source: Arc<dyn DocumentSource>,
        fetcher: Arc<dyn AssetFetcher>,
        graph: Arc<dyn SceneGraph>,
        surface: S,
        config: CompositorConfig,
    ) -> CompositorResult<Self> {
        let (width, height) = (config.width as f32, config.height as f32);
        let attempts = config.max_retries + 1;

        let mut compositor = Compositor::new(graph, fetcher, surface, config)?;
        compositor.initialize().await?;

        let mut loader = SceneLoader::new(Arc::clone(&source), width, height);
        let mut result = loader.load().await.map(drop);
        let mut attempt = 0;
        while let Err(error) = result {
            attempt += 1;
            if error.kind() == ErrorKind::Validation || attempt > attempts {
                return Err(error);
            }

            let outcome = compositor
                .recover_with_retry(&error, "scene_load", || {
                    let source = Arc::clone(&source);
                    async move { source.fetch().await.map(drop) }
                })
                .await;

            if let Some(fallback) = outcome.fallback {
                tracing::warn!(error = %error, "showing fallback scene");
                loader.set_config(&serde_json::to_value(&fallback)?)?;
                result = Ok(());
            } else if outcome.recovered {
                result = loader.load().await.map(drop);
            } else {
                return Err(error);
            }
        }

        let mut session = Self { loader, compositor };
        session.present().await?;
        Ok(session)
    }

    /// Preload the document's images and hand the layers to the compositor.
    async fn present(&mut self) -> CompositorResult<()> {
        if let Some(document) = self.loader.document() {
            let registry = document.image_registry.clone();
            self.compositor.preload(&registry).await?;
        }
        let layers = self.loader.refine_visibility(self.compositor.texture_sizes());
        tracing::info!(layers = layers.len(), "scene presented");
        self.compositor.update_layers(layers).await;
        Ok(())
    }

    /// Re-fetch the document. A rejected document leaves the current scene
    /// on screen; the reason goes to subscribers.
    pub async fn reload(&mut self) -> bool {
        if !self.loader.hot_reload().await {
            return false;
        }
        match self.present().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "reloaded scene could not be presented");
                false
            }
        }
    }

    pub async fn resize(&mut self, width: u32, height: u32) {
        self.compositor.update_viewport(width, height);
        let layers = self.loader.update_viewport(width as f32, height as f32);
        self.compositor.update_layers(layers).await;
    }

    pub async fn render_frame(&mut self, now_ms: f64) {
        self.compositor.render_frame(now_ms).await;
    }

    /// Render `count` frames on a simulated clock advancing `frame_ms` per
    /// frame, continuing from `start_ms`. Returns the clock after the last
    /// frame.
    pub async fn render_frames(&mut self, count: u64, start_ms: f64, frame_ms: f64) -> f64 {
        let mut now = start_ms;
        for _ in 0..count {
            now += frame_ms;
            self.compositor.render_frame(now).await;
        }
        now
    }

    /// Loader events: layer updates, progress and load errors.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.loader.subscribe()
    }

    /// Preload progress and image load failures.
    pub fn subscribe_assets(&self) -> broadcast::Receiver<LoaderEvent> {
        self.compositor.subscribe()
    }

    pub fn loader(&self) -> &SceneLoader<dyn DocumentSource> {
        &self.loader
    }

    pub fn compositor(&self) -> &Compositor<S> {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor<S> {
        &mut self.compositor
    }

    pub fn destroy(&mut self) {
        self.compositor.destroy();
    }
}
