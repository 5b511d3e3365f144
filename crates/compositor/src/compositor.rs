//! Main compositor implementation.

use crate::config::CompositorConfig;
use crate::device::DeviceProfile;
use crate::memory::{NoMemoryProbe, SystemMemoryProbe};
use crate::performance::{PerformanceMetrics, PerformanceMonitor};
use crate::pool::{HandlePool, PoolStats};
use crate::recovery::{ErrorReport, RecoveryConfig, RecoveryController, RecoveryOutcome};
use cache::{TextureCache, TextureEvent};
use common::{CompositorError, CompositorResult, Point, Size};
use gpu::{SceneGraph, SpriteId, SpriteState, Surface, SurfaceOptions};
use indexmap::IndexMap;
use networking::AssetFetcher;
use scene::position::viewport_info;
use scene::{LoaderEvent, MobileSettings, ProcessedLayer, ViewportClass, ViewportInfo};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

const MEMORY_PRESSURE_PERCENT: f64 = 80.0;

/// Messages accepted by [`Compositor::run`].
#[derive(Clone, Debug)]
pub enum CompositorCommand {
    UpdateLayers(Arc<[ProcessedLayer]>),
    Resize { width: u32, height: u32 },
    LowPower(bool),
    Shutdown,
}

/// Outcome of one render pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Layers drawn this pass.
    pub rendered: usize,
    /// Layers hidden by visibility or the layer budget.
    pub culled: usize,
}

/// Compositor statistics.
#[derive(Clone, Debug)]
pub struct CompositorStats {
    pub metrics: PerformanceMetrics,
    pub pool: PoolStats,
    pub texture_count: usize,
    /// Texture memory used, in bytes.
    pub texture_memory: u64,
    pub layer_count: usize,
    pub last_pass: PassReport,
    pub frame_counter: u64,
    pub skipped_frames: u64,
    pub degradation_level: usize,
    pub device_class: ViewportClass,
    pub settings: MobileSettings,
}

/// Draws layers into the scene graph.
struct Renderer {
    graph: Arc<dyn SceneGraph>,
    textures: TextureCache,
    pool: HandlePool,
}

impl Renderer {
    fn render_pass(&mut self, layers: &[ProcessedLayer], settings: &MobileSettings) -> CompositorResult<PassReport> {
        let current: HashSet<&str> = layers.iter().map(ProcessedLayer::id).collect();
        self.pool.reconcile(&current);

        let visible: Vec<&ProcessedLayer> = layers
            .iter()
            .filter(|layer| layer.is_visible)
            .take(settings.max_layers)
            .collect();

        for (index, batch) in visible.chunks(settings.batch_size.max(1)).enumerate() {
            tracing::trace!(batch = index, layers = batch.len(), "drawing batch");
            for layer in batch {
                self.draw(layer, settings.texture_scale)?;
            }
        }

        let shown: HashSet<&str> = visible.iter().map(|layer| layer.id()).collect();
        let mut culled = 0;
        for layer in layers.iter().filter(|layer| !shown.contains(layer.id())) {
            culled += 1;
            if let Some(sprite) = self.pool.sprite_for(layer.id()) {
                self.hide(sprite)?;
            }
        }

        self.pool.resort();
        Ok(PassReport {
            rendered: visible.len(),
            culled,
        })
    }

    fn draw(&mut self, layer: &ProcessedLayer, texture_scale: f32) -> CompositorResult<()> {
        let texture = self.textures.get(layer.image_id());
        let sprite = self.pool.acquire(layer.id(), &texture)?;

        let state = SpriteState {
            texture: texture.id,
            position: layer.absolute_position,
            anchor: Point::new(0.5, 0.5),
            scale: layer.absolute_scale * texture_scale,
            rotation: layer.layer.angle_deg.to_radians(),
            alpha: 1.0,
            visible: true,
            z_index: layer.layer.z,
        };
        self.graph.update_sprite(sprite, &state)?;
        self.pool.set_z(layer.id(), layer.layer.z);

        if !self.graph.is_attached(sprite) {
            self.graph.attach(sprite);
        }
        Ok(())
    }

    fn hide(&self, sprite: SpriteId) -> CompositorResult<()> {
        match self.graph.sprite_state(sprite) {
            Some(mut state) if state.visible => {
                state.visible = false;
                self.graph.update_sprite(sprite, &state)
            }
            _ => Ok(()),
        }
    }
}

/// The compositor turns processed layers into sprites, keeps them in z order
/// and adapts rendering quality to the device and to measured performance.
pub struct Compositor<S: Surface> {
    config: CompositorConfig,
    graph: Arc<dyn SceneGraph>,
    surface: S,
    renderer: Renderer,
    device: DeviceProfile,
    monitor: PerformanceMonitor,
    recovery: RecoveryController,
    layers: Arc<[ProcessedLayer]>,
    viewport: ViewportInfo,
    events: broadcast::Sender<LoaderEvent>,
    epoch: Instant,
    frame_counter: u64,
    skipped_frames: u64,
    last_pass: PassReport,
    initialized: bool,
    destroyed: bool,
}

impl<S: Surface> Compositor<S> {
    /// Create a new compositor. Nothing is drawn until [`initialize`](Self::initialize).
    pub fn new(
        graph: Arc<dyn SceneGraph>,
        fetcher: Arc<dyn AssetFetcher>,
        surface: S,
        config: CompositorConfig,
    ) -> CompositorResult<Self> {
        let textures = TextureCache::new(graph.clone(), fetcher)?.with_timeout(config.asset_timeout);
        let pool = HandlePool::new(graph.clone(), config.max_pool_size);

        let viewport = viewport_info(config.width as f32, config.height as f32);
        let mut device = DeviceProfile::new(viewport.width, config.device_hints);
        if config.low_power {
            device.enable_low_power_mode(true);
        }

        let monitor = if config.sample_memory {
            PerformanceMonitor::with_probe(Box::new(SystemMemoryProbe))
        } else {
            PerformanceMonitor::with_probe(Box::new(NoMemoryProbe))
        };
        let recovery = RecoveryController::new(RecoveryConfig {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        });
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            renderer: Renderer {
                graph: graph.clone(),
                textures,
                pool,
            },
            config,
            graph,
            surface,
            device,
            monitor,
            recovery,
            layers: Arc::from(Vec::new()),
            viewport,
            events,
            epoch: Instant::now(),
            frame_counter: 0,
            skipped_frames: 0,
            last_pass: PassReport::default(),
            initialized: false,
            destroyed: false,
        })
    }

    /// Create the drawing surface.
    ///
    /// A failed attempt is retried once with conservative options through the
    /// recovery controller. If that also fails the original error is returned.
    pub async fn initialize(&mut self) -> CompositorResult<()> {
        if self.destroyed {
            return Err(CompositorError::cancelled("compositor destroyed"));
        }
        let (width, height) = (self.config.width, self.config.height);
        let options = self.device.render_settings().surface_options(width, height);

        if let Err(err) = self.surface.create(&options) {
            tracing::warn!(error = %err, "surface creation failed, retrying with conservative options");
            let conservative = SurfaceOptions::conservative(width, height);
            let surface = &mut self.surface;
            let outcome = self
                .recovery
                .handle_with_retry(&err, "initialization", || std::future::ready(surface.create(&conservative)))
                .await;
            if !outcome.recovered {
                tracing::error!(error = %err, "compositor initialization failed");
                return Err(err);
            }
        }

        self.center_root();
        self.initialized = true;
        tracing::info!(
            width,
            height,
            class = ?self.device.class(),
            low_end = self.device.is_low_end(),
            "compositor initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Receive preload progress and load failures.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Load every image in the registry before rendering.
    pub async fn preload(&self, registry: &IndexMap<String, String>) -> CompositorResult<()> {
        let events = &self.events;
        self.renderer
            .textures
            .preload_observed(registry, &|event| {
                let event = match event {
                    TextureEvent::Progress(progress) => LoaderEvent::Progress(progress.clone()),
                    TextureEvent::Failed { error, .. } => LoaderEvent::Error(error.clone()),
                };
                let _ = events.send(event);
            })
            .await
    }

    /// Dimensions of every loaded texture, keyed by image id.
    pub fn texture_sizes(&self) -> HashMap<String, Size> {
        self.renderer.textures.sizes()
    }

    /// Replace the scene snapshot and render it.
    pub async fn update_layers(&mut self, layers: Arc<[ProcessedLayer]>) {
        self.layers = layers;
        let now = self.now_ms();
        self.render_frame(now).await;
    }

    pub fn layers(&self) -> Arc<[ProcessedLayer]> {
        Arc::clone(&self.layers)
    }

    /// Resize the surface and recentre the root container on the fitted
    /// viewport.
    pub fn update_viewport(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.viewport = viewport_info(width as f32, height as f32);
        self.device.reclassify(self.viewport.width);
        if self.initialized {
            self.surface.resize(width, height);
        }
        self.center_root();
        tracing::debug!(width, height, viewport = ?self.viewport, "viewport updated");
    }

    pub fn viewport(&self) -> ViewportInfo {
        self.viewport
    }

    pub fn enable_low_power_mode(&mut self, enabled: bool) {
        tracing::info!(enabled, "low-power mode");
        self.device.enable_low_power_mode(enabled);
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    /// One animation-loop tick at `now_ms`.
    pub async fn render_frame(&mut self, now_ms: f64) {
        if !self.initialized || self.destroyed {
            return;
        }
        self.frame_counter += 1;
        self.monitor.record_frame(now_ms);

        if self.device.should_skip_frame(self.frame_counter) {
            self.skipped_frames += 1;
        } else {
            self.render_pass().await;
            if let Err(err) = self.surface.present() {
                let outcome = self.recovery.handle(&err, "present").await;
                if outcome.recovered {
                    self.apply_degradation();
                }
            }
        }

        self.monitor.set_counts(self.renderer.pool.active_count(), self.renderer.textures.len());
        if let Some(metrics) = self.monitor.tick(now_ms) {
            self.apply_metrics(metrics).await;
        }

        if self.frame_counter % self.config.maintenance_interval.max(1) == 0 {
            self.maintain();
        }
    }

    async fn render_pass(&mut self) {
        let started = Instant::now();
        let layers = Arc::clone(&self.layers);
        let settings = *self.device.settings();

        match self.renderer.render_pass(&layers, &settings) {
            Ok(report) => self.last_pass = report,
            Err(err) => {
                let renderer = &mut self.renderer;
                let mut retried = None;
                let outcome = self
                    .recovery
                    .handle_with_retry(&err, "layer_rendering", || {
                        std::future::ready(
                            renderer
                                .render_pass(&layers, &settings)
                                .map(|report| retried = Some(report)),
                        )
                    })
                    .await;

                if let Some(report) = retried {
                    self.last_pass = report;
                }
                if !outcome.recovered && self.recovery.degradation_level() > 0 {
                    self.apply_degradation();
                }
            }
        }

        self.monitor.record_render(started.elapsed().as_secs_f64() * 1000.0);
    }

    async fn apply_metrics(&mut self, metrics: PerformanceMetrics) {
        if self
            .device
            .adjust_for_performance(metrics.fps, metrics.memory_usage.percentage)
        {
            self.render_pass().await;
        }

        let report = self.monitor.is_degraded();
        if report.degraded {
            let reasons = report.reasons.join(", ");
            let error = if report.memory_bound() {
                CompositorError::memory(reasons)
            } else {
                CompositorError::render(format!("performance degraded: {reasons}"))
            };
            let outcome = self.recovery.handle(&error, "performance_degradation").await;
            if outcome.recovered {
                self.apply_degradation();
            }
        }
    }

    /// Clamp the device settings to the current degradation level and drop
    /// layers beyond its budget.
    fn apply_degradation(&mut self) {
        let degradation = self.recovery.degradation_settings();
        self.device.clamp(
            degradation.max_layers,
            degradation.texture_scale,
            degradation.enable_low_power_mode,
        );
        if self.layers.len() > degradation.max_layers {
            self.layers = self.layers.iter().take(degradation.max_layers).cloned().collect();
        }
        tracing::warn!(
            level = self.recovery.degradation_level(),
            max_layers = self.device.settings().max_layers,
            texture_scale = self.device.settings().texture_scale,
            "rendering degraded"
        );
    }

    fn maintain(&mut self) {
        self.renderer.pool.tune();

        let memory = self.monitor.metrics().memory_usage.percentage;
        if memory > MEMORY_PRESSURE_PERCENT {
            let keep: HashSet<&str> = self.layers.iter().map(ProcessedLayer::image_id).collect();
            let evicted = self.renderer.textures.trim(&keep);
            tracing::info!(evicted, memory, "released unused textures under memory pressure");
        }
    }

    /// Hand an error from outside the render path to the recovery controller.
    pub async fn recover(&mut self, error: &CompositorError, context: &str) -> RecoveryOutcome {
        let outcome = self.recovery.handle(error, context).await;
        if outcome.recovered && self.recovery.degradation_level() > 0 {
            self.apply_degradation();
        }
        outcome
    }

    /// [`recover`](Self::recover), re-running `retry` where the strategy
    /// calls for it.
    pub async fn recover_with_retry<F, Fut>(
        &mut self,
        error: &CompositorError,
        context: &str,
        retry: F,
    ) -> RecoveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompositorResult<()>>,
    {
        let outcome = self.recovery.handle_with_retry(error, context, retry).await;
        if outcome.recovered && self.recovery.degradation_level() > 0 {
            self.apply_degradation();
        }
        outcome
    }

    /// Run the animation loop at the device's target frame rate until
    /// [`CompositorCommand::Shutdown`] arrives, the sender is dropped or the
    /// compositor is destroyed.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<CompositorCommand>) {
        let mut fps = self.device.settings().target_fps;
        let mut ticker = frame_interval(fps);
        tracing::debug!(fps, "animation loop started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CompositorCommand::Shutdown) | None => break,
                    Some(command) => self.apply_command(command).await,
                },
                _ = ticker.tick() => {
                    let now = self.now_ms();
                    self.render_frame(now).await;
                },
            }

            if self.destroyed {
                break;
            }
            let target = self.device.settings().target_fps;
            if target != fps {
                fps = target;
                ticker = frame_interval(fps);
            }
        }
        tracing::debug!(frames = self.frame_counter, "animation loop stopped");
    }

    async fn apply_command(&mut self, command: CompositorCommand) {
        match command {
            CompositorCommand::UpdateLayers(layers) => self.update_layers(layers).await,
            CompositorCommand::Resize { width, height } => self.update_viewport(width, height),
            CompositorCommand::LowPower(enabled) => self.enable_low_power_mode(enabled),
            CompositorCommand::Shutdown => {}
        }
    }

    pub fn stats(&self) -> CompositorStats {
        CompositorStats {
            metrics: *self.monitor.metrics(),
            pool: self.renderer.pool.stats(),
            texture_count: self.renderer.textures.len(),
            texture_memory: self.renderer.textures.memory_usage(),
            layer_count: self.layers.len(),
            last_pass: self.last_pass,
            frame_counter: self.frame_counter,
            skipped_frames: self.skipped_frames,
            degradation_level: self.recovery.degradation_level(),
            device_class: self.device.class(),
            settings: *self.device.settings(),
        }
    }

    pub fn optimization_suggestions(&self) -> Vec<String> {
        self.monitor.suggestions()
    }

    pub fn error_report(&self) -> ErrorReport {
        self.recovery.error_report()
    }

    /// Multi-line summary of the current state.
    pub fn diagnostic_overlay(&self) -> String {
        let stats = self.stats();
        let mut lines = vec![
            format!(
                "FPS: {:.0} ({:.0}ms frame, {:.1}ms render)",
                stats.metrics.fps, stats.metrics.frame_time, stats.metrics.render_time
            ),
            format!(
                "Layers: {} rendered, {} culled, {} total",
                stats.last_pass.rendered, stats.last_pass.culled, stats.layer_count
            ),
            format!(
                "Sprites: {} active, {} pooled (cap {})",
                stats.pool.active, stats.pool.available, stats.pool.max_pool_size
            ),
            format!(
                "Textures: {} ({:.1} MB)",
                stats.texture_count,
                stats.texture_memory as f64 / (1024.0 * 1024.0)
            ),
            format!(
                "Device: {:?}, max {} layers, texture scale {:.2}{}",
                stats.device_class,
                stats.settings.max_layers,
                stats.settings.texture_scale,
                if stats.settings.enable_low_power_mode { ", low power" } else { "" }
            ),
        ];
        if stats.degradation_level > 0 {
            lines.push(format!("Degradation level: {}", stats.degradation_level));
        }
        if stats.metrics.memory_usage.total > 0 {
            lines.push(format!("Memory: {:.0}%", stats.metrics.memory_usage.percentage));
        }
        lines.join("\n")
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Tear everything down. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.monitor.destroy();
        self.recovery.reset();
        self.renderer.pool.destroy();
        self.renderer.textures.destroy();
        self.surface.destroy();
        self.layers = Arc::from(Vec::new());
        self.initialized = false;
        tracing::info!(frames = self.frame_counter, "compositor destroyed");
    }

    fn center_root(&self) {
        let offset = Point::new(
            (self.config.width as f32 - self.viewport.width) / 2.0,
            (self.config.height as f32 - self.viewport.height) / 2.0,
        );
        self.graph.set_root_transform(offset, 1.0);
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

impl<S: Surface> Drop for Compositor<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn frame_interval(fps: u32) -> tokio::time::Interval {
    let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
