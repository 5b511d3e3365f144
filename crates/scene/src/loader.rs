//! Scene loading: fetch, validate, transform, notify.

use crate::model::{LoadingProgress, ProcessedLayer, SceneDocument, ViewportInfo};
use crate::position::{self, DEFAULT_TEXTURE_SIZE};
use common::{CompositorError, CompositorResult, Size};
use networking::DocumentSource;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notifications sent to loader subscribers.
#[derive(Clone, Debug)]
pub enum LoaderEvent {
    /// The full processed layer list, in paint order.
    LayersUpdated(Arc<[ProcessedLayer]>),
    Error(CompositorError),
    Progress(LoadingProgress),
}

/// How visibility is decided while processing.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Visibility {
    /// Everything visible until texture sizes are known.
    Assume,
    /// Cull against known texture sizes, falling back to the default size.
    Compute,
}

/// Loads a scene document and keeps its processed layers current.
pub struct SceneLoader<S: ?Sized> {
    source: Arc<S>,
    document: Option<SceneDocument>,
    viewport: ViewportInfo,
    texture_sizes: HashMap<String, Size>,
    layers: Arc<[ProcessedLayer]>,
    events: broadcast::Sender<LoaderEvent>,
}

impl<S: DocumentSource + ?Sized> SceneLoader<S> {
    pub fn new(source: Arc<S>, container_width: f32, container_height: f32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            document: None,
            viewport: position::viewport_info(container_width, container_height),
            texture_sizes: HashMap::new(),
            layers: Arc::from(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Sender for components that report on the loader's behalf, such as
    /// preload progress.
    pub fn event_sender(&self) -> broadcast::Sender<LoaderEvent> {
        self.events.clone()
    }

    pub fn document(&self) -> Option<&SceneDocument> {
        self.document.as_ref()
    }

    pub fn viewport(&self) -> ViewportInfo {
        self.viewport
    }

    pub fn layers(&self) -> Arc<[ProcessedLayer]> {
        self.layers.clone()
    }

    /// Fetch, validate and process the document.
    pub async fn load(&mut self) -> CompositorResult<Arc<[ProcessedLayer]>> {
        tracing::info!(source = %self.source.describe(), "loading scene document");
        let result = match self.source.fetch().await {
            Ok(raw) => self.set_config(&raw),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            tracing::error!(error = %err, "scene load failed");
            self.emit(LoaderEvent::Error(err.clone()));
        }
        result
    }

    /// Validate and install a raw document.
    ///
    /// Structural errors are fatal and leave the current document in place;
    /// warnings are logged only.
    pub fn set_config(&mut self, raw: &Value) -> CompositorResult<Arc<[ProcessedLayer]>> {
        let (document, warnings) = SceneDocument::from_value(raw)?;
        for warning in &warnings {
            tracing::warn!("scene document: {warning}");
        }

        self.texture_sizes
            .retain(|image_id, _| document.image_registry.contains_key(image_id));
        tracing::debug!(layers = document.layers.len(), "scene document accepted");
        self.document = Some(document);
        Ok(self.process(Visibility::Assume))
    }

    /// Refit the viewport and recompute every layer against it.
    pub fn update_viewport(&mut self, container_width: f32, container_height: f32) -> Arc<[ProcessedLayer]> {
        self.viewport = position::viewport_info(container_width, container_height);
        self.process(Visibility::Compute)
    }

    /// Recompute visibility with real texture sizes, keyed by image id.
    pub fn refine_visibility(&mut self, texture_sizes: HashMap<String, Size>) -> Arc<[ProcessedLayer]> {
        self.texture_sizes.extend(texture_sizes);
        self.process(Visibility::Compute)
    }

    /// Re-fetch and reprocess. Failures are reported to subscribers, never
    /// returned, so a render loop can call this freely.
    pub async fn hot_reload(&mut self) -> bool {
        match self.source.fetch().await {
            Ok(raw) => match self.set_config(&raw) {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "hot reload rejected");
                    self.emit(LoaderEvent::Error(err));
                    false
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "hot reload fetch failed");
                self.emit(LoaderEvent::Error(err));
                false
            }
        }
    }

    fn process(&mut self, visibility: Visibility) -> Arc<[ProcessedLayer]> {
        let Some(document) = &self.document else {
            return self.layers.clone();
        };

        let viewport = self.viewport;
        let padding = position::mobile_settings(&viewport).cull_padding;
        let mut sorted: Vec<_> = document.layers.iter().collect();
        sorted.sort_by(|a, b| a.z.total_cmp(&b.z));

        let processed: Vec<ProcessedLayer> = sorted
            .into_iter()
            .map(|layer| {
                let absolute_position =
                    position::percentage_to_pixels(layer.position.x_pct, layer.position.y_pct, &viewport);
                let absolute_scale = position::percentage_to_scale(layer.scale.pct, &viewport);
                let is_visible = match visibility {
                    Visibility::Assume => true,
                    Visibility::Compute => {
                        let size = self
                            .texture_sizes
                            .get(&layer.image_ref.id)
                            .copied()
                            .unwrap_or(DEFAULT_TEXTURE_SIZE);
                        position::is_visible(absolute_position, absolute_scale, size, &viewport, padding)
                    }
                };
                ProcessedLayer {
                    layer: layer.clone(),
                    absolute_position,
                    absolute_scale,
                    is_visible,
                }
            })
            .collect();

        self.layers = Arc::from(processed);
        self.emit(LoaderEvent::LayersUpdated(self.layers.clone()));
        self.layers.clone()
    }

    fn emit(&self, event: LoaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networking::MemorySource;
    use serde_json::json;

    fn three_layers() -> Value {
        json!({
            "layersID": ["top", "bottom", "middle"],
            "imageRegistry": {"img": "https://cdn.example.com/a.png"},
            "layers": [
                {"id": "top", "imageRef": {"kind": "urlId", "id": "img"},
                 "position": {"xPct": 50, "yPct": 50}, "scale": {"pct": 100}, "angleDeg": 0, "z": 3},
                {"id": "bottom", "imageRef": {"kind": "urlId", "id": "img"},
                 "position": {"xPct": 0, "yPct": 0}, "scale": {"pct": 50}, "angleDeg": 90, "z": 1},
                {"id": "middle", "imageRef": {"kind": "urlId", "id": "img"},
                 "position": {"xPct": 100, "yPct": 100}, "scale": {"pct": 200}, "angleDeg": 0, "z": 2}
            ]
        })
    }

    fn loader(doc: Value) -> SceneLoader<MemorySource> {
        SceneLoader::new(Arc::new(MemorySource::new(doc)), 1920.0, 1080.0)
    }

    fn ids(layers: &[ProcessedLayer]) -> Vec<&str> {
        layers.iter().map(|l| l.id()).collect()
    }

    #[tokio::test]
    async fn test_load_sorts_by_z() {
        let mut loader = loader(three_layers());
        let layers = loader.load().await.unwrap();
        assert_eq!(ids(&layers), vec!["bottom", "middle", "top"]);
        assert!(layers.iter().all(|l| l.is_visible));
        assert_eq!(layers[2].absolute_position, common::Point::new(960.0, 540.0));
        assert_eq!(layers[0].absolute_scale, 0.5);
    }

    #[tokio::test]
    async fn test_load_notifies_subscribers() {
        let mut loader = loader(three_layers());
        let mut events = loader.subscribe();
        loader.load().await.unwrap();

        match events.recv().await.unwrap() {
            LoaderEvent::LayersUpdated(layers) => assert_eq!(layers.len(), 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_document_is_reported_and_returned() {
        let mut doc = three_layers();
        doc["layers"][0]["scale"]["pct"] = json!(0);
        let mut loader = loader(doc);
        let mut events = loader.subscribe();

        let err = loader.load().await.unwrap_err();
        assert_eq!(err.kind(), common::ErrorKind::Validation);
        assert!(matches!(events.recv().await.unwrap(), LoaderEvent::Error(_)));
        assert!(loader.document().is_none());
    }

    #[test]
    fn test_processing_is_idempotent() {
        let mut loader = loader(three_layers());
        let first = loader.set_config(&three_layers()).unwrap();
        let second = loader.set_config(&three_layers()).unwrap();
        assert_eq!(&*first, &*second);
    }

    #[test]
    fn test_update_viewport_rescales() {
        let mut loader = loader(three_layers());
        loader.set_config(&three_layers()).unwrap();

        let layers = loader.update_viewport(960.0, 540.0);
        let top = layers.iter().find(|l| l.id() == "top").unwrap();
        assert_eq!(top.absolute_position, common::Point::new(480.0, 270.0));
        assert_eq!(top.absolute_scale, 0.5);
        assert!(top.is_visible);
    }

    #[test]
    fn test_refine_visibility_notifies_and_keeps_order() {
        let mut loader = loader(three_layers());
        loader.set_config(&three_layers()).unwrap();
        let mut events = loader.subscribe();

        let mut sizes = HashMap::new();
        sizes.insert("img".to_string(), Size::new(640.0, 480.0));
        let layers = loader.refine_visibility(sizes);

        // Every valid position lies inside the viewport, so nothing is culled.
        assert_eq!(ids(&layers), vec!["bottom", "middle", "top"]);
        assert!(layers.iter().all(|l| l.is_visible));
        assert!(matches!(events.try_recv().unwrap(), LoaderEvent::LayersUpdated(_)));
    }

    #[test]
    fn test_new_config_drops_stale_texture_sizes() {
        let mut loader = loader(three_layers());
        loader.set_config(&three_layers()).unwrap();
        let mut sizes = HashMap::new();
        sizes.insert("gone".to_string(), Size::new(1.0, 1.0));
        loader.refine_visibility(sizes);

        loader.set_config(&three_layers()).unwrap();
        assert!(!loader.texture_sizes.contains_key("gone"));
    }

    #[tokio::test]
    async fn test_hot_reload_swallows_errors() {
        let source = Arc::new(MemorySource::new(three_layers()));
        let mut loader = SceneLoader::new(source.clone(), 1920.0, 1080.0);
        loader.load().await.unwrap();
        let mut events = loader.subscribe();

        source.fail_next(1);
        assert!(!loader.hot_reload().await);
        assert!(matches!(events.recv().await.unwrap(), LoaderEvent::Error(_)));
        assert_eq!(loader.layers().len(), 3);

        let mut doc = three_layers();
        doc["layers"][0]["z"] = json!(0);
        source.update(doc);
        assert!(loader.hot_reload().await);
        assert_eq!(loader.layers()[0].id(), "top");
    }
}
