//! Scene model types.

use crate::validator;
use common::{CompositorError, CompositorResult, Point};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Image id used by the built-in fallback scene.
pub const PLACEHOLDER_IMAGE_ID: &str = "placeholder";

/// Location of the built-in placeholder image. The texture cache serves
/// `builtin:` locations from memory.
pub const PLACEHOLDER_IMAGE_URL: &str = "builtin:placeholder";

/// A declarative scene: the layers plus the images they reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDocument {
    #[serde(rename = "layersID")]
    pub layers_id: Vec<String>,
    pub image_registry: IndexMap<String, String>,
    pub layers: Vec<Layer>,
}

impl SceneDocument {
    /// Validate a raw document and convert it to the typed model.
    ///
    /// Warnings are returned alongside the document; any error is fatal.
    pub fn from_value(raw: &Value) -> CompositorResult<(Self, Vec<String>)> {
        let result = validator::validate(raw);
        if !result.is_valid {
            return Err(CompositorError::validation(result.errors.join("; ")));
        }
        let document = serde_json::from_value(raw.clone())
            .map_err(|e| CompositorError::validation(e.to_string()))?;
        Ok((document, result.warnings))
    }

    /// Minimal scene with a single centred placeholder layer.
    pub fn fallback() -> Self {
        let mut image_registry = IndexMap::new();
        image_registry.insert(PLACEHOLDER_IMAGE_ID.to_string(), PLACEHOLDER_IMAGE_URL.to_string());

        Self {
            layers_id: vec!["fallback".to_string()],
            image_registry,
            layers: vec![Layer {
                id: "fallback".to_string(),
                image_ref: ImageRef {
                    kind: ImageRefKind::UrlId,
                    id: PLACEHOLDER_IMAGE_ID.to_string(),
                },
                position: Position { x_pct: 50.0, y_pct: 50.0 },
                scale: Scale { pct: 100.0 },
                angle_deg: 0.0,
                z: 0.0,
            }],
        }
    }
}

/// One positioned, scaled, rotated drawable unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub image_ref: ImageRef,
    pub position: Position,
    pub scale: Scale,
    pub angle_deg: f32,
    /// Paint-order key, ascending.
    pub z: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub kind: ImageRefKind,
    pub id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageRefKind {
    #[serde(rename = "urlId")]
    UrlId,
}

impl ImageRefKind {
    pub const TAG: &'static str = "urlId";
}

/// Position in percent of the viewport, both axes in `[0, 100]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x_pct: f32,
    pub y_pct: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub pct: f32,
}

/// A layer resolved against the current viewport.
///
/// Textures and render handles are not stored here: the texture cache owns
/// textures by image id and the handle pool owns handles by layer id.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedLayer {
    #[serde(flatten)]
    pub layer: Layer,
    pub absolute_position: Point,
    pub absolute_scale: f32,
    pub is_visible: bool,
}

impl ProcessedLayer {
    pub fn id(&self) -> &str {
        &self.layer.id
    }

    pub fn image_id(&self) -> &str {
        &self.layer.image_ref.id
    }
}

/// The fitted viewport against the 1920×1080 base resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ViewportInfo {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Quality settings for the current device.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileSettings {
    pub max_layers: usize,
    pub target_fps: u32,
    pub cull_padding: f32,
    pub texture_scale: f32,
    pub enable_low_power_mode: bool,
    pub batch_size: usize,
    pub memory_limit_gb: f32,
}

/// Asset preload progress.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadingProgress {
    pub loaded: usize,
    pub total: usize,
    pub percentage: f32,
    pub current_image: Option<String>,
}

impl LoadingProgress {
    pub fn new(loaded: usize, total: usize, current_image: Option<String>) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            loaded as f32 / total as f32 * 100.0
        };
        Self {
            loaded,
            total,
            percentage,
            current_image,
        }
    }
}
