//! The scene-graph/texture library contract.

use crate::texture::{ImageData, TextureHandle, TextureId};
use common::{CompositorResult, Point};

/// Identifier of a drawable sprite node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteId(pub u64);

/// Visual state of a sprite.
#[derive(Clone, Debug, PartialEq)]
pub struct SpriteState {
    pub texture: TextureId,
    pub position: Point,
    pub anchor: Point,
    pub scale: f32,
    /// Rotation in radians.
    pub rotation: f32,
    pub alpha: f32,
    pub visible: bool,
    pub z_index: f32,
}

impl SpriteState {
    /// Neutral state: centred anchor, unit scale, no rotation, fully opaque.
    pub fn neutral(texture: TextureId) -> Self {
        Self {
            texture,
            position: Point::ZERO,
            anchor: Point::new(0.5, 0.5),
            scale: 1.0,
            rotation: 0.0,
            alpha: 1.0,
            visible: false,
            z_index: 0.0,
        }
    }
}

/// A 2D scene-graph/texture library provided by the host.
///
/// Sprites are attached to a single root container whose child order is the
/// paint order. The root container itself can be positioned and scaled.
pub trait SceneGraph: Send + Sync {
    /// Upload decoded image data as a texture.
    fn create_texture(&self, image: &ImageData) -> CompositorResult<TextureHandle>;

    /// Release a texture's native resources.
    fn destroy_texture(&self, texture: &TextureHandle);

    /// Create a detached sprite showing `texture`.
    fn create_sprite(&self, texture: &TextureHandle) -> CompositorResult<SpriteId>;

    /// Detach and release a sprite.
    fn destroy_sprite(&self, sprite: SpriteId);

    /// Current state of a sprite.
    fn sprite_state(&self, sprite: SpriteId) -> Option<SpriteState>;

    /// Replace a sprite's visual state.
    fn update_sprite(&self, sprite: SpriteId, state: &SpriteState) -> CompositorResult<()>;

    /// Append a sprite to the root container. No-op if already attached.
    fn attach(&self, sprite: SpriteId);

    /// Remove a sprite from the root container.
    fn detach(&self, sprite: SpriteId);

    fn is_attached(&self, sprite: SpriteId) -> bool;

    /// Children of the root container in paint order.
    fn children(&self) -> Vec<SpriteId>;

    /// Position and scale the root container.
    fn set_root_transform(&self, position: Point, scale: f32);
}
