//! In-memory scene graph and surface.
//!
//! Used by the command-line viewer's dry-run mode and by tests. Both types
//! can be told to fail so error paths can be exercised.

use crate::graph::{SceneGraph, SpriteId, SpriteState};
use crate::surface::{Surface, SurfaceOptions};
use crate::texture::{ImageData, TextureHandle, TextureId};
use common::{CompositorError, CompositorResult, Point};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct GraphState {
    next_id: u64,
    textures: HashMap<TextureId, TextureHandle>,
    sprites: HashMap<SpriteId, SpriteState>,
    children: Vec<SpriteId>,
    root_position: Point,
    root_scale: f32,
    failing_updates: usize,
    sprites_created: usize,
    sprites_destroyed: usize,
    textures_destroyed: usize,
}

/// A scene graph that only records state.
#[derive(Default)]
pub struct HeadlessGraph {
    state: Mutex<GraphState>,
}

impl HeadlessGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sprite updates fail with a render error.
    pub fn fail_updates(&self, count: usize) {
        self.state.lock().failing_updates = count;
    }

    /// Number of textures currently alive.
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Number of sprites currently alive.
    pub fn live_sprites(&self) -> usize {
        self.state.lock().sprites.len()
    }

    pub fn sprites_created(&self) -> usize {
        self.state.lock().sprites_created
    }

    pub fn sprites_destroyed(&self) -> usize {
        self.state.lock().sprites_destroyed
    }

    pub fn textures_destroyed(&self) -> usize {
        self.state.lock().textures_destroyed
    }

    pub fn root_transform(&self) -> (Point, f32) {
        let state = self.state.lock();
        (state.root_position, state.root_scale)
    }
}

impl SceneGraph for HeadlessGraph {
    fn create_texture(&self, image: &ImageData) -> CompositorResult<TextureHandle> {
        if image.width == 0 || image.height == 0 {
            return Err(CompositorError::render("cannot create an empty texture"));
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = TextureHandle {
            id: TextureId(state.next_id),
            width: image.width,
            height: image.height,
        };
        state.textures.insert(handle.id, handle.clone());
        Ok(handle)
    }

    fn destroy_texture(&self, texture: &TextureHandle) {
        let mut state = self.state.lock();
        if state.textures.remove(&texture.id).is_some() {
            state.textures_destroyed += 1;
        }
    }

    fn create_sprite(&self, texture: &TextureHandle) -> CompositorResult<SpriteId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SpriteId(state.next_id);
        state.sprites.insert(id, SpriteState::neutral(texture.id));
        state.sprites_created += 1;
        Ok(id)
    }

    fn destroy_sprite(&self, sprite: SpriteId) {
        let mut state = self.state.lock();
        state.children.retain(|child| *child != sprite);
        if state.sprites.remove(&sprite).is_some() {
            state.sprites_destroyed += 1;
        }
    }

    fn sprite_state(&self, sprite: SpriteId) -> Option<SpriteState> {
        self.state.lock().sprites.get(&sprite).cloned()
    }

    fn update_sprite(&self, sprite: SpriteId, new_state: &SpriteState) -> CompositorResult<()> {
        let mut state = self.state.lock();
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(CompositorError::render("sprite update rejected"));
        }
        match state.sprites.get_mut(&sprite) {
            Some(current) => {
                *current = new_state.clone();
                Ok(())
            }
            None => Err(CompositorError::render(format!("unknown sprite {}", sprite.0))),
        }
    }

    fn attach(&self, sprite: SpriteId) {
        let mut state = self.state.lock();
        if state.sprites.contains_key(&sprite) && !state.children.contains(&sprite) {
            state.children.push(sprite);
        }
    }

    fn detach(&self, sprite: SpriteId) {
        self.state.lock().children.retain(|child| *child != sprite);
    }

    fn is_attached(&self, sprite: SpriteId) -> bool {
        self.state.lock().children.contains(&sprite)
    }

    fn children(&self) -> Vec<SpriteId> {
        self.state.lock().children.clone()
    }

    fn set_root_transform(&self, position: Point, scale: f32) {
        let mut state = self.state.lock();
        state.root_position = position;
        state.root_scale = scale;
    }
}

/// A drawing surface that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    options: Option<SurfaceOptions>,
    size: (u32, u32),
    failing_creates: usize,
    create_attempts: usize,
    frames_presented: u64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to [`Surface::create`] fail.
    pub fn failing(count: usize) -> Self {
        Self {
            failing_creates: count,
            ..Self::default()
        }
    }

    pub fn options(&self) -> Option<&SurfaceOptions> {
        self.options.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl Surface for HeadlessSurface {
    fn create(&mut self, options: &SurfaceOptions) -> CompositorResult<()> {
        self.create_attempts += 1;
        if self.failing_creates > 0 {
            self.failing_creates -= 1;
            return Err(CompositorError::surface("context creation failed"));
        }
        tracing::debug!(width = options.width, height = options.height, "headless surface created");
        self.size = (options.width, options.height);
        self.options = Some(options.clone());
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn present(&mut self) -> CompositorResult<()> {
        if self.options.is_none() {
            return Err(CompositorError::surface("surface not created"));
        }
        self.frames_presented += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        self.options = None;
    }

    fn is_created(&self) -> bool {
        self.options.is_some()
    }
}
