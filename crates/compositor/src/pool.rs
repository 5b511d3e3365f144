//! Reusable render handles.
//!
//! Each layer id owns at most one sprite while it is in the scene. Sprites
//! released by layers that left the scene go back to the pool, reset to a
//! neutral state, until the pool reaches its cap.

use common::CompositorResult;
use gpu::{SceneGraph, SpriteId, SpriteState, TextureHandle, TextureId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_MAX_POOL_SIZE: usize = 150;

const RESIZE_STEP: usize = 25;
const POOL_CEILING: usize = 500;
const POOL_FLOOR: usize = 50;

#[derive(Clone, Copy, Debug)]
struct ActiveHandle {
    sprite: SpriteId,
    texture: TextureId,
    z: f32,
}

/// Pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoolStats {
    pub active: usize,
    pub available: usize,
    pub max_pool_size: usize,
    pub created: usize,
    pub disposed: usize,
}

pub struct HandlePool {
    graph: Arc<dyn SceneGraph>,
    active: HashMap<String, ActiveHandle>,
    available: Vec<SpriteId>,
    max_pool_size: usize,
    created: usize,
    disposed: usize,
}

impl HandlePool {
    pub fn new(graph: Arc<dyn SceneGraph>, max_pool_size: usize) -> Self {
        Self {
            graph,
            active: HashMap::new(),
            available: Vec::new(),
            max_pool_size,
            created: 0,
            disposed: 0,
        }
    }

    /// The sprite owned by `layer_id`, showing `texture`.
    ///
    /// Reuses the layer's current sprite, then a pooled one, and creates a
    /// new sprite only when the pool is empty.
    pub fn acquire(&mut self, layer_id: &str, texture: &TextureHandle) -> CompositorResult<SpriteId> {
        if let Some(handle) = self.active.get_mut(layer_id) {
            if handle.texture != texture.id {
                let mut state = self
                    .graph
                    .sprite_state(handle.sprite)
                    .unwrap_or_else(|| SpriteState::neutral(texture.id));
                state.texture = texture.id;
                self.graph.update_sprite(handle.sprite, &state)?;
                handle.texture = texture.id;
            }
            return Ok(handle.sprite);
        }

        let sprite = match self.available.pop() {
            Some(sprite) => {
                if let Err(err) = self.graph.update_sprite(sprite, &SpriteState::neutral(texture.id)) {
                    self.available.push(sprite);
                    return Err(err);
                }
                sprite
            }
            None => {
                let sprite = self.graph.create_sprite(texture)?;
                self.created += 1;
                sprite
            }
        };

        self.active.insert(
            layer_id.to_string(),
            ActiveHandle {
                sprite,
                texture: texture.id,
                z: 0.0,
            },
        );
        Ok(sprite)
    }

    pub fn sprite_for(&self, layer_id: &str) -> Option<SpriteId> {
        self.active.get(layer_id).map(|handle| handle.sprite)
    }

    /// Record the z used to order `layer_id` on the next [`resort`](Self::resort).
    pub fn set_z(&mut self, layer_id: &str, z: f32) {
        if let Some(handle) = self.active.get_mut(layer_id) {
            handle.z = z;
        }
    }

    /// Detach the layer's sprite and return it to the pool, or dispose of it
    /// when the pool is full.
    pub fn release(&mut self, layer_id: &str) -> bool {
        let Some(handle) = self.active.remove(layer_id) else {
            return false;
        };

        self.graph.detach(handle.sprite);
        let reset = self
            .graph
            .update_sprite(handle.sprite, &SpriteState::neutral(handle.texture));

        if reset.is_ok() && self.available.len() < self.max_pool_size {
            self.available.push(handle.sprite);
        } else {
            self.graph.destroy_sprite(handle.sprite);
            self.disposed += 1;
        }
        true
    }

    /// Release every handle whose layer is no longer in `current`.
    pub fn reconcile(&mut self, current: &HashSet<&str>) -> usize {
        let stale: Vec<String> = self
            .active
            .keys()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();

        for layer_id in &stale {
            self.release(layer_id);
        }
        if !stale.is_empty() {
            tracing::trace!(released = stale.len(), "released handles for removed layers");
        }
        stale.len()
    }

    /// Re-insert attached sprites into the root container in ascending z.
    /// Ties keep layer id order so the result is stable.
    pub fn resort(&self) {
        let mut attached: Vec<(&String, &ActiveHandle)> = self
            .active
            .iter()
            .filter(|(_, handle)| self.graph.is_attached(handle.sprite))
            .collect();
        attached.sort_by(|a, b| a.1.z.total_cmp(&b.1.z).then_with(|| a.0.cmp(b.0)));

        for (_, handle) in &attached {
            self.graph.detach(handle.sprite);
        }
        for (_, handle) in &attached {
            self.graph.attach(handle.sprite);
        }
    }

    /// Active handles as a fraction of the cap.
    pub fn utilization(&self) -> f32 {
        if self.max_pool_size == 0 {
            return 1.0;
        }
        self.active.len() as f32 / self.max_pool_size as f32
    }

    /// Grow the cap under pressure, shrink it when mostly idle. Returns true
    /// if the cap changed.
    pub fn tune(&mut self) -> bool {
        let utilization = self.utilization();
        let previous = self.max_pool_size;

        if utilization > 0.8 {
            self.max_pool_size = (self.max_pool_size + RESIZE_STEP).min(POOL_CEILING);
        } else if utilization < 0.4 && self.max_pool_size > POOL_FLOOR {
            self.max_pool_size = self.max_pool_size.saturating_sub(RESIZE_STEP).max(POOL_FLOOR);
            while self.available.len() > self.max_pool_size {
                if let Some(sprite) = self.available.pop() {
                    self.graph.destroy_sprite(sprite);
                    self.disposed += 1;
                }
            }
        }

        if self.max_pool_size != previous {
            tracing::debug!(
                from = previous,
                to = self.max_pool_size,
                utilization,
                "pool cap adjusted"
            );
        }
        self.max_pool_size != previous
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.len(),
            available: self.available.len(),
            max_pool_size: self.max_pool_size,
            created: self.created,
            disposed: self.disposed,
        }
    }

    /// Dispose of every sprite, active or pooled.
    pub fn destroy(&mut self) {
        for (_, handle) in self.active.drain() {
            self.graph.destroy_sprite(handle.sprite);
            self.disposed += 1;
        }
        for sprite in self.available.drain(..) {
            self.graph.destroy_sprite(sprite);
            self.disposed += 1;
        }
    }
}
