//! Host drawing surface contract.

use common::CompositorResult;
use wgpu::PowerPreference;

/// Options used when creating the drawing surface.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceOptions {
    pub width: u32,
    pub height: u32,
    pub antialias: bool,
    /// Device pixel resolution multiplier.
    pub resolution: f32,
    pub power_preference: PowerPreference,
    pub background_alpha: f32,
}

impl SurfaceOptions {
    /// Fixed settings for a second initialisation attempt after a failure.
    pub fn conservative(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            antialias: false,
            resolution: 1.0,
            power_preference: PowerPreference::LowPower,
            background_alpha: 0.0,
        }
    }
}

/// The host drawing surface.
pub trait Surface: Send {
    /// Create the surface. Called again with different options after a failure.
    fn create(&mut self, options: &SurfaceOptions) -> CompositorResult<()>;

    fn resize(&mut self, width: u32, height: u32);

    /// Present the current contents of the scene graph.
    fn present(&mut self) -> CompositorResult<()>;

    fn destroy(&mut self);

    fn is_created(&self) -> bool;
}
