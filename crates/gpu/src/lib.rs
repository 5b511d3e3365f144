//! Host drawing-layer abstraction.
//!
//! The compositor never talks to a graphics API directly. It drives:
//! - a [`Surface`], the host drawing surface that gets created, resized and destroyed
//! - a [`SceneGraph`], the 2D scene-graph/texture library that owns textures and
//!   sprites and exposes per-sprite transform, visibility and z-order
//!
//! [`headless`] provides an in-memory implementation of both.

pub mod graph;
pub mod headless;
pub mod surface;
pub mod texture;

pub use graph::{SceneGraph, SpriteId, SpriteState};
pub use headless::{HeadlessGraph, HeadlessSurface};
pub use surface::{Surface, SurfaceOptions};
pub use texture::{ImageData, TextureHandle, TextureId};
