//! Percentage-to-pixel transforms, viewport fitting and culling.

use crate::model::ViewportInfo;
use common::{Point, Rect, Size};

/// Width of the resolution scene documents are authored against.
pub const BASE_WIDTH: f32 = 1920.0;
/// Height of the resolution scene documents are authored against.
pub const BASE_HEIGHT: f32 = 1080.0;
/// Texture size assumed for culling before real sizes are known.
pub const DEFAULT_TEXTURE_SIZE: Size = Size::new(100.0, 100.0);

/// Fit the 16:9 base resolution into a container.
///
/// A container wider than 16:9 is fitted to its height, anything else to
/// its width.
pub fn viewport_info(container_width: f32, container_height: f32) -> ViewportInfo {
    if container_width / container_height > BASE_WIDTH / BASE_HEIGHT {
        let scale = container_height / BASE_HEIGHT;
        ViewportInfo {
            width: BASE_WIDTH * scale,
            height: container_height,
            scale,
        }
    } else {
        let scale = container_width / BASE_WIDTH;
        ViewportInfo {
            width: container_width,
            height: BASE_HEIGHT * scale,
            scale,
        }
    }
}

pub fn percentage_to_pixels(x_pct: f32, y_pct: f32, viewport: &ViewportInfo) -> Point {
    Point::new(x_pct / 100.0 * viewport.width, y_pct / 100.0 * viewport.height)
}

pub fn percentage_to_scale(pct: f32, viewport: &ViewportInfo) -> f32 {
    pct / 100.0 * viewport.scale
}

/// Whether a centre-anchored sprite, grown by `padding` on every side,
/// touches the viewport at all.
pub fn is_visible(
    position: Point,
    scale: f32,
    texture: Size,
    viewport: &ViewportInfo,
    padding: f32,
) -> bool {
    let sprite = Rect::from_center(
        position,
        Size::new(texture.width * scale, texture.height * scale),
    )
    .inflate(padding);
    let bounds = Rect::new(0.0, 0.0, viewport.width, viewport.height);
    sprite.intersects(&bounds)
}

/// Coarse device class from the fitted viewport width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewportClass {
    Mobile,
    Tablet,
    Desktop,
}

impl ViewportClass {
    pub fn from_width(width: f32) -> Self {
        if width < 768.0 {
            ViewportClass::Mobile
        } else if width < 1024.0 {
            ViewportClass::Tablet
        } else {
            ViewportClass::Desktop
        }
    }
}

/// Culling parameters for a viewport class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportClassSettings {
    pub cull_padding: f32,
    pub max_layers: usize,
    pub min_scale: f32,
}

pub fn mobile_settings(viewport: &ViewportInfo) -> ViewportClassSettings {
    match ViewportClass::from_width(viewport.width) {
        ViewportClass::Mobile => ViewportClassSettings {
            cull_padding: 50.0,
            max_layers: 30,
            min_scale: 0.3,
        },
        ViewportClass::Tablet => ViewportClassSettings {
            cull_padding: 75.0,
            max_layers: 50,
            min_scale: 0.5,
        },
        ViewportClass::Desktop => ViewportClassSettings {
            cull_padding: 100.0,
            max_layers: 100,
            min_scale: 0.5,
        },
    }
}
