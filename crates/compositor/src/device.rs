//! Device classification and adaptive quality settings.

use crate::memory;
use gpu::SurfaceOptions;
use scene::{MobileSettings, ViewportClass};
use wgpu::PowerPreference;

const MIN_LAYERS: usize = 5;
const MIN_TEXTURE_SCALE: f32 = 0.25;
const MEMORY_PRESSURE_PERCENT: f64 = 80.0;

/// Capabilities reported by the host. Missing values are treated as
/// unknown and never mark a device low-end on their own.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceHints {
    pub cores: Option<usize>,
    pub memory_gb: Option<f32>,
    pub pixel_ratio: f32,
}

impl DeviceHints {
    pub fn detect() -> Self {
        Self {
            cores: std::thread::available_parallelism().map(|p| p.get()).ok(),
            memory_gb: memory::system_memory_gb(),
            pixel_ratio: 1.0,
        }
    }

    pub fn fixed(cores: usize, memory_gb: f32) -> Self {
        Self {
            cores: Some(cores),
            memory_gb: Some(memory_gb),
            pixel_ratio: 1.0,
        }
    }

    pub fn unknown() -> Self {
        Self {
            cores: None,
            memory_gb: None,
            pixel_ratio: 1.0,
        }
    }

    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = ratio;
        self
    }

    /// At most 2 cores or at most 2 GiB of memory.
    pub fn is_low_end(&self) -> bool {
        self.cores.is_some_and(|cores| cores <= 2) || self.memory_gb.is_some_and(|gb| gb <= 2.0)
    }
}

impl Default for DeviceHints {
    fn default() -> Self {
        Self::detect()
    }
}

/// Options for creating the drawing surface on this device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    pub antialias: bool,
    pub resolution: f32,
    pub power_preference: PowerPreference,
    pub background_alpha: f32,
}

impl RenderSettings {
    pub fn surface_options(&self, width: u32, height: u32) -> SurfaceOptions {
        SurfaceOptions {
            width,
            height,
            antialias: self.antialias,
            resolution: self.resolution,
            power_preference: self.power_preference,
            background_alpha: self.background_alpha,
        }
    }
}

/// Upper bound imposed by [`DeviceProfile::clamp`].
#[derive(Clone, Copy, Debug, PartialEq)]
struct QualityCap {
    max_layers: usize,
    texture_scale: f32,
    low_power: bool,
}

/// Current quality settings and the ceiling they may climb back to. The
/// ceiling is the class default lowered by any clamp in force.
#[derive(Clone, Debug)]
pub struct DeviceProfile {
    class: ViewportClass,
    low_end: bool,
    hints: DeviceHints,
    settings: MobileSettings,
    ceiling: MobileSettings,
    cap: Option<QualityCap>,
}

impl DeviceProfile {
    pub fn new(viewport_width: f32, hints: DeviceHints) -> Self {
        let class = ViewportClass::from_width(viewport_width);
        let low_end = hints.is_low_end();
        let settings = class_settings(class, low_end);
        tracing::info!(?class, low_end, max_layers = settings.max_layers, "device classified");
        Self {
            class,
            low_end,
            hints,
            settings,
            ceiling: settings,
            cap: None,
        }
    }

    pub fn class(&self) -> ViewportClass {
        self.class
    }

    pub fn is_low_end(&self) -> bool {
        self.low_end
    }

    pub fn settings(&self) -> &MobileSettings {
        &self.settings
    }

    /// Re-derive the class for a new viewport width. Settings are reset to
    /// the new class defaults when the class changes; a forced low-power
    /// mode survives.
    pub fn reclassify(&mut self, viewport_width: f32) -> bool {
        let class = ViewportClass::from_width(viewport_width);
        if class == self.class {
            return false;
        }
        let low_power = self.settings.enable_low_power_mode;
        self.class = class;
        self.ceiling = class_settings(class, self.low_end);
        if let Some(cap) = self.cap {
            apply_cap(&mut self.ceiling, cap);
        }
        self.settings = self.ceiling;
        self.settings.enable_low_power_mode |= low_power;
        tracing::debug!(?class, "device class changed");
        true
    }

    pub fn render_settings(&self) -> RenderSettings {
        let low_power = self.settings.enable_low_power_mode;
        RenderSettings {
            antialias: !self.low_end && !low_power,
            resolution: if self.low_end {
                1.0
            } else {
                self.hints.pixel_ratio.clamp(1.0, 2.0)
            },
            power_preference: if low_power {
                PowerPreference::LowPower
            } else {
                PowerPreference::HighPerformance
            },
            background_alpha: 0.0,
        }
    }

    /// Step quality down when fps falls below 80% of target and back up when
    /// it exceeds 120%. Memory above 80% forces low-power mode and trims the
    /// layer budget. Returns true if any setting changed.
    pub fn adjust_for_performance(&mut self, fps: f64, memory_percent: f64) -> bool {
        let before = self.settings;
        let target = f64::from(self.settings.target_fps);

        if fps < target * 0.8 {
            self.settings.max_layers = scale_layers(self.settings.max_layers);
            self.settings.texture_scale = round_scale(self.settings.texture_scale - 0.1).max(MIN_TEXTURE_SCALE);
            self.settings.enable_low_power_mode = true;
        } else if fps > target * 1.2 {
            self.settings.max_layers = (self.settings.max_layers + 5).min(self.ceiling.max_layers);
            self.settings.texture_scale =
                round_scale(self.settings.texture_scale + 0.05).min(self.ceiling.texture_scale);
            if self.settings.max_layers == self.ceiling.max_layers
                && self.settings.texture_scale == self.ceiling.texture_scale
            {
                self.settings.enable_low_power_mode = self.ceiling.enable_low_power_mode;
            }
        }

        if memory_percent > MEMORY_PRESSURE_PERCENT {
            self.settings.enable_low_power_mode = true;
            self.settings.max_layers = scale_layers(self.settings.max_layers);
        }

        let changed = self.settings != before;
        if changed {
            tracing::debug!(
                fps,
                memory_percent,
                max_layers = self.settings.max_layers,
                texture_scale = self.settings.texture_scale,
                low_power = self.settings.enable_low_power_mode,
                "device settings adjusted"
            );
        }
        changed
    }

    /// Lower the layer budget and texture scale to at most the given values.
    /// The bound also caps later relaxation and survives reclassification.
    pub fn clamp(&mut self, max_layers: usize, texture_scale: f32, low_power: bool) {
        let cap = match self.cap {
            Some(current) => QualityCap {
                max_layers: current.max_layers.min(max_layers),
                texture_scale: current.texture_scale.min(texture_scale),
                low_power: current.low_power || low_power,
            },
            None => QualityCap {
                max_layers,
                texture_scale,
                low_power,
            },
        };
        self.cap = Some(cap);
        apply_cap(&mut self.ceiling, cap);
        apply_cap(&mut self.settings, cap);
    }

    pub fn enable_low_power_mode(&mut self, enabled: bool) {
        self.settings.enable_low_power_mode = enabled;
    }

    /// Odd frames are skipped in low-power mode.
    pub fn should_skip_frame(&self, frame: u64) -> bool {
        self.settings.enable_low_power_mode && frame % 2 == 1
    }
}

fn apply_cap(settings: &mut MobileSettings, cap: QualityCap) {
    settings.max_layers = settings.max_layers.min(cap.max_layers).max(1);
    settings.texture_scale = settings.texture_scale.min(cap.texture_scale);
    settings.enable_low_power_mode |= cap.low_power;
}

fn scale_layers(layers: usize) -> usize {
    ((layers as f32 * 0.8) as usize).max(MIN_LAYERS)
}

fn round_scale(scale: f32) -> f32 {
    (scale * 100.0).round() / 100.0
}

fn class_settings(class: ViewportClass, low_end: bool) -> MobileSettings {
    let (max_layers, target_fps, cull_padding, texture_scale, enable_low_power_mode, batch_size, memory_limit_gb) =
        match (class, low_end) {
            (ViewportClass::Mobile, true) => (20, 30, 50.0, 0.5, true, 5, 1.0),
            (ViewportClass::Mobile, false) => (35, 45, 50.0, 0.75, false, 10, 2.0),
            (ViewportClass::Tablet, true) => (40, 45, 75.0, 0.75, true, 10, 2.0),
            (ViewportClass::Tablet, false) => (60, 60, 75.0, 1.0, false, 15, 3.0),
            (ViewportClass::Desktop, true) => (75, 60, 100.0, 0.85, false, 20, 2.0),
            (ViewportClass::Desktop, false) => (150, 60, 100.0, 1.0, false, 25, 4.0),
        };
    MobileSettings {
        max_layers,
        target_fps,
        cull_padding,
        texture_scale,
        enable_low_power_mode,
        batch_size,
        memory_limit_gb,
    }
}
