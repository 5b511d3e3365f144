//! Compositor configuration.

use crate::device::DeviceHints;
use std::time::Duration;

/// Compositor configuration.
#[derive(Clone, Debug)]
pub struct CompositorConfig {
    /// Container width in pixels.
    pub width: u32,
    /// Container height in pixels.
    pub height: u32,
    /// Initial cap on pooled render handles.
    pub max_pool_size: usize,
    /// Retry attempts before a load error is surfaced.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_delay: Duration,
    /// Per-image load timeout.
    pub asset_timeout: Duration,
    /// Frames between pool tuning and cache-pressure passes.
    pub maintenance_interval: u64,
    /// Host capability hints used to classify the device.
    pub device_hints: DeviceHints,
    /// Start in low-power mode.
    pub low_power: bool,
    /// Scene document poll interval for hot reload.
    pub poll_interval: Duration,
    /// Sample host memory for the performance monitor.
    pub sample_memory: bool,
}

impl CompositorConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic configuration for offscreen rendering: base resolution
    /// and fixed high-end device hints.
    pub fn headless() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_hints: DeviceHints::fixed(8, 8.0),
            sample_memory: false,
            ..Self::default()
        }
    }

    /// Configuration for constrained hardware.
    pub fn low_end() -> Self {
        Self {
            device_hints: DeviceHints::fixed(2, 2.0),
            low_power: true,
            ..Self::default()
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_device_hints(mut self, hints: DeviceHints) -> Self {
        self.device_hints = hints;
        self
    }

    pub fn with_low_power(mut self, enabled: bool) -> Self {
        self.low_power = enabled;
        self
    }

    pub fn with_maintenance_interval(mut self, frames: u64) -> Self {
        self.maintenance_interval = frames.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_pool_size: crate::pool::DEFAULT_MAX_POOL_SIZE,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            asset_timeout: cache::DEFAULT_LOAD_TIMEOUT,
            maintenance_interval: 300,
            device_hints: DeviceHints::detect(),
            low_power: false,
            poll_interval: networking::DEFAULT_POLL_INTERVAL,
            sample_memory: true,
        }
    }
}
