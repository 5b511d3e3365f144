//! Adaptive layered compositor.
//!
//! The compositor draws processed scene layers as pooled sprites and keeps
//! the frame rate up by adapting quality to:
//! - the device class and tier
//! - measured frame performance and memory pressure
//! - render failures, through a recovery controller

pub mod compositor;
pub mod config;
pub mod device;
pub mod memory;
pub mod performance;
pub mod pool;
pub mod recovery;

pub use self::compositor::{Compositor, CompositorCommand, CompositorStats, PassReport};
pub use config::CompositorConfig;
pub use device::{DeviceHints, DeviceProfile, RenderSettings};
pub use memory::{MemoryProbe, MemoryUsage};
pub use performance::{DegradationReport, PerformanceMetrics, PerformanceMonitor};
pub use pool::{HandlePool, PoolStats};
pub use recovery::{
    classify, DegradationSettings, ErrorReport, RecoveryController, RecoveryOutcome, RecoveryState,
    RecoveryStrategy,
};
