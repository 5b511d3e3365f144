//! Common utilities and types shared across the compositor workspace.

pub mod error;
pub mod geometry;

pub use error::{CompositorError, CompositorResult, ErrorKind};
pub use geometry::{Point, Rect, Size};
