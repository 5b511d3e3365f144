//! Scene viewer.
//!
//! Binds a scene document source to a compositor: loads and validates the
//! document, preloads its images, renders the layers and reapplies the
//! document when it changes.

pub mod session;

pub use session::ViewerSession;

/// Viewer version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
