//! Scene documents and their transformation into positioned layers.
//!
//! This crate handles:
//! - The typed scene model (layers, image registry, viewport info)
//! - Validation of raw scene documents
//! - Percentage-to-pixel mapping and culling tests
//! - Loading, reprocessing and hot-reloading a document

pub mod loader;
pub mod model;
pub mod position;
pub mod validator;

pub use loader::{LoaderEvent, SceneLoader};
pub use model::{
    ImageRef, ImageRefKind, Layer, LoadingProgress, MobileSettings, Position, ProcessedLayer,
    Scale, SceneDocument, ValidationResult, ViewportInfo,
};
pub use position::ViewportClass;
pub use validator::validate;
