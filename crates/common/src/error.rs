//! Common error types.
//!
//! Every failure carries its category from the point where it is raised, so
//! recovery code can match on [`ErrorKind`] instead of inspecting messages.

use thiserror::Error;

/// Main error type for the compositor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The category of a [`CompositorError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Load,
    Timeout,
    Validation,
    Parse,
    Render,
    Surface,
    Memory,
    Cancelled,
    Internal,
}

pub type CompositorResult<T> = Result<T, CompositorError>;

impl CompositorError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn surface(msg: impl Into<String>) -> Self {
        Self::Surface(msg.into())
    }

    pub fn memory(msg: impl Into<String>) -> Self {
        Self::Memory(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The category this error was raised with.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Load(_) => ErrorKind::Load,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Render(_) => ErrorKind::Render,
            Self::Surface(_) => ErrorKind::Surface,
            Self::Memory(_) => ErrorKind::Memory,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for CompositorError {
    fn from(err: std::io::Error) -> Self {
        Self::Load(err.to_string())
    }
}

impl From<serde_json::Error> for CompositorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
