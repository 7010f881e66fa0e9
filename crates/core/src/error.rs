use serde::{Deserialize, Serialize};

/// Result alias that carries the custom [`CompositorError`] type.
pub type Result<T> = std::result::Result<T, CompositorError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// Malformed or unreadable input payload.
    #[error("decode error: {0}")]
    Decode(String),
    /// The payload cannot be turned into the requested kind of content.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A rendering library refused to build a program or renderer.
    #[error("backend initialisation failed: {0}")]
    BackendInit(String),
    /// Preset navigation before any preset is available.
    #[error("no presets available yet")]
    EmptyCollection,
    /// A surface or audio resource could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown layer {0}")]
    UnknownLayer(usize),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error tag handed to the UI alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    UnsupportedFormat,
    BackendInit,
    EmptyCollection,
    ResourceExhausted,
    InvalidInput,
    Other,
}

impl CompositorError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn decode<T: Into<String>>(msg: T) -> Self {
        Self::Decode(msg.into())
    }

    pub fn unsupported<T: Into<String>>(msg: T) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Decode,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::BackendInit(_) => ErrorKind::BackendInit,
            Self::EmptyCollection => ErrorKind::EmptyCollection,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::InvalidInput(_) | Self::UnknownLayer(_) => ErrorKind::InvalidInput,
            Self::Message(_) => ErrorKind::Other,
        }
    }

    /// Transient errors describe a precondition that may resolve by itself,
    /// so the same request can be retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmptyCollection)
    }
}

impl From<&str> for CompositorError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CompositorError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<image::ImageError> for CompositorError {
    fn from(value: image::ImageError) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<hound::Error> for CompositorError {
    fn from(value: hound::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
