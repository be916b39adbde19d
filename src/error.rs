//! Custom error types for plate-inpaint.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the plate-inpaint library.
#[derive(Error, Debug)]
pub enum Error {
    /// Uploaded bytes could not be decoded as an image.
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode the output image.
    #[error("failed to encode {format} image: {source}")]
    ImageEncode {
        format: &'static str,
        #[source]
        source: image::ImageError,
    },

    /// Image dimensions are not supported.
    #[error("unsupported image dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Failed to download a model.
    #[error("failed to download model {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Failed to load the CLIP tokenizer.
    #[error("failed to load tokenizer from {path}: {reason}")]
    TokenizerLoad { path: PathBuf, reason: String },

    /// Prompt tokenization failed.
    #[error("failed to tokenize prompt: {reason}")]
    Tokenize { reason: String },

    /// The fine-tuned UNet checkpoint cannot be used by this runtime.
    #[error("unsupported UNet checkpoint at {path}: {reason}")]
    UnsupportedCheckpoint { path: PathBuf, reason: String },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// The inpainting model is not loaded.
    #[error("Model failed to load. Check server logs.")]
    ModelUnavailable,

    /// The blocking worker running a request died.
    #[error("inference worker failed: {reason}")]
    Worker { reason: String },

    /// Failed to create cache directory.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Coarse classification of an [`Error`], reported alongside its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request carried an unusable image or parameters.
    Validation,
    /// No model is loaded.
    ModelUnavailable,
    /// Anything that failed while producing the output.
    Processing,
}

impl ErrorKind {
    /// Stable lowercase name, used in response bodies.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ModelUnavailable => "model_unavailable",
            Self::Processing => "processing",
        }
    }
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageDecode { .. }
            | Self::UnsupportedDimensions { .. }
            | Self::InvalidParameter { .. } => ErrorKind::Validation,
            Self::ModelUnavailable => ErrorKind::ModelUnavailable,
            _ => ErrorKind::Processing,
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for plate-inpaint operations.
pub type Result<T> = std::result::Result<T, Error>;
