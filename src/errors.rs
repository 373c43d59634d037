use std::path::PathBuf;
use thiserror::Error;

use crate::traits::PluginState;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the auto-labeling plugins.
///
/// Each variant captures the context of its failure domain (plugin lifecycle,
/// per-instance post-processing, backend runtime, configuration) so that hosts
/// can react to the kind of failure without parsing messages. `Load` and
/// `NotLoaded` are lifecycle errors; `Inference` aborts a single `predict`
/// call and leaves the plugin usable.
#[derive(Error, Debug)]
pub enum AutoLabelError {
    #[error("Load error: model `{model_id}` could not be loaded: {reason}")]
    Load {
        model_id: String,
        reason: String,
        #[source]
        source: Option<BoxedError>,
    },

    #[error("Model `{model_id}` is not loaded (state: {state:?})")]
    NotLoaded {
        model_id: String,
        state: PluginState,
    },

    #[error("Inference error: {operation} failed for instance {index}")]
    Inference {
        index: usize,
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Unknown model: `{model_id}`")]
    UnknownModel { model_id: String },
}

pub type Result<T> = std::result::Result<T, AutoLabelError>;

impl AutoLabelError {
    pub fn load(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            model_id: model_id.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn inference(
        index: usize,
        operation: impl Into<String>,
        source: impl Into<BoxedError>,
    ) -> Self {
        Self::Inference {
            index,
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Load { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Callers that know the path and operation should build
/// `AutoLabelError::FileSystem` directly.
impl From<std::io::Error> for AutoLabelError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for AutoLabelError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for AutoLabelError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor decoding and mask conversion, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for AutoLabelError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<config::ConfigError> for AutoLabelError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}
