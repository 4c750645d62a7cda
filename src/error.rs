use std::path::PathBuf;

use thiserror::Error;

/// Classified failure of a recognition call.
///
/// Every error surfaces to the immediate caller; nothing in the core retries
/// or recovers on its own.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("input image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("no usable inference path: configure a remote endpoint or provide a local model")]
    NoInferencePath,

    #[error("model `{0}` is missing from the model configuration")]
    UnknownModel(String),

    #[error("could not load local model from `{path}`: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("local inference failed: {0}")]
    Inference(String),

    #[error("image encoding failed")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure categories of the remote inference service.
///
/// `Unavailable` is the one condition the caller may reasonably retry after
/// a delay; the core itself never does.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("the remote model is still loading (HTTP 503), retry in a few seconds")]
    Unavailable,

    #[error("the inference service rejected the API token (HTTP 401)")]
    Unauthorized,

    #[error("the inference service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("timed out waiting for the inference service")]
    Timeout,

    #[error("could not reach the inference service")]
    Transport(#[source] attohttpc::Error),
}
