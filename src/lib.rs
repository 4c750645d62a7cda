//! Handwritten mathematical-expression recognition.
//!
//! A captured image is normalized, dispatched to a local ONNX model or a
//! remote inference service, and the resulting markup can be scored against
//! a reference string.

pub mod config;
pub mod error;
pub mod export;
pub mod metrics;
pub mod model_cache;
pub mod preprocess;
pub mod recognizer;

pub use error::{RecognitionError, RemoteError};
