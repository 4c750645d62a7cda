use std::sync::Arc;

use image::RgbImage;
use log::debug;

use crate::config::RemoteConfig;
use crate::error::RecognitionError;

use self::local::{GenerationOptions, RecognitionModel};
use self::remote::RemoteRecognizer;

pub mod local;
pub mod remote;
pub mod trocr;

/// The inference strategy for one recognition call.
///
/// A resolvable remote configuration always takes precedence over a local
/// model. This is a static policy, not a fallback chain: once resolved, a
/// failure on the chosen path propagates instead of trying the other one.
pub enum InferencePath {
    Remote(RemoteRecognizer),
    Local(Arc<dyn RecognitionModel>),
}

impl InferencePath {
    pub fn resolve(
        remote: Option<RemoteConfig>,
        local: Option<Arc<dyn RecognitionModel>>,
    ) -> Result<Self, RecognitionError> {
        if let Some(config) = remote.filter(RemoteConfig::is_resolvable) {
            return Ok(Self::Remote(RemoteRecognizer::new(config)));
        }

        match local {
            Some(model) => Ok(Self::Local(model)),
            None => Err(RecognitionError::NoInferencePath),
        }
    }

    pub fn recognize(&self, image: &RgbImage) -> Result<String, RecognitionError> {
        match self {
            Self::Remote(recognizer) => recognizer.infer(image),
            Self::Local(model) => {
                local::infer(model.as_ref(), image, &GenerationOptions::default())
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Local(_) => "local",
        }
    }
}

/// Resolves an inference path from the injected configuration and runs one
/// recognition with it.
pub fn recognize(
    image: &RgbImage,
    remote: Option<RemoteConfig>,
    local: Option<Arc<dyn RecognitionModel>>,
) -> Result<String, RecognitionError> {
    let path = InferencePath::resolve(remote, local)?;
    debug!("recognizing over the {} path", path.describe());
    path.recognize(image)
}
