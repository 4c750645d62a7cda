use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::info;

use crate::error::RecognitionError;
use crate::recognizer::local::RecognitionModel;
use crate::recognizer::trocr::TrocrModel;

type Loader = Box<dyn Fn(&Path) -> Result<Arc<dyn RecognitionModel>> + Send + Sync>;

/// Process-wide cache of loaded model handles, keyed by model directory.
///
/// A handle is created on first use and reused for the lifetime of the
/// process; there is no eviction. The loader is injectable so tests can
/// populate the cache without real model files.
pub struct ModelCache {
    loader: Loader,
    loaded: Mutex<HashMap<PathBuf, Arc<dyn RecognitionModel>>>,
}

impl ModelCache {
    /// Cache backed by the ONNX loader.
    pub fn new() -> Self {
        Self::with_loader(|path| {
            TrocrModel::load(path).map(|m| Arc::new(m) as Arc<dyn RecognitionModel>)
        })
    }

    pub fn with_loader(
        loader: impl Fn(&Path) -> Result<Arc<dyn RecognitionModel>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            loader: Box::new(loader),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the handle for `path`, loading it on first use.
    ///
    /// The cache lock is held across the load, so concurrent callers asking
    /// for the same path wait for a single load instead of racing.
    pub fn get(&self, path: &Path) -> Result<Arc<dyn RecognitionModel>, RecognitionError> {
        let mut loaded = self.loaded.lock().unwrap();

        if let Some(model) = loaded.get(path) {
            return Ok(Arc::clone(model));
        }

        info!("loading model from {}", path.display());
        let model = (self.loader)(path).map_err(|e| RecognitionError::ModelLoad {
            path: path.to_path_buf(),
            message: format!("{e:#}"),
        })?;

        loaded.insert(path.to_path_buf(), Arc::clone(&model));
        Ok(model)
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a model directory has been materialized by the asset-acquisition
/// step. An unready directory is not an error here; the router reports the
/// missing path if nothing else is configured.
pub fn model_ready(path: &Path) -> bool {
    ["encoder_model.onnx", "decoder_model.onnx", "tokenizer.json"]
        .iter()
        .all(|file| path.join(file).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use ndarray::{Array2, Array3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel;

    impl RecognitionModel for CountingModel {
        fn start_token(&self) -> u32 {
            0
        }

        fn end_token(&self) -> u32 {
            1
        }

        fn encode_image(&self, _pixels: &Array3<f32>) -> Result<Array2<f32>> {
            Ok(Array2::zeros((1, 1)))
        }

        fn next_token_scores(&self, _features: &Array2<f32>, _prefix: &[u32]) -> Result<Vec<f32>> {
            Ok(vec![0.0, 0.0])
        }

        fn decode_text(&self, _tokens: &[u32]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn loads_each_path_exactly_once() {
        static LOADS: AtomicUsize = AtomicUsize::new(0);

        let cache = ModelCache::with_loader(|_| {
            LOADS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingModel) as _)
        });

        let a = cache.get(Path::new("models/a")).unwrap();
        let again = cache.get(Path::new("models/a")).unwrap();
        cache.get(Path::new("models/b")).unwrap();

        assert_eq!(LOADS.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[test]
    fn loader_failure_is_classified() {
        let cache = ModelCache::with_loader(|_| Err(anyhow!("corrupt weights")));
        let Err(error) = cache.get(Path::new("models/broken")) else {
            panic!("expected loader failure to surface as an error");
        };
        assert!(matches!(
            error,
            RecognitionError::ModelLoad { ref message, .. } if message.contains("corrupt weights")
        ));
    }

    #[test]
    fn unmaterialized_directory_is_not_ready() {
        assert!(!model_ready(Path::new("does/not/exist")));
    }
}
