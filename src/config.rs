use std::{collections::HashMap, fs::File, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::RecognitionError;

pub trait ConfigFile: Serialize + DeserializeOwned + Default {
    fn path() -> &'static str;

    /// Loads a configuration file, or creates a default configuration struct if the file does not exist.
    fn load() -> Result<Self> {
        let mut config_path = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find suitable config directory"))?;
        config_path.push(env!("CARGO_PKG_NAME"));
        config_path.push(Self::path());

        if !config_path.exists() {
            Ok(Self::default())
        } else {
            let file = File::open(&config_path).with_context(|| {
                format!(
                    "Could not open configuration file: `{}`",
                    config_path.display()
                )
            })?;

            let config = serde_json::from_reader(file).with_context(|| {
                format!(
                    "Could not read configuration file: `{}`",
                    config_path.display(),
                )
            })?;

            Ok(config)
        }
    }

    fn save(&self) -> Result<()> {
        let mut config_path = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find suitable config directory"))?;
        config_path.push(env!("CARGO_PKG_NAME"));
        config_path.push(Self::path());

        let mut config_dir = config_path.clone();
        config_dir.pop();
        std::fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "Could not create configuration directory: `{}`",
                config_dir.display()
            )
        })?;

        let file = File::create(&config_path).with_context(|| {
            format!(
                "Could not write to configuration file: `{}`",
                config_path.display()
            )
        })?;

        serde_json::to_writer_pretty(file, self).with_context(|| {
            format!(
                "Could not serialise configuration file: `{}`",
                config_path.display()
            )
        })?;

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Key into `models.json` used when no model is named on the command line.
    pub default_model: String,
    /// Remote inference service; takes precedence over local models when resolvable.
    pub remote: Option<RemoteConfig>,
}

impl ConfigFile for AppConfig {
    fn path() -> &'static str {
        "config.json"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: "trocr-hme".to_owned(),
            remote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub service_root: String,
    pub model_name: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            service_root: "https://api-inference.huggingface.co".to_owned(),
            model_name: String::new(),
            api_token: None,
        }
    }
}

impl RemoteConfig {
    /// A remote configuration only counts once both the endpoint root and the
    /// model name are filled in.
    pub fn is_resolvable(&self) -> bool {
        !self.service_root.trim().is_empty() && !self.model_name.trim().is_empty()
    }
}

/// Catalogue of locally available models, keyed by a short identifier.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelsConfig {
    pub models: HashMap<String, ModelEntry>,
}

impl ConfigFile for ModelsConfig {
    fn path() -> &'static str {
        "models.json"
    }
}

impl ModelsConfig {
    pub fn entry(&self, key: &str) -> Result<&ModelEntry, RecognitionError> {
        self.models
            .get(key)
            .ok_or_else(|| RecognitionError::UnknownModel(key.to_owned()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metrics: Option<ModelMetrics>,
}

/// Evaluation numbers reported for a trained checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub exp_rate_2: f64,
    pub cer: f64,
    pub avg_edit_distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_config_parses_catalogue() {
        let raw = r#"{
            "trocr-hme": {
                "name": "TrOCR fine-tuned on handwritten math",
                "path": "models/trocr-hme",
                "description": "5 epochs",
                "metrics": { "exp_rate_2": 0.61, "cer": 0.089, "avg_edit_distance": 2.4 }
            },
            "trocr-base": { "name": "TrOCR base", "path": "models/trocr-base" }
        }"#;

        let config: ModelsConfig = serde_json::from_str(raw).unwrap();
        let entry = config.entry("trocr-hme").unwrap();
        assert_eq!(entry.path, PathBuf::from("models/trocr-hme"));
        assert_eq!(entry.metrics.unwrap().exp_rate_2, 0.61);
        assert!(config.entry("trocr-base").unwrap().metrics.is_none());
    }

    #[test]
    fn missing_model_key_is_a_configuration_error() {
        let config = ModelsConfig::default();
        assert!(matches!(
            config.entry("nope"),
            Err(RecognitionError::UnknownModel(key)) if key == "nope"
        ));
    }

    #[test]
    fn remote_config_resolvable_requires_both_fields() {
        let mut remote = RemoteConfig::default();
        assert!(!remote.is_resolvable());
        remote.model_name = "user/trocr-hme".to_owned();
        assert!(remote.is_resolvable());
        remote.service_root = "  ".to_owned();
        assert!(!remote.is_resolvable());
    }
}
