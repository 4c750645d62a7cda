use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use mathocr::config::{AppConfig, ConfigFile, ModelsConfig, RemoteConfig};
use mathocr::model_cache::{self, ModelCache};
use mathocr::preprocess::{preprocess, PreprocessOptions};
use mathocr::recognizer::local::RecognitionModel;
use mathocr::recognizer::InferencePath;
use mathocr::{export, metrics};

#[derive(Parser, Debug)]
#[command(name = "mathocr")]
#[command(about = "Recognize handwritten mathematical expressions from images")]
struct Args {
    /// Image file containing the handwritten expression
    image: PathBuf,

    /// Model key from models.json, overriding the configured default
    #[arg(short, long)]
    model: Option<String>,

    /// Ground-truth markup to score the prediction against
    #[arg(short, long)]
    reference: Option<String>,

    /// Invert colors when the background turns out to be dark
    #[arg(long)]
    invert: bool,

    /// Binarize before recognition
    #[arg(long)]
    binarize: bool,

    /// Fixed binarization threshold; 0 picks one automatically
    #[arg(long, default_value_t = 0)]
    threshold: u8,

    /// Write the result to a text file
    #[arg(short, long)]
    export: Option<PathBuf>,
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load().context("Could not load main configuration file")?;

    let image = image::open(&args.image)
        .with_context(|| format!("Could not open image `{}`", args.image.display()))?;

    let options = PreprocessOptions {
        auto_invert: args.invert,
        binarize: args.binarize,
        binarize_threshold: args.threshold,
    };
    let normalized = preprocess(&image, options)?;

    let remote = config.remote.clone().filter(RemoteConfig::is_resolvable);
    let local = if remote.is_none() {
        load_local_model(&args, &config)?
    } else {
        None
    };

    let path = InferencePath::resolve(remote, local)?;
    info!("using the {} inference path", path.describe());

    let markup = path.recognize(&normalized)?;
    println!("{markup}");

    if let Some(reference) = &args.reference {
        let report = metrics::score(&markup, reference);
        println!("edit distance: {}", report.edit_distance);
        println!("CER: {:.4}", report.cer);
        println!("exact match: {}", report.exact_match);
    }

    if let Some(destination) = &args.export {
        std::fs::write(destination, export::render_txt_bytes(&markup))
            .with_context(|| format!("Could not write result to `{}`", destination.display()))?;
        info!("result written to {}", destination.display());
    }

    Ok(())
}

/// Resolves the configured model key to a loaded handle, or `None` when the
/// model is unknown or not materialized on disk; the router then reports the
/// missing inference path.
fn load_local_model(args: &Args, config: &AppConfig) -> Result<Option<Arc<dyn RecognitionModel>>> {
    let models = ModelsConfig::load().context("Could not load model configuration file")?;
    let key = args.model.as_deref().unwrap_or(&config.default_model);

    let entry = match models.entry(key) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("{e}");
            return Ok(None);
        }
    };

    if !model_cache::model_ready(&entry.path) {
        warn!(
            "model `{}` ({}) is not materialized at {}",
            key,
            entry.name,
            entry.path.display()
        );
        return Ok(None);
    }

    let cache = ModelCache::new();
    Ok(Some(cache.get(&entry.path)?))
}
