//! ONNX backend for TrOCR-style vision-encoder-decoder checkpoints.
//!
//! Expects the standard export layout in the model directory:
//! `encoder_model.onnx`, `decoder_model.onnx` and `tokenizer.json`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array2, Array3, Axis, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokenizers::Tokenizer;

use super::local::RecognitionModel;

/// Fallback end-of-sequence id for RoBERTa-style vocabularies.
const DEFAULT_EOS: u32 = 2;

pub struct TrocrModel {
    /// Sessions are locked per call; inference is read-only but ONNX Runtime
    /// wants exclusive access while a run is in flight.
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    tokenizer: Tokenizer,
    encoder_input: String,
    eos_token: u32,
}

impl TrocrModel {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let encoder_path = model_dir.join("encoder_model.onnx");
        let decoder_path = model_dir.join("decoder_model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for path in [&encoder_path, &decoder_path, &tokenizer_path] {
            if !path.exists() {
                bail!("model file not found: {}", path.display());
            }
        }

        let encoder = build_session(&encoder_path)?;
        let decoder = build_session(&decoder_path)?;

        let encoder_input = encoder
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "pixel_values".to_owned());

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow!(
                "could not load tokenizer from {}: {e}",
                tokenizer_path.display()
            )
        })?;

        let eos_token = tokenizer.token_to_id("</s>").unwrap_or(DEFAULT_EOS);

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            tokenizer,
            encoder_input,
            eos_token,
        })
    }

    fn run_encoder(&self, pixels: &ndarray::Array3<f32>) -> Result<Array2<f32>> {
        let batched = pixels.to_owned().insert_axis(Axis(0));
        let input = Value::from_array(batched).context("failed to create pixel tensor")?;

        let mut session = self.encoder.lock().unwrap();
        let outputs = session
            .run(ort::inputs![&self.encoder_input => input])
            .context("encoder inference failed")?;

        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract encoder output")?;

        let shape = hidden.shape();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected encoder output shape: {shape:?}");
        }

        let (seq_len, dim) = (shape[1], shape[2]);
        let mut features = Array2::zeros((seq_len, dim));
        for s in 0..seq_len {
            for d in 0..dim {
                features[[s, d]] = hidden[IxDyn(&[0, s, d])];
            }
        }

        Ok(features)
    }

    fn run_decoder(&self, features: &Array2<f32>, prefix: &[u32]) -> Result<Vec<f32>> {
        let mut input_ids = Array2::<i64>::zeros((1, prefix.len()));
        for (i, &token) in prefix.iter().enumerate() {
            input_ids[[0, i]] = i64::from(token);
        }

        let (seq_len, dim) = features.dim();
        let mut encoder_states = Array3::<f32>::zeros((1, seq_len, dim));
        for s in 0..seq_len {
            for d in 0..dim {
                encoder_states[[0, s, d]] = features[[s, d]];
            }
        }

        let ids_value = Value::from_array(input_ids).context("failed to create input ids")?;
        let states_value =
            Value::from_array(encoder_states).context("failed to create encoder states")?;

        let mut session = self.decoder.lock().unwrap();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_value,
                "encoder_hidden_states" => states_value
            ])
            .context("decoder inference failed")?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract decoder logits")?;

        let shape = logits.shape();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected decoder output shape: {shape:?}");
        }

        let last = shape[1] - 1;
        let vocab_size = shape[2];
        let mut scores = vec![0.0f32; vocab_size];
        for v in 0..vocab_size {
            scores[v] = logits[IxDyn(&[0, last, v])];
        }

        log_softmax(&mut scores);
        Ok(scores)
    }
}

impl RecognitionModel for TrocrModel {
    fn start_token(&self) -> u32 {
        // The decoder is seeded with the end-of-sequence token, the standard
        // vision-encoder-decoder convention.
        self.eos_token
    }

    fn end_token(&self) -> u32 {
        self.eos_token
    }

    fn encode_image(&self, pixels: &ndarray::Array3<f32>) -> Result<Array2<f32>> {
        self.run_encoder(pixels)
    }

    fn next_token_scores(&self, features: &Array2<f32>, prefix: &[u32]) -> Result<Vec<f32>> {
        self.run_decoder(features, prefix)
    }

    fn decode_text(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("token decoding failed: {e}"))
    }
}

fn build_session(path: &Path) -> Result<Session> {
    Session::builder()
        .context("failed to create session builder")?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context("failed to set CPU execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("failed to set optimization level")?
        .with_intra_threads(4)
        .context("failed to set intra threads")?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))
}

/// Numerically stable in-place log-softmax.
fn log_softmax(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|&v| (v - max).exp()).sum();
    let log_sum = max + sum.ln();
    for v in logits.iter_mut() {
        *v -= log_sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reports_missing_files() {
        let Err(error) = TrocrModel::load(Path::new("does/not/exist")) else {
            panic!("expected load to fail when model files are missing");
        };
        assert!(error.to_string().contains("model file not found"));
    }

    #[test]
    fn log_softmax_normalizes() {
        let mut scores = vec![1.0, 2.0, 3.0];
        log_softmax(&mut scores);

        let total: f32 = scores.iter().map(|&v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        // Ordering is preserved.
        assert!(scores[2] > scores[1] && scores[1] > scores[0]);
    }

    #[test]
    fn log_softmax_survives_large_values() {
        let mut scores = vec![1000.0, 1001.0];
        log_softmax(&mut scores);
        assert!(scores.iter().all(|v| v.is_finite()));
    }
}
