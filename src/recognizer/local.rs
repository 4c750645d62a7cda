use anyhow::Result;
use image::RgbImage;
use ndarray::{Array2, Array3};

use crate::error::RecognitionError;

/// Input size expected by the vision encoder.
pub const PIXEL_SIZE: u32 = 384;

/// Per-channel normalization applied to pixel values after scaling to [0, 1].
pub const PIXEL_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const PIXEL_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// An opaque, loaded recognition model.
///
/// The decoding loop only ever talks to a model through this trait, so it can
/// be driven by a scripted stand-in under test. Inference is read-only;
/// implementations must be safe for shared use.
pub trait RecognitionModel: Send + Sync {
    /// Token that seeds the decoder.
    fn start_token(&self) -> u32;

    /// Terminal token; generation of a beam stops once it is emitted.
    fn end_token(&self) -> u32;

    /// Encodes a pixel tensor into the model's visual feature space.
    fn encode_image(&self, pixels: &Array3<f32>) -> Result<Array2<f32>>;

    /// Log-probabilities over the vocabulary for the next token.
    fn next_token_scores(&self, features: &Array2<f32>, prefix: &[u32]) -> Result<Vec<f32>>;

    /// Decodes a token sequence back to text, dropping special tokens.
    fn decode_text(&self, tokens: &[u32]) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    /// Cap on generated tokens per beam.
    pub max_length: usize,
    /// Number of beams kept at each decoding step.
    pub num_beams: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_length: 256,
            num_beams: 4,
        }
    }
}

/// Converts an RGB image into the normalized CHW pixel tensor the encoder
/// expects: bilinear resize to [`PIXEL_SIZE`]², scale to [0, 1], then
/// mean/std normalization per channel.
pub fn encode_pixels(image: &RgbImage) -> Array3<f32> {
    let resized = image::DynamicImage::ImageRgb8(image.clone())
        .resize_exact(
            PIXEL_SIZE,
            PIXEL_SIZE,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();

    let size = PIXEL_SIZE as usize;
    let mut tensor = Array3::zeros((3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = resized.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                tensor[[c, y, x]] = (pixel[c] as f32 / 255.0 - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }
    }

    tensor
}

/// Recognizes one image with a local model.
///
/// Beam search with `options.num_beams` beams, capped at
/// `options.max_length` generated tokens, stopping early once every beam has
/// emitted the terminal token. The winning beam is decoded with special
/// tokens stripped and surrounding whitespace trimmed. Deterministic for a
/// fixed model and image; any failure is fatal for the call.
pub fn infer(
    model: &dyn RecognitionModel,
    image: &RgbImage,
    options: &GenerationOptions,
) -> Result<String, RecognitionError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(RecognitionError::EmptyImage { width, height });
    }

    let pixels = encode_pixels(image);
    let features = model
        .encode_image(&pixels)
        .map_err(|e| RecognitionError::Inference(format!("{e:#}")))?;

    let tokens = beam_search(model, &features, options)?;

    let text = model
        .decode_text(&tokens)
        .map_err(|e| RecognitionError::Inference(format!("{e:#}")))?;

    Ok(text.trim().to_owned())
}

#[derive(Clone)]
struct Beam {
    tokens: Vec<u32>,
    /// Cumulative log-probability of the generated tokens.
    score: f64,
    finished: bool,
}

impl Beam {
    /// Ranking score, normalized by generated length so long beams are not
    /// penalized for every extra step.
    fn normalized(&self) -> f64 {
        let generated = self.tokens.len().saturating_sub(1).max(1);
        self.score / generated as f64
    }
}

fn beam_search(
    model: &dyn RecognitionModel,
    features: &Array2<f32>,
    options: &GenerationOptions,
) -> Result<Vec<u32>, RecognitionError> {
    let end_token = model.end_token();

    let mut beams = vec![Beam {
        tokens: vec![model.start_token()],
        score: 0.0,
        finished: false,
    }];

    for _ in 0..options.max_length {
        if beams.iter().all(|beam| beam.finished) {
            break;
        }

        let mut candidates = Vec::with_capacity(beams.len() * options.num_beams);
        for beam in &beams {
            if beam.finished {
                candidates.push(beam.clone());
                continue;
            }

            let scores = model
                .next_token_scores(features, &beam.tokens)
                .map_err(|e| RecognitionError::Inference(format!("{e:#}")))?;

            let mut ranked: Vec<(u32, f32)> = scores
                .iter()
                .enumerate()
                .map(|(token, &score)| (token as u32, score))
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            for (token, score) in ranked.into_iter().take(options.num_beams) {
                let mut tokens = beam.tokens.clone();
                tokens.push(token);
                candidates.push(Beam {
                    tokens,
                    score: beam.score + f64::from(score),
                    finished: token == end_token,
                });
            }
        }

        // Stable sort keeps insertion order on ties, so decoding stays
        // deterministic.
        candidates.sort_by(|a, b| {
            b.normalized()
                .partial_cmp(&a.normalized())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(options.num_beams);
        beams = candidates;
    }

    let best = beams
        .into_iter()
        .max_by(|a, b| {
            a.normalized()
                .partial_cmp(&b.normalized())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| RecognitionError::Inference("beam search produced no beams".to_owned()))?;

    Ok(best.tokens)
}
