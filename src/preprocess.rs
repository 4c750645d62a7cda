use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::RecognitionError;

/// Optional normalization steps applied before recognition.
///
/// A `binarize_threshold` of 0 picks the threshold automatically with Otsu's
/// method.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub auto_invert: bool,
    pub binarize: bool,
    pub binarize_threshold: u8,
}

/// Prepares a captured image for the recognizer.
///
/// The input is always coerced to 3-channel RGB; inversion and binarization
/// run afterwards in that order when enabled. Every step returns a fresh
/// buffer.
pub fn preprocess(
    image: &DynamicImage,
    options: PreprocessOptions,
) -> Result<RgbImage, RecognitionError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(RecognitionError::EmptyImage { width, height });
    }

    let mut rgb = image.to_rgb8();

    if options.auto_invert {
        rgb = auto_invert(&rgb);
    }

    if options.binarize {
        rgb = binarize(&rgb, options.binarize_threshold);
    }

    Ok(rgb)
}

/// Inverts images drawn on a dark background.
///
/// The check is data-driven: only images whose mean luminance falls below 128
/// are inverted, everything else passes through untouched.
pub fn auto_invert(rgb: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(rgb);

    let total: u64 = gray.pixels().map(|p| u64::from(p[0])).sum();
    let mean = total as f64 / f64::from(gray.width() * gray.height());

    if mean < 128.0 {
        expand_to_rgb(&gray, |v| 255 - v)
    } else {
        rgb.clone()
    }
}

/// Thresholds the image to two intensity levels.
///
/// A threshold of 0 selects one automatically via [`otsu_threshold`].
pub fn binarize(rgb: &RgbImage, threshold: u8) -> RgbImage {
    let gray = image::imageops::grayscale(rgb);

    let threshold = if threshold == 0 {
        otsu_threshold(&gray)
    } else {
        threshold
    };

    expand_to_rgb(&gray, |v| if v > threshold { 255 } else { 0 })
}

/// Otsu's method: the split point of the 256-bin intensity histogram that
/// maximizes between-class variance.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total = f64::from(gray.width() * gray.height());
    let weighted_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut background_weight = 0.0;
    let mut background_sum = 0.0;
    let mut best_threshold = 0u8;
    let mut best_variance = 0.0;

    for (value, &count) in histogram.iter().enumerate() {
        background_weight += count as f64;
        if background_weight == 0.0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0.0 {
            break;
        }

        background_sum += value as f64 * count as f64;
        let background_mean = background_sum / background_weight;
        let foreground_mean = (weighted_sum - background_sum) / foreground_weight;

        let between = background_weight
            * foreground_weight
            * (background_mean - foreground_mean)
            * (background_mean - foreground_mean);

        if between > best_variance {
            best_variance = between;
            best_threshold = value as u8;
        }
    }

    best_threshold
}

fn expand_to_rgb(gray: &GrayImage, map: impl Fn(u8) -> u8) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = map(gray.get_pixel(x, y)[0]);
        Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn uniform(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([value, value, value]),
        ))
    }

    #[test]
    fn zero_area_image_is_rejected() {
        let image = DynamicImage::new_rgb8(0, 10);
        let result = preprocess(&image, PreprocessOptions::default());
        assert!(matches!(
            result,
            Err(RecognitionError::EmptyImage { width: 0, height: 10 })
        ));
    }

    #[test]
    fn output_is_always_rgb() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([90])));
        let out = preprocess(&image, PreprocessOptions::default()).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgb([90, 90, 90]));
    }

    #[test]
    fn white_image_survives_auto_invert() {
        let image = uniform(8, 8, 255);
        let options = PreprocessOptions {
            auto_invert: true,
            ..Default::default()
        };
        let out = preprocess(&image, options).unwrap();
        assert!(out.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn black_image_inverts_to_white() {
        let image = uniform(8, 8, 0);
        let options = PreprocessOptions {
            auto_invert: true,
            ..Default::default()
        };
        let out = preprocess(&image, options).unwrap();
        assert!(out.pixels().all(|p| p == &Rgb([255, 255, 255])));
    }

    #[test]
    fn fixed_threshold_splits_on_strictly_greater() {
        let mut rgb = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        rgb.put_pixel(1, 0, Rgb([101, 101, 101]));
        let out = binarize(&rgb, 100);
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn otsu_binarization_leaves_two_levels() {
        // Two well-separated intensity peaks.
        let mut rgb = RgbImage::new(20, 20);
        for (x, _, pixel) in rgb.enumerate_pixels_mut() {
            let v = if x < 10 { 40 } else { 210 };
            *pixel = Rgb([v, v, v]);
        }
        let image = DynamicImage::ImageRgb8(rgb);
        let options = PreprocessOptions {
            binarize: true,
            binarize_threshold: 0,
            ..Default::default()
        };
        let out = preprocess(&image, options).unwrap();

        let mut levels: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        levels.sort_unstable();
        levels.dedup();
        assert_eq!(levels, vec![0, 255]);
    }

    #[test]
    fn otsu_threshold_lands_between_peaks() {
        let mut gray = GrayImage::new(100, 1);
        for (x, _, pixel) in gray.enumerate_pixels_mut() {
            *pixel = Luma([if x < 50 { 50 } else { 200 }]);
        }
        let threshold = otsu_threshold(&gray);
        assert!((50..200).contains(&threshold), "threshold {threshold}");
    }
}
