//! Deterministic image preprocessing
//!
//! Fixed transform from a decoded image to a CHW float tensor: resize with a fixed
//! interpolation filter, scale to [0, 1], then per-channel normalize. There is no
//! randomness and no data-dependent branching, so two calls on the same input bytes
//! produce bit-identical output.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, ShlightError};
use crate::{CHANNEL_MEAN, CHANNEL_STD, IMAGE_HEIGHT, IMAGE_WIDTH};

/// Deterministic resize/normalize pipeline producing fixed-shape CHW tensors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel standard deviation used as divisor
    pub std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            width: IMAGE_WIDTH as u32,
            height: IMAGE_HEIGHT as u32,
            mean: CHANNEL_MEAN,
            std: CHANNEL_STD,
        }
    }
}

impl Preprocessor {
    /// Create a pipeline with a custom output size, keeping the default statistics
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Length of the output tensor: 3 * height * width
    pub fn output_len(&self) -> usize {
        3 * self.height as usize * self.width as usize
    }

    /// Decode an image file and run the full pipeline
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let img = ImageReader::open(path)
            .map_err(|e| ShlightError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| ShlightError::ImageLoad(path.to_path_buf(), e.to_string()))?;

        Ok(self.process(&img))
    }

    /// Apply the pipeline to an already-decoded image
    ///
    /// Steps, order-sensitive: resize (Triangle filter, exact output size), convert
    /// to RGB, scale channel values to [0, 1], per-channel normalize.
    pub fn process(&self, img: &DynamicImage) -> Vec<f32> {
        let rgb = img
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_rgb8();

        let (width, height) = (self.width as usize, self.height as usize);
        let mut tensor = vec![0.0f32; 3 * height * width];

        for y in 0..height {
            for x in 0..width {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    tensor[c * height * width + y * width + x] =
                        (value - self.mean[c]) / self.std[c];
                }
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.put_pixel(x, y, Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_shape() {
        let pre = Preprocessor::with_size(8, 4);
        let out = pre.process(&gradient_image(32, 32));
        assert_eq!(out.len(), 3 * 4 * 8);
        assert_eq!(out.len(), pre.output_len());
    }

    #[test]
    fn test_deterministic() {
        let pre = Preprocessor::with_size(16, 8);
        let img = gradient_image(64, 48);
        let a = pre.process(&img);
        let b = pre.process(&img);
        // Bit-identical, not just approximately equal
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_constants() {
        // A uniform mid-gray image must map every pixel of channel c to
        // (0.5 - mean[c]) / std[c], independent of position.
        let mut img = RgbImage::new(4, 4);
        for p in img.pixels_mut() {
            // 127.5 is not representable in u8; use 51 -> exactly 0.2
            *p = Rgb([51, 51, 51]);
        }
        let pre = Preprocessor::with_size(4, 4);
        let out = pre.process(&DynamicImage::ImageRgb8(img));

        for c in 0..3 {
            let expected = (0.2 - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
            for i in 0..16 {
                assert_eq!(out[c * 16 + i], expected);
            }
        }
    }

    #[test]
    fn test_default_matches_model_input() {
        let pre = Preprocessor::default();
        assert_eq!(pre.width as usize, IMAGE_WIDTH);
        assert_eq!(pre.height as usize, IMAGE_HEIGHT);
        assert_eq!(pre.output_len(), 3 * IMAGE_HEIGHT * IMAGE_WIDTH);
    }
}
