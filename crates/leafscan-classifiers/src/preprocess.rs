//! Image preprocessing
//!
//! Decodes an image, stretches it to the model input size and lays it out as
//! a planar, ImageNet-normalized RGB tensor.

use crate::config::PreprocessConfig;
use image::imageops::FilterType;
use leafscan_core::{Error, RawImage, Result};

/// Planar RGB tensor ready for the model, shape `[1, 3, height, width]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl InputTensor {
    /// Wrap planar data; `data` must hold exactly `3 * width * height` values
    pub fn from_planar(data: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if data.len() != 3 * width * height {
            return Err(Error::preprocess(format!(
                "expected {} values for {}x{} RGB, got {}",
                3 * width * height,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// `[batch, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height, self.width]
    }

    /// One colour plane (0 = R, 1 = G, 2 = B)
    pub fn plane(&self, channel: usize) -> &[f32] {
        let size = self.width * self.height;
        &self.data[channel * size..(channel + 1) * size]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Turns encoded images into model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    filter: FilterType,
}

impl Preprocessor {
    /// Create a preprocessor from configuration
    pub fn new(config: &PreprocessConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::config(format!(
                "target size must be positive, got {}x{}",
                config.width, config.height
            )));
        }
        if config.std.iter().any(|s| *s == 0.0) {
            return Err(Error::config("normalization std must be non-zero"));
        }

        Ok(Self {
            width: config.width,
            height: config.height,
            mean: config.mean,
            std: config.std,
            filter: config.filter.into(),
        })
    }

    /// Target `(width, height)`
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode, resize and normalize `image`.
    ///
    /// Aspect ratio is not preserved. Alpha is discarded.
    pub fn preprocess(&self, image: &RawImage) -> Result<InputTensor> {
        let decoded = image::load_from_memory(&image.bytes).map_err(|e| {
            Error::preprocess(format!("failed to decode {} image: {}", image.mime_type, e))
        })?;

        let rgb = decoded.to_rgb8();
        let resized = image::imageops::resize(&rgb, self.width, self.height, self.filter);

        let num_pixels = (self.width * self.height) as usize;
        let mut normalized = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                normalized[c * num_pixels + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        InputTensor::from_planar(normalized, self.width as usize, self.height as usize)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        let config = PreprocessConfig::default();
        Self {
            width: config.width,
            height: config.height,
            mean: config.mean,
            std: config.std,
            filter: config.filter.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IMAGENET_MEAN, IMAGENET_STD};
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(image: &image::DynamicImage) -> RawImage {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        RawImage::new(buf, "image/png")
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RawImage {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        encode_png(&image::DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_output_length_and_shape() {
        let tensor = Preprocessor::default()
            .preprocess(&solid(640, 480, [10, 200, 30]))
            .unwrap();

        assert_eq!(tensor.len(), 3 * 224 * 224);
        assert_eq!(tensor.shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn test_planes_are_normalized_per_channel() {
        let tensor = Preprocessor::default()
            .preprocess(&solid(32, 32, [255, 0, 128]))
            .unwrap();

        let expected_r = (1.0 - 0.485) / 0.229;
        let expected_g = (0.0 - 0.456) / 0.224;
        let expected_b = (128.0 / 255.0 - 0.406) / 0.225;

        assert!(tensor.plane(0).iter().all(|v| (v - expected_r).abs() < 1e-5));
        assert!(tensor.plane(1).iter().all(|v| (v - expected_g).abs() < 1e-5));
        assert!(tensor.plane(2).iter().all(|v| (v - expected_b).abs() < 1e-5));
    }

    #[test]
    fn test_deterministic() {
        let image = solid(300, 200, [90, 140, 60]);
        let preprocessor = Preprocessor::default();

        assert_eq!(
            preprocessor.preprocess(&image).unwrap(),
            preprocessor.preprocess(&image).unwrap()
        );
    }

    #[test]
    fn test_alpha_is_ignored() {
        let opaque = solid(16, 16, [40, 80, 120]);
        let translucent = encode_png(&image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            16,
            16,
            Rgba([40, 80, 120, 10]),
        )));

        let preprocessor = Preprocessor::default();
        assert_eq!(
            preprocessor.preprocess(&opaque).unwrap(),
            preprocessor.preprocess(&translucent).unwrap()
        );
    }

    #[test]
    fn test_row_major_layout() {
        // Left half black, right half white; no resampling at the target size
        let mut img = RgbImage::new(4, 2);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < 2 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
        }
        let config = PreprocessConfig {
            width: 4,
            height: 2,
            ..Default::default()
        };

        let tensor = Preprocessor::new(&config)
            .unwrap()
            .preprocess(&encode_png(&image::DynamicImage::ImageRgb8(img)))
            .unwrap();

        let red = tensor.plane(0);
        let dark = (0.0 - 0.485) / 0.229;
        let bright = (1.0 - 0.485) / 0.229;
        for row in 0..2 {
            assert!((red[row * 4] - dark).abs() < 1e-5);
            assert!((red[row * 4 + 3] - bright).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wide_image_is_stretched_not_cropped() {
        // 3:1 image with red and blue bands at the far edges
        let img = RgbImage::from_fn(300, 100, |x, _| match x {
            0..=19 => Rgb([255, 0, 0]),
            280..=299 => Rgb([0, 0, 255]),
            _ => Rgb([0, 255, 0]),
        });

        let tensor = Preprocessor::default()
            .preprocess(&encode_png(&image::DynamicImage::ImageRgb8(img)))
            .unwrap();

        let (red, green, blue) = (tensor.plane(0), tensor.plane(1), tensor.plane(2));
        let high = |c: usize| (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        let low = |c: usize| (0.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];

        for row in [0, 112, 223] {
            let left = row * 224;
            let right = row * 224 + 223;
            let centre = row * 224 + 112;

            assert!((red[left] - high(0)).abs() < 1e-3, "row {row} left edge not red");
            assert!((blue[left] - low(2)).abs() < 1e-3);
            assert!((blue[right] - high(2)).abs() < 1e-3, "row {row} right edge not blue");
            assert!((red[right] - low(0)).abs() < 1e-3);
            assert!((green[centre] - high(1)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_undecodable_image() {
        let image = RawImage::new(b"definitely not an image".to_vec(), "image/jpeg");
        let err = Preprocessor::default().preprocess(&image).unwrap_err();
        assert!(matches!(err, Error::Preprocess(_)));
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = PreprocessConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(Preprocessor::new(&config), Err(Error::Config(_))));
    }
}
