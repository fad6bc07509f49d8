//! Data Augmentation Module for Skin Lesion Classification
//!
//! On-the-fly geometric and photometric augmentation for the training stream.
//! Lesion photos have no canonical orientation, so both flip axes are enabled.
//!
//! # Augmentation Strategy
//!
//! - **Training**: random rotation, shift, zoom, flips and brightness jitter per sample
//! - **Validation/Test**: resize and rescale only (deterministic)
//!
//! Pixels that map outside the source image take the nearest edge value.

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f32,
    /// Randomly mirror left/right
    pub horizontal_flip: bool,
    /// Randomly mirror top/bottom
    pub vertical_flip: bool,
    /// Zoom factor is drawn from [1 - zoom_range, 1 + zoom_range]
    pub zoom_range: f32,
    /// Brightness multiplier range (lower, upper)
    pub brightness_range: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            horizontal_flip: true,
            vertical_flip: true,
            zoom_range: 0.2,
            brightness_range: (0.8, 1.2),
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            horizontal_flip: false,
            vertical_flip: false,
            zoom_range: 0.0,
            brightness_range: (1.0, 1.0),
        }
    }

    /// True when no transformation can ever change an image
    pub fn is_identity(&self) -> bool {
        self.rotation_degrees == 0.0
            && self.width_shift == 0.0
            && self.height_shift == 0.0
            && !self.horizontal_flip
            && !self.vertical_flip
            && self.zoom_range == 0.0
            && self.brightness_range.0 == 1.0
            && self.brightness_range.1 == 1.0
    }
}

/// One sampled set of augmentation parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AugmentParams {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub angle_degrees: f32,
    /// Shift in pixels
    pub shift_x: f32,
    pub shift_y: f32,
    pub zoom: f32,
    pub brightness: f32,
}

impl AugmentParams {
    /// Parameters that leave the image untouched
    pub fn identity() -> Self {
        Self {
            flip_horizontal: false,
            flip_vertical: false,
            angle_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom: 1.0,
            brightness: 1.0,
        }
    }

    fn has_affine(&self) -> bool {
        self.angle_degrees.abs() >= 0.1
            || self.shift_x.abs() >= 0.5
            || self.shift_y.abs() >= 0.5
            || (self.zoom - 1.0).abs() > 1e-3
    }
}

fn symmetric(rng: &mut ChaCha8Rng, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    /// Create a new augmenter with the given configuration
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    /// Create an augmenter with no augmentation (for validation/inference)
    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw augmentation parameters for an image of the given size
    pub fn sample_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> AugmentParams {
        let cfg = &self.config;

        let flip_horizontal = cfg.horizontal_flip && rng.gen::<f32>() < 0.5;
        let flip_vertical = cfg.vertical_flip && rng.gen::<f32>() < 0.5;
        let angle_degrees = symmetric(rng, cfg.rotation_degrees);
        let shift_x = symmetric(rng, cfg.width_shift) * width as f32;
        let shift_y = symmetric(rng, cfg.height_shift) * height as f32;
        let zoom = 1.0 + symmetric(rng, cfg.zoom_range);

        let (lo, hi) = cfg.brightness_range;
        let brightness = if hi > lo { rng.gen_range(lo..=hi) } else { lo };

        AugmentParams {
            flip_horizontal,
            flip_vertical,
            angle_degrees,
            shift_x,
            shift_y,
            zoom,
            brightness,
        }
    }

    /// Apply all configured augmentations randomly to an image
    ///
    /// # Arguments
    /// * `img` - The input image
    /// * `rng` - Random number generator for reproducibility
    pub fn augment(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let (width, height) = img.dimensions();
        let params = self.sample_params(width, height, rng);
        self.apply(img, &params)
    }

    /// Apply a fixed set of parameters
    pub fn apply(&self, img: DynamicImage, params: &AugmentParams) -> DynamicImage {
        let mut result = img;

        if params.flip_horizontal {
            result = result.fliph();
        }
        if params.flip_vertical {
            result = result.flipv();
        }
        if params.has_affine() {
            result = self.affine(&result, params);
        }
        if (params.brightness - 1.0).abs() > 1e-4 {
            result = self.adjust_brightness(&result, params.brightness);
        }

        result
    }

    /// Rotate, zoom and shift in a single inverse-mapped pass
    fn affine(&self, img: &DynamicImage, params: &AugmentParams) -> DynamicImage {
        let (width, height) = img.dimensions();
        let rgb = img.to_rgb8();

        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;

        let angle_rad = params.angle_degrees.to_radians();
        let cos_a = angle_rad.cos();
        let sin_a = angle_rad.sin();

        let mut output = ImageBuffer::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;

                // zoom > 1 samples a wider source window (zoom out)
                let src_x = cx + params.zoom * (dx * cos_a + dy * sin_a) - params.shift_x;
                let src_y = cy + params.zoom * (-dx * sin_a + dy * cos_a) - params.shift_y;

                let pixel = self.bilinear_sample(&rgb, src_x, src_y);
                output.put_pixel(x, y, pixel);
            }
        }

        DynamicImage::ImageRgb8(output)
    }

    /// Sample a pixel using bilinear interpolation with nearest-edge fill
    fn bilinear_sample(&self, img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
        let (width, height) = img.dimensions();
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;

        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);

        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = img.get_pixel(x0, y0);
        let p10 = img.get_pixel(x1, y0);
        let p01 = img.get_pixel(x0, y1);
        let p11 = img.get_pixel(x1, y1);

        let mut result = [0u8; 3];
        for c in 0..3 {
            let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f32 * fx * (1.0 - fy)
                + p01[c] as f32 * (1.0 - fx) * fy
                + p11[c] as f32 * fx * fy;

            result[c] = v.round().clamp(0.0, 255.0) as u8;
        }

        Rgb(result)
    }

    /// Scale all channels by a brightness factor
    fn adjust_brightness(&self, img: &DynamicImage, factor: f32) -> DynamicImage {
        let mut rgb = img.to_rgb8();

        for pixel in rgb.pixels_mut() {
            for c in 0..3 {
                pixel[c] = (pixel[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
            }
        }

        DynamicImage::ImageRgb8(rgb)
    }

    /// Resize image to target size (always applied, not random)
    pub fn resize(&self, img: DynamicImage) -> DynamicImage {
        img.resize_exact(
            self.image_size,
            self.image_size,
            image::imageops::FilterType::Triangle,
        )
    }

    /// Convert image to CHW float tensor data normalized to [0, 1]
    pub fn to_tensor_data(&self, img: &DynamicImage) -> Vec<f32> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in rgb.pixels().enumerate() {
            data[i] = pixel[0] as f32 / 255.0;
            data[plane + i] = pixel[1] as f32 / 255.0;
            data[2 * plane + i] = pixel[2] as f32 / 255.0;
        }

        data
    }

    /// Full preprocessing pipeline: resize, augment (optional), convert to tensor
    pub fn preprocess(&self, img: DynamicImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let mut result = self.resize(img);

        if let Some(rng) = rng {
            if !self.config.is_identity() {
                result = self.augment(result, rng);
            }
        }

        self.to_tensor_data(&result)
    }
}
