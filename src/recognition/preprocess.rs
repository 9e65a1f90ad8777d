//! Image preprocessing for the recognition model
//!
//! Resizes word crops to the fixed model input size, scales pixels to 0-1
//! and packs them into NCHW batch tensors.

use image::{imageops, GrayImage};
use ndarray::{s, Array3, Array4};

/// Model input geometry
#[derive(Debug, Clone, Copy)]
pub struct InputShape {
    /// Input width in pixels
    pub width: u32,
    /// Input height in pixels
    pub height: u32,
    /// Channels expected by the model (grayscale is replicated)
    pub channels: usize,
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            width: 256,
            height: 32,
            channels: 3,
        }
    }
}

/// Resize to exactly `width` x `height` (aspect ratio is not kept,
/// matching how the model was trained)
pub fn resize_to_input(crop: &GrayImage, shape: &InputShape) -> GrayImage {
    imageops::resize(crop, shape.width, shape.height, imageops::FilterType::Triangle)
}

/// Convert a grayscale image to a CHW f32 array in 0-1, replicating the
/// single channel `channels` times
pub fn gray_to_chw_f32(image: &GrayImage, channels: usize) -> Array3<f32> {
    let (w, h) = image.dimensions();
    let mut chw = Array3::<f32>::zeros((channels, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let value = pixel.0[0] as f32 / 255.0;
        for c in 0..channels {
            chw[[c, y as usize, x as usize]] = value;
        }
    }

    chw
}

/// Full preprocessing for a batch of crops: resize, normalize, stack
pub fn preprocess_batch(crops: &[GrayImage], shape: &InputShape) -> Array4<f32> {
    let mut batch = Array4::<f32>::zeros((
        crops.len(),
        shape.channels,
        shape.height as usize,
        shape.width as usize,
    ));

    for (i, crop) in crops.iter().enumerate() {
        let resized = resize_to_input(crop, shape);
        let chw = gray_to_chw_f32(&resized, shape.channels);
        batch.slice_mut(s![i, .., .., ..]).assign(&chw);
    }

    batch
}
