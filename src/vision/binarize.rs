//! Binarization and morphology helpers
//!
//! Turns page and line images into ink masks (ink = 255, background = 0)
//! for the projection-based segmenters.

use image::{imageops, DynamicImage, GrayImage, Luma};
use imageproc::contrast;
use imageproc::morphology::{grayscale_close, Mask};
use tracing::debug;

/// Foreground value in binary masks
pub const INK: u8 = 255;

/// Convert any decoded image to 8-bit grayscale
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Otsu threshold, inverted so dark ink becomes foreground.
///
/// A uniform image has no ink to separate and yields an empty mask.
pub fn otsu_inverted(gray: &GrayImage) -> GrayImage {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if min >= max {
        return GrayImage::new(gray.width(), gray.height());
    }

    let level = contrast::otsu_level(gray);
    debug!("Otsu level {} (range {}..={})", level, min, max);
    threshold_inverted(gray, level)
}

/// Fixed threshold, inverted: pixels above `level` are background
pub fn threshold_inverted(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { 0 } else { INK };
    }
    out
}

/// Linear contrast adjustment `|alpha * p + beta|`, saturated to 0..=255
pub fn scale_contrast(gray: &GrayImage, alpha: f32, beta: f32) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        let adjusted = (alpha * p.0[0] as f32 + beta).abs().round().clamp(0.0, 255.0);
        *p = Luma([adjusted as u8]);
    }
    out
}

/// Morphological closing with a 5 wide by 3 tall rectangle; bridges
/// breaks between strokes so letters of one word are not split apart.
pub fn close_gaps(binary: &GrayImage) -> GrayImage {
    let element = GrayImage::from_pixel(5, 3, Luma([INK]));
    grayscale_close(binary, &Mask::from_image(&element, 2, 1))
}

/// Stretch an image vertically by an integer factor
pub fn stretch_vertical(gray: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 {
        return gray.clone();
    }
    imageops::resize(
        gray,
        gray.width(),
        gray.height() * factor,
        imageops::FilterType::Triangle,
    )
}

/// Count ink pixels per row
pub fn row_projection(binary: &GrayImage) -> Vec<u32> {
    binary
        .rows()
        .map(|row| row.filter(|p| p.0[0] > 0).count() as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_inverted() {
        let img = GrayImage::from_raw(3, 1, vec![10, 128, 250]).unwrap();
        let bin = threshold_inverted(&img, 128);
        assert_eq!(bin.as_raw(), &vec![255, 255, 0]);
    }

    #[test]
    fn test_otsu_separates_ink() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([240]));
        for x in 2..5 {
            img.put_pixel(x, 4, Luma([20]));
        }
        let bin = otsu_inverted(&img);
        assert_eq!(bin.get_pixel(3, 4).0[0], INK);
        assert_eq!(bin.get_pixel(8, 8).0[0], 0);
    }

    #[test]
    fn test_otsu_uniform_is_blank() {
        let img = GrayImage::from_pixel(8, 8, Luma([255]));
        let bin = otsu_inverted(&img);
        assert!(bin.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_scale_contrast_saturates() {
        let img = GrayImage::from_raw(3, 1, vec![0, 50, 200]).unwrap();
        let out = scale_contrast(&img, 2.0, 50.0);
        assert_eq!(out.as_raw(), &vec![50, 150, 255]);
    }

    #[test]
    fn test_close_bridges_horizontal_gaps() {
        // Stroke along row 2 with x = 3..6 missing
        let mut img = GrayImage::new(11, 5);
        for x in (1..3).chain(6..10) {
            img.put_pixel(x, 2, Luma([INK]));
        }
        let closed = close_gaps(&img);
        for x in 3..6 {
            assert_eq!(closed.get_pixel(x, 2).0[0], INK, "x = {}", x);
        }
    }

    #[test]
    fn test_close_keeps_vertical_gaps() {
        // Column x = 2 with rows 4..7 missing: taller than the element reaches
        let mut img = GrayImage::new(5, 11);
        for y in (0..4).chain(7..11) {
            img.put_pixel(2, y, Luma([INK]));
        }
        let closed = close_gaps(&img);
        assert_eq!(closed.get_pixel(2, 5).0[0], 0);
    }

    #[test]
    fn test_stretch_and_projection() {
        let mut img = GrayImage::new(4, 3);
        img.put_pixel(1, 1, Luma([INK]));
        img.put_pixel(2, 1, Luma([INK]));
        assert_eq!(row_projection(&img), vec![0, 2, 0]);

        let stretched = stretch_vertical(&img, 2);
        assert_eq!(stretched.dimensions(), (4, 6));
    }
}
