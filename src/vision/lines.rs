//! Projection-based line segmentation
//!
//! Finds text lines on a whole page from the horizontal ink projection,
//! without a learned detector.

use image::GrayImage;
use tracing::debug;

use super::binarize::{row_projection, scale_contrast, threshold_inverted};
use super::geometry::BoundingBox;
use crate::config::LineConfig;

/// Line segmenter over binarized pages
#[derive(Debug, Clone)]
pub struct LineSegmenter {
    config: LineConfig,
}

impl LineSegmenter {
    pub fn new(config: LineConfig) -> Self {
        Self { config }
    }

    /// Binarize a grayscale page the way the segmenter expects:
    /// contrast boost, then a fixed inverted threshold.
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let boosted = scale_contrast(gray, self.config.contrast_alpha, self.config.contrast_beta);
        threshold_inverted(&boosted, self.config.binarize_threshold)
    }

    /// Binarize and segment a grayscale page
    pub fn segment_image(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        self.segment(&self.binarize(gray))
    }

    /// Segment a binary page (ink = nonzero) into full-width line bands,
    /// top to bottom. A page without ink yields no lines.
    pub fn segment(&self, binary: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = binary.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let bands = self.find_bands(&row_projection(binary), width);
        let lines = self.merge_close_bands(bands, width);

        debug!("Line segmentation: {} lines on {}x{} page", lines.len(), width, height);
        lines
    }

    /// Maximal runs of inked rows at least `min_line_height` tall
    fn find_bands(&self, projection: &[u32], width: u32) -> Vec<BoundingBox> {
        let min_height = self.config.min_line_height as usize;
        let mut bands = Vec::new();
        let mut start: Option<usize> = None;

        for (y, &count) in projection.iter().enumerate() {
            match (count > 0, start) {
                (true, None) => start = Some(y),
                (false, Some(s)) => {
                    if y - s >= min_height {
                        bands.push(BoundingBox::new(0, s as i32, width as i32, y as i32));
                    }
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            let end = projection.len();
            if end - s >= min_height {
                bands.push(BoundingBox::new(0, s as i32, width as i32, end as i32));
            }
        }

        bands
    }

    /// Merge bands separated by fewer than `min_gap_height` blank rows;
    /// such splits come from broken strokes, not from separate lines.
    fn merge_close_bands(&self, bands: Vec<BoundingBox>, page_width: u32) -> Vec<BoundingBox> {
        let min_gap = self.config.min_gap_height as i32;
        let mut merged: Vec<BoundingBox> = Vec::with_capacity(bands.len());

        for band in bands {
            if let Some(prev) = merged.last_mut() {
                let gap = band.y1 - prev.y2;
                let joined = BoundingBox::new(
                    prev.x1.min(band.x1),
                    prev.y1,
                    prev.x2.max(band.x2),
                    band.y2,
                );
                if gap < min_gap && joined.width() <= page_width as i32 {
                    debug!("Merging line bands {:?} and {:?} (gap {})", prev, band, gap);
                    *prev = joined;
                    continue;
                }
            }
            merged.push(band);
        }

        merged
    }
}

impl Default for LineSegmenter {
    fn default() -> Self {
        Self::new(LineConfig::default())
    }
}
