//! Text region detection
//!
//! Detector abstraction plus the greedy duplicate suppression applied to
//! its candidates. Detectors may emit both line-level and word-level boxes
//! for the same ink, so suppression uses a two-sided coverage test instead
//! of plain IoU.

use anyhow::Result;
use image::GrayImage;
use tracing::{debug, warn};

use super::geometry::{intersection_area, BoundingBox};
use super::lines::LineSegmenter;

/// Class name used for line-level regions
pub const TEXTLINE_CLASS: &str = "textline";

/// A box proposed by a detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionCandidate {
    /// Region in detector input coordinates
    pub bbox: BoundingBox,
    /// Detector confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Class label
    pub class_name: String,
}

impl DetectionCandidate {
    /// Create a candidate; confidence is clamped into `[0, 1]`
    pub fn new(bbox: BoundingBox, confidence: f32, class_name: impl Into<String>) -> Self {
        let clamped = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        if clamped != confidence {
            warn!("Detector confidence {} outside [0, 1], clamped to {}", confidence, clamped);
        }
        Self {
            bbox,
            confidence: clamped,
            class_name: class_name.into(),
        }
    }
}

/// Source of candidate text regions for a page
pub trait Detector {
    /// Detect text regions in a (preprocessed) grayscale page
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionCandidate>>;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionCandidate>> {
        (**self).detect(image)
    }
}

/// Detector backed by the projection line segmenter.
///
/// Every band becomes a `textline` candidate with confidence 1.0.
pub struct ProjectionDetector {
    segmenter: LineSegmenter,
}

impl ProjectionDetector {
    pub fn new(segmenter: LineSegmenter) -> Self {
        Self { segmenter }
    }
}

impl Detector for ProjectionDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionCandidate>> {
        Ok(self
            .segmenter
            .segment_image(image)
            .into_iter()
            .map(|bbox| DetectionCandidate::new(bbox, 1.0, TEXTLINE_CLASS))
            .collect())
    }
}

/// Keep candidates at or above the confidence threshold
pub fn threshold_candidates(
    candidates: Vec<DetectionCandidate>,
    conf_threshold: f32,
) -> Vec<DetectionCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.confidence >= conf_threshold)
        .collect()
}

/// Greedy duplicate suppression.
///
/// Candidates are visited by descending confidence (ties keep input order).
/// A candidate is dropped when some already accepted box covers more than
/// `overlap_threshold` of the candidate's area *and* more than
/// `overlap_threshold` of its own area.
pub fn filter_duplicates(
    mut candidates: Vec<DetectionCandidate>,
    overlap_threshold: f32,
) -> Vec<DetectionCandidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let threshold = overlap_threshold as f64;
    let mut accepted: Vec<DetectionCandidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let area = candidate.bbox.area() as f64;
        let duplicate = accepted.iter().any(|kept| {
            let inter = intersection_area(&candidate.bbox, &kept.bbox) as f64;
            inter > threshold * area && inter > threshold * kept.bbox.area() as f64
        });

        if duplicate {
            debug!(
                "Dropping duplicate {:?} (conf {:.2})",
                candidate.bbox, candidate.confidence
            );
        } else {
            accepted.push(candidate);
        }
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn cand(x1: i32, y1: i32, x2: i32, y2: i32, conf: f32) -> DetectionCandidate {
        DetectionCandidate::new(BoundingBox::new(x1, y1, x2, y2), conf, TEXTLINE_CLASS)
    }

    #[test]
    fn test_identical_boxes_deduplicated() {
        let kept = filter_duplicates(vec![cand(0, 0, 100, 20, 0.6), cand(0, 0, 100, 20, 0.9)], 0.35);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_small_box_overlapping_large_box_is_kept() {
        // Areas 10000 and 100, intersection 95: 95 > 0.5 * 100 but 95 < 0.5 * 10000
        let large = cand(0, 0, 100, 100, 0.9);
        let small = cand(5, 99, 105, 100, 0.5);
        assert_eq!(small.bbox.area(), 100);
        assert_eq!(intersection_area(&large.bbox, &small.bbox), 95);

        let kept = filter_duplicates(vec![large.clone(), small.clone()], 0.5);
        assert_eq!(kept, vec![large.clone(), small.clone()]);

        // Order of arrival does not matter, confidence does
        let kept = filter_duplicates(vec![small.clone(), large.clone()], 0.5);
        assert_eq!(kept, vec![large, small]);
    }

    #[test]
    fn test_disjoint_boxes_all_kept() {
        let kept = filter_duplicates(
            vec![cand(0, 0, 10, 10, 0.4), cand(20, 0, 30, 10, 0.8), cand(40, 0, 50, 10, 0.6)],
            0.35,
        );
        let confs: Vec<f32> = kept.iter().map(|c| c.confidence).collect();
        assert_eq!(confs, vec![0.8, 0.6, 0.4]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let a = cand(0, 0, 10, 10, 0.7);
        let b = cand(1, 0, 11, 10, 0.7);
        let kept = filter_duplicates(vec![a.clone(), b], 0.35);
        assert_eq!(kept, vec![a]);
    }

    #[test]
    fn test_threshold_candidates() {
        let kept = threshold_candidates(vec![cand(0, 0, 5, 5, 0.2), cand(0, 0, 5, 5, 0.3)], 0.3);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(cand(0, 0, 1, 1, 1.7).confidence, 1.0);
        assert_eq!(cand(0, 0, 1, 1, -0.1).confidence, 0.0);
    }

    #[test]
    fn test_projection_detector_emits_textlines() {
        let mut page = GrayImage::from_pixel(100, 120, Luma([255]));
        for y in 20..60 {
            for x in 5..95 {
                page.put_pixel(x, y, Luma([0]));
            }
        }
        let mut detector = ProjectionDetector::new(LineSegmenter::default());
        let found = detector.detect(&page).unwrap();
        assert_eq!(found, vec![cand(0, 20, 100, 60, 1.0)]);
    }
}
