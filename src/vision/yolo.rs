//! Learned text line detector
//!
//! Runs a YOLO-family ONNX model exported with the usual single output
//! tensor `[1, 4 + classes, anchors]` (box center, size, then one score per
//! class). Pages are letterboxed to the square model input and boxes are
//! mapped back to page coordinates.

use anyhow::{bail, Context, Result};
use image::{imageops, GrayImage, Luma};
use std::path::Path;
use tracing::debug;

use super::detection::{DetectionCandidate, Detector};
use super::geometry::{iou, BoundingBox};
use super::models::OnnxSession;
use crate::config::DetectionConfig;
use crate::recognition::preprocess::gray_to_chw_f32;

/// Padding value around the resized page
const LETTERBOX_FILL: u8 = 114;
/// Candidates below this score are discarded before suppression
const MIN_SCORE: f32 = 0.25;

/// How a page was fitted into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    /// Map a point from model input coordinates back to the page
    pub fn to_page(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Resize keeping aspect ratio and pad to `size` x `size`
pub fn letterbox(gray: &GrayImage, size: u32) -> (GrayImage, Letterbox) {
    let (w, h) = gray.dimensions();
    let scale = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(gray, new_w, new_h, imageops::FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = GrayImage::from_pixel(size, size, Luma([LETTERBOX_FILL]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (canvas, Letterbox { scale, pad_x, pad_y })
}

/// One raw detection in model input coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
    pub class_id: usize,
}

/// Decode a `[1, 4 + classes, anchors]` output. A transposed
/// `[1, anchors, 4 + classes]` tensor is accepted too.
pub fn decode_output(data: &[f32], dims: &[usize], min_score: f32) -> Result<Vec<RawDetection>> {
    if dims.len() != 3 || dims[0] != 1 {
        bail!("Expected a [1, features, anchors] tensor, got {:?}", dims);
    }

    let (features, anchors, transposed) = if dims[1] <= dims[2] {
        (dims[1], dims[2], false)
    } else {
        (dims[2], dims[1], true)
    };
    if features < 5 {
        bail!("Detection output has {} features, need at least 5", features);
    }
    if data.len() != features * anchors {
        bail!("Detection output has {} values for shape {:?}", data.len(), dims);
    }

    let at = |feature: usize, anchor: usize| {
        if transposed {
            data[anchor * features + feature]
        } else {
            data[feature * anchors + anchor]
        }
    };

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..features)
            .map(|f| (f - 4, at(f, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score >= min_score {
            detections.push(RawDetection {
                cx: at(0, anchor),
                cy: at(1, anchor),
                w: at(2, anchor),
                h: at(3, anchor),
                score,
                class_id,
            });
        }
    }

    Ok(detections)
}

/// Class-agnostic non-maximum suppression by IoU
pub fn nms(mut candidates: Vec<DetectionCandidate>, iou_threshold: f32) -> Vec<DetectionCandidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<DetectionCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Text line detector backed by an ONNX model
pub struct OnnxDetector {
    session: OnnxSession,
    input_size: u32,
    iou_threshold: f32,
    class_names: Vec<String>,
}

impl OnnxDetector {
    pub fn new(model_path: &Path, config: &DetectionConfig) -> Result<Self> {
        if config.input_size == 0 {
            bail!("detection.input_size must be greater than 0");
        }
        Ok(Self {
            session: OnnxSession::new(model_path)?,
            input_size: config.input_size,
            iou_threshold: config.iou_threshold,
            class_names: config.class_names.clone(),
        })
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }
}

/// Convert raw detections to page candidates, dropping boxes that fall
/// outside a `width` x `height` page
pub fn to_candidates<F>(
    raw: &[RawDetection],
    letterbox: &Letterbox,
    width: u32,
    height: u32,
    class_name: F,
) -> Vec<DetectionCandidate>
where
    F: Fn(usize) -> String,
{
    raw.iter()
        .filter_map(|d| {
            let (x1, y1) = letterbox.to_page(d.cx - d.w / 2.0, d.cy - d.h / 2.0);
            let (x2, y2) = letterbox.to_page(d.cx + d.w / 2.0, d.cy + d.h / 2.0);
            let bbox = BoundingBox::new(x1 as i32, y1 as i32, x2.ceil() as i32, y2.ceil() as i32)
                .clamp_to(width, height)?;
            Some(DetectionCandidate::new(bbox, d.score, class_name(d.class_id)))
        })
        .collect()
}

impl Detector for OnnxDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionCandidate>> {
        let (input, fit) = letterbox(image, self.input_size);
        let chw = gray_to_chw_f32(&input, 3);
        let shape = vec![1, 3, self.input_size as usize, self.input_size as usize];
        let (data, _offset) = chw.into_raw_vec_and_offset();

        let (dims, output) = self
            .session
            .run_single(shape, data)
            .context("Detection forward pass failed")?;
        let raw = decode_output(&output, &dims, MIN_SCORE)?;

        let candidates = to_candidates(&raw, &fit, image.width(), image.height(), |id| {
            self.class_name(id)
        });
        let kept = nms(candidates, self.iou_threshold);
        debug!("Detector: {} raw boxes, {} after NMS", raw.len(), kept.len());
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::TEXTLINE_CLASS;

    #[test]
    fn test_letterbox_wide_page() {
        let page = GrayImage::from_pixel(200, 100, Luma([0]));
        let (input, fit) = letterbox(&page, 64);

        assert_eq!(input.dimensions(), (64, 64));
        assert!((fit.scale - 0.32).abs() < 1e-6);
        assert_eq!((fit.pad_x, fit.pad_y), (0, 16));
        assert_eq!(input.get_pixel(10, 5).0[0], LETTERBOX_FILL);
        assert_eq!(input.get_pixel(10, 32).0[0], 0);

        let (x, y) = fit.to_page(32.0, 32.0);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_input_size_rejected() {
        let config = DetectionConfig {
            input_size: 0,
            ..DetectionConfig::default()
        };
        let err = OnnxDetector::new(Path::new("det.onnx"), &config).err().unwrap();
        assert!(err.to_string().contains("input_size"));
    }

    #[test]
    fn test_decode_channels_first() {
        // 1 class, 6 anchors: features are rows
        let mut data = vec![0.0f32; 5 * 6];
        for (feature, value) in [10.0, 20.0, 8.0, 4.0, 0.9].into_iter().enumerate() {
            data[feature * 6] = value;
        }
        data[4 * 6 + 1] = 0.1;

        let raw = decode_output(&data, &[1, 5, 6], 0.25).unwrap();
        assert_eq!(
            raw,
            vec![RawDetection { cx: 10.0, cy: 20.0, w: 8.0, h: 4.0, score: 0.9, class_id: 0 }]
        );
    }

    #[test]
    fn test_decode_transposed_picks_best_class() {
        // 7 anchors, 2 classes, anchors first
        let mut data = vec![0.0f32; 7 * 6];
        data[0..6].copy_from_slice(&[5.0, 5.0, 2.0, 2.0, 0.3, 0.8]);
        let raw = decode_output(&data, &[1, 7, 6], 0.25).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].class_id, 1);
        assert!((raw[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(decode_output(&[0.0; 8], &[1, 4, 2], 0.25).is_err());
        assert!(decode_output(&[0.0; 9], &[1, 5, 6], 0.25).is_err());
        assert!(decode_output(&[0.0; 10], &[2, 5, 1], 0.25).is_err());
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let a = DetectionCandidate::new(BoundingBox::new(0, 0, 100, 20), 0.9, TEXTLINE_CLASS);
        let b = DetectionCandidate::new(BoundingBox::new(5, 0, 105, 20), 0.7, TEXTLINE_CLASS);
        let c = DetectionCandidate::new(BoundingBox::new(0, 30, 100, 50), 0.8, TEXTLINE_CLASS);

        let kept = nms(vec![b, c.clone(), a.clone()], 0.2);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn test_to_candidates_maps_back_to_page() {
        let fit = Letterbox { scale: 0.5, pad_x: 0, pad_y: 10 };
        let raw = [
            RawDetection { cx: 50.0, cy: 30.0, w: 100.0, h: 20.0, score: 0.9, class_id: 0 },
            RawDetection { cx: 500.0, cy: 500.0, w: 10.0, h: 10.0, score: 0.9, class_id: 0 },
        ];
        let names = |id: usize| if id == 0 { TEXTLINE_CLASS.to_string() } else { "other".to_string() };

        let candidates = to_candidates(&raw, &fit, 400, 200, names);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(0, 20, 200, 60));
        assert_eq!(candidates[0].class_name, TEXTLINE_CLASS);
    }
}
