//! Vision Layer
//!
//! Page segmentation: binarization, line bands, detector candidates and
//! duplicate suppression, word splitting and reading order. Everything
//! here works on grayscale pages and integer pixel boxes.

pub mod binarize;
pub mod detection;
pub mod geometry;
pub mod lines;
pub mod models;
pub mod reading_order;
pub mod words;
pub mod yolo;

pub use detection::{
    filter_duplicates, threshold_candidates, DetectionCandidate, Detector, ProjectionDetector,
    TEXTLINE_CLASS,
};
pub use geometry::{contains, intersection_area, iou, overlap_ratio, BoundingBox};
pub use lines::LineSegmenter;
pub use models::{ModelManager, ModelType, OnnxSession};
pub use reading_order::sort_reading_order;
pub use words::WordSplitter;
pub use yolo::OnnxDetector;
