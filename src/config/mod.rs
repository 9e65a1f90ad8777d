//! Application Configuration
//!
//! Segmentation thresholds, recognition settings and output options,
//! stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Alphabet the bundled recognition model was trained on.
/// Codes are assigned in this order starting at 2.
pub const DEFAULT_ALPHABET: &str = " абвгдеёжзийклмнопрстуфхцчшщъыьэюяАБВГДЕЁЖЗИЙКЛМНОПРСТУФХЦЧШЩЪЫЬЭЮЯ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Learned text line detector
    pub detection: DetectionConfig,
    /// Detection filtering and word splitting
    pub segmentation: SegmentationConfig,
    /// Projection-based line segmentation
    pub lines: LineConfig,
    /// Recognition model and alphabet
    pub recognition: RecognitionConfig,
    /// Output artifacts
    pub output: OutputConfig,
    /// Work directory cleanup
    pub cleanup: CleanupConfig,
    /// Answer comparison thresholds
    pub grading: GradingConfig,
}

/// Learned text line detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Path to the ONNX detection model (installed model if unset)
    pub model_path: Option<PathBuf>,
    /// Square input size the model expects
    pub input_size: u32,
    /// IoU above which overlapping detections are suppressed
    pub iou_threshold: f32,
    /// Class names in model output order
    pub class_names: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: 640,
            iou_threshold: 0.2,
            class_names: vec!["textline".to_string()],
        }
    }
}

/// Detection filtering and word splitting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Minimum detector confidence to keep a candidate (0.0 - 1.0)
    pub conf_threshold: f32,
    /// Share of a box's area that must be covered before it counts as a duplicate
    pub overlap_threshold: f32,
    /// Vertical stretch applied to the page before detection
    pub scale_coeff: u32,
    /// Margin added around each word box, as a fraction of its coordinates
    pub scale_bbox: f64,
    /// Column counts as a space when its ink is below this share of the line height
    pub space_threshold_coeff: f32,
    /// Minimum gap width, as a fraction of line width, to split words
    pub min_space_width: f32,
    /// Words narrower than this fraction of line width are dropped as noise
    pub min_word_width_ratio: f32,
    /// Vertical tolerance, in reference box heights, for joining a line cluster
    pub line_overlap_threshold: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.3,
            overlap_threshold: 0.35,
            scale_coeff: 2,
            scale_bbox: 0.01,
            space_threshold_coeff: 0.0025,
            min_space_width: 0.02,
            min_word_width_ratio: 0.01,
            line_overlap_threshold: 0.7,
        }
    }
}

/// Projection-based line segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Pixels darker than this (after contrast scaling) are ink
    pub binarize_threshold: u8,
    /// Contrast gain applied before thresholding
    pub contrast_alpha: f32,
    /// Brightness offset applied before thresholding
    pub contrast_beta: f32,
    /// Minimum band height in rows
    pub min_line_height: u32,
    /// Bands separated by fewer blank rows are merged
    pub min_gap_height: u32,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            binarize_threshold: 200,
            contrast_alpha: 2.0,
            contrast_beta: 50.0,
            min_line_height: 30,
            min_gap_height: 5,
        }
    }
}

/// Recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Characters known to the model, in class order
    pub alphabet: String,
    /// Model input width
    pub image_width: u32,
    /// Model input height
    pub image_height: u32,
    /// Crops per inference call
    pub batch_size: usize,
    /// Path to the ONNX recognition model
    pub model_path: Option<PathBuf>,
    /// Drop words rejected by the plausibility filter
    pub filter_invalid: bool,
    /// Axis order of the model's score tensor
    pub output_layout: OutputLayout,
}

/// Axis order of the recognition model's score tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `[timesteps, batch, classes]`
    #[default]
    TimeMajor,
    /// `[batch, timesteps, classes]`
    BatchMajor,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            image_width: 256,
            image_height: 32,
            batch_size: 32,
            model_path: None,
            filter_invalid: true,
            output_layout: OutputLayout::TimeMajor,
        }
    }
}

/// Output artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Image format for fragments and the annotated page
    pub image_format: String,
    /// Write an annotated copy of the page
    pub annotate: bool,
    /// Keep fragment crops in the output directory instead of a temp directory
    pub keep_fragments: bool,
    /// Directory for annotated pages and kept fragments
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_format: "png".to_string(),
            annotate: true,
            keep_fragments: false,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Work directory cleanup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Removal attempts before giving up
    pub attempts: u32,
    /// Delay between attempts in milliseconds
    pub backoff_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1000,
        }
    }
}

/// Answer comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Normalized edit similarity a text or sentence must exceed (0.0 - 1.0)
    pub fuzzy_threshold: f64,
    /// Semantic similarity a text or sentence must exceed (0.0 - 1.0)
    pub semantic_threshold: f64,
    /// Sentences shorter than this many characters are ignored
    pub min_sentence_length: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            semantic_threshold: 0.8,
            min_sentence_length: 5,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
