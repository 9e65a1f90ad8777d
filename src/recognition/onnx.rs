//! Recognition model backends
//!
//! The pipeline talks to recognition through [`Recognizer`]; the ONNX
//! Runtime backend loads a CRNN-style model whose output is per-timestep
//! class scores, and reduces it to best-path class ids.

use anyhow::{bail, Context, Result};
use image::GrayImage;
use std::path::Path;
use tracing::debug;

use super::preprocess::{preprocess_batch, InputShape};
use crate::config::{OutputLayout, RecognitionConfig};
use crate::vision::models::OnnxSession;

/// Turns word crops into best-path class id sequences
pub trait Recognizer {
    /// One id sequence per crop, in input order
    fn recognize_batch(&mut self, crops: &[GrayImage]) -> Result<Vec<Vec<usize>>>;
}

/// Recognizer running a CTC model through ONNX Runtime
pub struct OnnxRecognizer {
    session: OnnxSession,
    shape: InputShape,
    layout: OutputLayout,
    num_classes: usize,
}

impl OnnxRecognizer {
    /// Load the model; `num_classes` must match the tokenizer built from
    /// the same config
    pub fn new(model_path: &Path, config: &RecognitionConfig, num_classes: usize) -> Result<Self> {
        let session = OnnxSession::new(model_path)?;
        Ok(Self {
            session,
            shape: InputShape {
                width: config.image_width,
                height: config.image_height,
                ..InputShape::default()
            },
            layout: config.output_layout,
            num_classes,
        })
    }
}

impl Recognizer for OnnxRecognizer {
    fn recognize_batch(&mut self, crops: &[GrayImage]) -> Result<Vec<Vec<usize>>> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }

        let batch = preprocess_batch(crops, &self.shape);
        let shape = batch.shape().to_vec();
        let (data, _offset) = batch.into_raw_vec_and_offset();

        let (dims, scores) = self
            .session
            .run_single(shape, data)
            .context("Recognition forward pass failed")?;
        debug!("Recognition output shape {:?}", dims);

        if dims.len() != 3 {
            bail!("Expected a 3-D score tensor, got shape {:?}", dims);
        }
        if dims[2] != self.num_classes {
            bail!(
                "Model emits {} classes but the alphabet defines {}",
                dims[2],
                self.num_classes
            );
        }

        best_path(&scores, [dims[0], dims[1], dims[2]], self.layout, crops.len())
    }
}

/// Per-timestep arg-max of a score tensor, one id sequence per batch item
pub fn best_path(
    scores: &[f32],
    dims: [usize; 3],
    layout: OutputLayout,
    batch_size: usize,
) -> Result<Vec<Vec<usize>>> {
    let (timesteps, batch) = match layout {
        OutputLayout::TimeMajor => (dims[0], dims[1]),
        OutputLayout::BatchMajor => (dims[1], dims[0]),
    };
    let classes = dims[2];

    if batch != batch_size {
        bail!("Model returned {} sequences for {} crops", batch, batch_size);
    }
    if scores.len() != timesteps * batch * classes {
        bail!("Score tensor has {} values, shape {:?}", scores.len(), dims);
    }

    let offset = |t: usize, b: usize| match layout {
        OutputLayout::TimeMajor => (t * batch + b) * classes,
        OutputLayout::BatchMajor => (b * timesteps + t) * classes,
    };

    Ok((0..batch)
        .map(|b| {
            (0..timesteps)
                .map(|t| {
                    let row = &scores[offset(t, b)..offset(t, b) + classes];
                    row.iter()
                        .enumerate()
                        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                            if v > best.1 { (i, v) } else { best }
                        })
                        .0
                })
                .collect()
        })
        .collect())
}
