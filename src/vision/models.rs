//! Model management for ONNX Runtime
//!
//! Locates, installs and loads the text line detection and handwriting
//! recognition models.

use anyhow::{bail, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Text line detection model (YOLO)
    Detection,
    /// Handwriting recognition model (CRNN + CTC)
    Recognition,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Detection, ModelType::Recognition];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
        }
    }

    /// Display name for status reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Line Detection",
            ModelType::Recognition => "Handwriting Recognition",
        }
    }
}

/// Model manifest tracking installed models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: ModelType,
    pub filename: String,
    /// Where the model was installed from
    pub source: PathBuf,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch
    pub installed_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for locating and installing ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager in the application data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is installed (non-empty file)
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let available = self.is_model_available(model_type);
                let size = std::fs::metadata(&path).ok().map(|m| m.len());
                (model_type, available, size)
            })
            .collect()
    }

    /// Resolve the model to load: an explicit path if given, otherwise the
    /// installed copy. Fails if the file does not exist.
    pub fn ensure_model(&self, model_type: ModelType, explicit: Option<&Path>) -> Result<PathBuf> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => self.model_path(model_type),
        };

        if !path.is_file() {
            bail!(
                "{} model not found at {:?}. Install one with `scriptor models install {} <FILE>` or pass its path explicitly",
                model_type.display_name(),
                path,
                serde_plain_name(model_type)
            );
        }

        debug!("{} model: {:?}", model_type.display_name(), path);
        Ok(path)
    }

    /// Copy a model file into the models directory and record it in the manifest
    pub fn install(&self, model_type: ModelType, source: &Path) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        let temp_path = path.with_extension("tmp");

        std::fs::copy(source, &temp_path)
            .with_context(|| format!("Failed to copy model from {:?}", source))?;
        std::fs::rename(&temp_path, &path)
            .context("Failed to move model file to final location")?;

        self.update_manifest_for_model(model_type, source)?;
        info!("Installed {} model at {:?}", model_type.display_name(), path);
        Ok(path)
    }

    /// Update manifest after an install
    fn update_manifest_for_model(&self, model_type: ModelType, source: &Path) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let metadata = std::fs::metadata(self.model_path(model_type))?;

        let model_info = ModelInfo {
            model_type,
            filename: model_type.filename().to_string(),
            source: source.to_path_buf(),
            size_bytes: metadata.len(),
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        // Update or add model info
        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

fn serde_plain_name(model_type: ModelType) -> &'static str {
    match model_type {
        ModelType::Detection => "detection",
        ModelType::Recognition => "recognition",
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            input_names,
        })
    }

    /// Run the model on one f32 tensor; returns the first output's shape and data
    pub fn run_single(&mut self, shape: Vec<usize>, data: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let input_name = self
            .input_names
            .first()
            .cloned()
            .context("Model has no inputs")?;

        let input = Value::from_array((shape.as_slice(), data))?;
        let outputs = self.session.run(ort::inputs![input_name.as_str() => input])?;
        let (out_shape, out_data) = outputs[0].try_extract_tensor::<f32>()?;

        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }
}
