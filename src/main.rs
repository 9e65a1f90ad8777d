//! Scriptor command line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scriptor::config::{self, AppConfig};
use scriptor::grading::AnswerGrader;
use scriptor::pipeline::{recognize_folder, PagePipeline, PageSource};
use scriptor::recognition::{filter_for, AcceptAll, OnnxRecognizer, Tokenizer, ValidityFilter};
use scriptor::storage;
use scriptor::transcript::Record;
use scriptor::vision::{
    Detector, LineSegmenter, ModelManager, ModelType, OnnxDetector, ProjectionDetector,
};

/// Scriptor - handwritten page transcription
#[derive(Parser, Debug)]
#[command(name = "scriptor")]
#[command(about = "Transcribe handwritten pages with ONNX line detection and CTC recognition")]
struct Cli {
    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to the config directory and exit
    #[arg(long)]
    save_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe one page image (`-` reads it from stdin)
    Ocr {
        image: PathBuf,

        /// Use projection line segmentation instead of the detection model
        #[arg(long)]
        lines_only: bool,

        /// Recognition model file
        #[arg(long)]
        model: Option<PathBuf>,

        /// Detection model file
        #[arg(long)]
        detector_model: Option<PathBuf>,

        /// Write the fragment-to-text record as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Directory for annotated pages and kept fragments
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Minimum detection confidence
        #[arg(long)]
        conf_threshold: Option<f32>,

        /// Duplicate suppression overlap threshold
        #[arg(long)]
        overlap_threshold: Option<f32>,

        /// Keep word fragments under the output directory
        #[arg(long)]
        keep_fragments: bool,

        /// Keep every recognized word, even implausible ones
        #[arg(long)]
        no_filter: bool,

        /// Parent directory for temporary fragment directories
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Split a page into word fragment images without recognizing them
    Segment {
        image: PathBuf,

        /// Directory to write fragments into
        #[arg(short, long, default_value = "fragments")]
        output_dir: PathBuf,

        /// Use projection line segmentation instead of the detection model
        #[arg(long)]
        lines_only: bool,

        /// Detection model file
        #[arg(long)]
        detector_model: Option<PathBuf>,
    },

    /// Recognize a folder of previously exported word fragments
    Recognize {
        dir: PathBuf,

        /// Recognition model file
        #[arg(long)]
        model: Option<PathBuf>,

        /// Write the fragment-to-text record as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Keep every recognized word, even implausible ones
        #[arg(long)]
        no_filter: bool,
    },

    /// Compare a student answer against a reference answer
    Grade {
        #[arg(long)]
        answer: String,

        #[arg(long)]
        reference: String,
    },

    /// Show or install models
    Models {
        #[command(subcommand)]
        action: Option<ModelsAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    /// List model status (default)
    List,
    /// Copy a model file into the models directory
    Install { kind: ModelKind, file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModelKind {
    Detection,
    Recognition,
}

impl From<ModelKind> for ModelType {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Detection => ModelType::Detection,
            ModelKind::Recognition => ModelType::Recognition,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = load_or_create_config(cli.config.as_deref())?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }
    if cli.save_config {
        let path = storage::get_config_dir()?.join("config.toml");
        config::save_config(&config, &path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let Some(command) = cli.command else {
        bail!("No command given, see --help");
    };

    match command {
        Command::Ocr {
            image,
            lines_only,
            model,
            detector_model,
            json,
            output_dir,
            conf_threshold,
            overlap_threshold,
            keep_fragments,
            no_filter,
            work_dir,
        } => {
            let mut config = config;
            if let Some(path) = model {
                config.recognition.model_path = Some(path);
            }
            if let Some(path) = detector_model {
                config.detection.model_path = Some(path);
            }
            if let Some(dir) = output_dir {
                config.output.output_dir = dir;
            }
            if let Some(value) = conf_threshold {
                config.segmentation.conf_threshold = value;
            }
            if let Some(value) = overlap_threshold {
                config.segmentation.overlap_threshold = value;
            }
            config.output.keep_fragments |= keep_fragments;
            let options = OcrOptions {
                lines_only,
                no_filter,
                json,
                work_dir,
            };
            run_ocr(config, &image, &options)
        }
        Command::Segment {
            image,
            output_dir,
            lines_only,
            detector_model,
        } => {
            let mut config = config;
            if let Some(path) = detector_model {
                config.detection.model_path = Some(path);
            }
            run_segment(config, &image, &output_dir, lines_only)
        }
        Command::Recognize {
            dir,
            model,
            json,
            no_filter,
        } => {
            let mut config = config;
            if let Some(path) = model {
                config.recognition.model_path = Some(path);
            }
            run_recognize(&config, &dir, json.as_deref(), no_filter)
        }
        Command::Grade { answer, reference } => {
            let result = AnswerGrader::new(config.grading).grade(&answer, &reference);
            println!("{}", result);
            Ok(())
        }
        Command::Models { action } => run_models(action.unwrap_or(ModelsAction::List)),
    }
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Pick the line detector: the ONNX model when one is configured or
/// installed, projection segmentation otherwise
fn build_detector(config: &AppConfig, lines_only: bool) -> Result<Box<dyn Detector>> {
    let projection = || -> Box<dyn Detector> {
        Box::new(ProjectionDetector::new(LineSegmenter::new(config.lines.clone())))
    };

    if lines_only {
        info!("Using projection line segmentation");
        return Ok(projection());
    }

    let manager = ModelManager::new()?;
    let explicit = config.detection.model_path.as_deref();
    if explicit.is_none() && !manager.is_model_available(ModelType::Detection) {
        warn!("No detection model installed, falling back to projection line segmentation");
        return Ok(projection());
    }

    let path = manager.ensure_model(ModelType::Detection, explicit)?;
    Ok(Box::new(OnnxDetector::new(&path, &config.detection)?))
}

fn build_recognizer(config: &AppConfig) -> Result<OnnxRecognizer> {
    let manager = ModelManager::new()?;
    let path = manager.ensure_model(ModelType::Recognition, config.recognition.model_path.as_deref())?;
    let num_classes = Tokenizer::new(&config.recognition.alphabet).num_classes();
    OnnxRecognizer::new(&path, &config.recognition, num_classes)
}

fn write_record(record: &Record, path: &Path) -> Result<()> {
    let json = record.to_json_string()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Record written to {:?}", path);
    Ok(())
}

fn validity_filter(config: &AppConfig, no_filter: bool) -> Box<dyn ValidityFilter> {
    if no_filter {
        Box::new(AcceptAll)
    } else {
        filter_for(&config.recognition)
    }
}

/// Page from a file, or from stdin when the path is `-`
fn page_source(image: &Path) -> Result<PageSource> {
    if image != Path::new("-") {
        return Ok(PageSource::Path(image.to_path_buf()));
    }
    let mut data = Vec::new();
    std::io::stdin()
        .read_to_end(&mut data)
        .context("Failed to read page from stdin")?;
    Ok(PageSource::Bytes {
        data,
        source_id: "stdin".to_string(),
    })
}

struct OcrOptions {
    lines_only: bool,
    no_filter: bool,
    json: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

fn run_ocr(config: AppConfig, image: &Path, options: &OcrOptions) -> Result<()> {
    let source = page_source(image)?;
    let detector = build_detector(&config, options.lines_only)?;
    let mut recognizer = build_recognizer(&config)?;
    let validity = validity_filter(&config, options.no_filter);

    let mut pipeline = PagePipeline::new(config, detector).with_validity(validity);
    if let Some(dir) = &options.work_dir {
        pipeline = pipeline.with_work_root(dir.clone());
    }

    let outcome = pipeline.run(&source, &mut recognizer);
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    info!("{}", outcome.message);

    if let Some(path) = &options.json {
        write_record(&outcome.record, path)?;
    }
    if let Some(annotated) = &outcome.annotated {
        info!("Annotated page: {:?}", annotated);
    }

    println!("{}", outcome.transcript);
    Ok(())
}

fn run_segment(config: AppConfig, image: &Path, output_dir: &Path, lines_only: bool) -> Result<()> {
    let detector = build_detector(&config, lines_only)?;
    let mut pipeline = PagePipeline::new(config, detector);

    let segmentation = pipeline.export_fragments(&page_source(image)?, output_dir)?;
    println!(
        "{} lines, {} word fragments written to {}",
        segmentation.lines.len(),
        segmentation.words.len(),
        output_dir.display()
    );
    Ok(())
}

fn run_recognize(config: &AppConfig, dir: &Path, json: Option<&Path>, no_filter: bool) -> Result<()> {
    let mut recognizer = build_recognizer(config)?;
    let validity = validity_filter(config, no_filter);
    let (transcript, record) = recognize_folder(config, &mut recognizer, validity.as_ref(), dir)?;

    if let Some(path) = json {
        write_record(&record, path)?;
    }
    println!("{}", transcript);
    Ok(())
}

fn run_models(action: ModelsAction) -> Result<()> {
    let manager = ModelManager::new()?;

    match action {
        ModelsAction::List => {
            println!("Models directory: {}", manager.models_dir().display());
            for (model_type, available, size) in manager.get_model_status() {
                let state = match (available, size) {
                    (true, Some(bytes)) => format!("installed ({:.1} MB)", bytes as f64 / 1_048_576.0),
                    _ => "missing".to_string(),
                };
                println!("  {:<26} {:<10} {}", model_type.display_name(), model_type.filename(), state);
            }
        }
        ModelsAction::Install { kind, file } => {
            if !file.is_file() {
                bail!("Model file {:?} does not exist", file);
            }
            let path = manager.install(kind.into(), &file)?;
            println!("Installed {}", path.display());
        }
    }
    Ok(())
}
