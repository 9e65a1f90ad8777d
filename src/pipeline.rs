//! Page pipeline
//!
//! Runs one page through detection, word splitting, fragment export,
//! recognition and transcript assembly.

use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{OcrError, Result};
use crate::recognition::{filter_for, Recognizer, Tokenizer, ValidityFilter};
use crate::storage::fragments::load_fragments;
use crate::storage::{FragmentMeta, FragmentStore, WorkDir};
use crate::transcript::{Record, Transcript, TranscriptAssembler};
use crate::vision::binarize::{stretch_vertical, to_gray};
use crate::vision::{
    filter_duplicates, sort_reading_order, threshold_candidates, BoundingBox, Detector,
    WordSplitter,
};

const LINE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const WORD_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// A page to process
#[derive(Debug, Clone)]
pub enum PageSource {
    /// Image file on disk; the file stem becomes the source id
    Path(PathBuf),
    /// Encoded image bytes (PNG, JPEG, ...)
    Bytes { data: Vec<u8>, source_id: String },
}

impl PageSource {
    pub fn source_id(&self) -> String {
        match self {
            PageSource::Path(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "page".to_string()),
            PageSource::Bytes { source_id, .. } => source_id.clone(),
        }
    }

    /// Read and decode the page
    pub fn load(&self) -> Result<DynamicImage> {
        match self {
            PageSource::Path(path) => {
                if !path.is_file() {
                    return Err(OcrError::MissingInput(format!(
                        "image file {:?} does not exist",
                        path
                    )));
                }
                let data = std::fs::read(path).map_err(|source| OcrError::ImageRead {
                    path: path.clone(),
                    source,
                })?;
                Ok(image::load_from_memory(&data)?)
            }
            PageSource::Bytes { data, source_id } => {
                if data.is_empty() {
                    return Err(OcrError::MissingInput(format!(
                        "no image data for {:?}",
                        source_id
                    )));
                }
                Ok(image::load_from_memory(data)?)
            }
        }
    }
}

/// A word crop ready for recognition
#[derive(Debug, Clone)]
pub struct WordFragment {
    pub meta: FragmentMeta,
    /// Word box in page coordinates
    pub bbox: BoundingBox,
    pub crop: GrayImage,
}

/// Lines and words found on one page
#[derive(Debug, Clone, Default)]
pub struct PageSegmentation {
    pub source_id: String,
    /// Line boxes in detection order, page coordinates
    pub lines: Vec<BoundingBox>,
    /// Word fragments in reading order
    pub words: Vec<WordFragment>,
}

/// Result of running the pipeline on one page
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub success: bool,
    /// Human-readable summary or failure reason
    pub message: String,
    pub transcript: Transcript,
    /// Fragment label to recognized text, in page order
    pub record: Record,
    /// Fragments that were written and recognized
    pub fragments: Vec<FragmentMeta>,
    pub lines: Vec<BoundingBox>,
    /// Annotated page, if one was written
    pub annotated: Option<PathBuf>,
}

impl PipelineOutcome {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            ..Self::default()
        }
    }
}

/// Page pipeline over a detector
pub struct PagePipeline<D: Detector> {
    config: AppConfig,
    detector: D,
    splitter: WordSplitter,
    tokenizer: Tokenizer,
    validity: Box<dyn ValidityFilter>,
    work_root: PathBuf,
}

impl<D: Detector> PagePipeline<D> {
    pub fn new(config: AppConfig, detector: D) -> Self {
        Self {
            splitter: WordSplitter::new(&config.segmentation),
            tokenizer: Tokenizer::new(&config.recognition.alphabet),
            validity: filter_for(&config.recognition),
            work_root: std::env::temp_dir(),
            detector,
            config,
        }
    }

    /// Replace the word validity filter
    pub fn with_validity(mut self, validity: Box<dyn ValidityFilter>) -> Self {
        self.validity = validity;
        self
    }

    /// Directory under which temporary work directories are created
    pub fn with_work_root(mut self, root: PathBuf) -> Self {
        self.work_root = root;
        self
    }

    /// Find lines and words on a decoded page
    pub fn segment(&mut self, page: &DynamicImage, source_id: &str) -> Result<PageSegmentation> {
        let seg = &self.config.segmentation;
        let gray = to_gray(page);
        let (page_w, page_h) = gray.dimensions();

        let stretched = stretch_vertical(&gray, seg.scale_coeff);
        let candidates = self
            .detector
            .detect(&stretched)
            .map_err(|e| OcrError::Detection(format!("{e:#}")))?;
        let found = candidates.len();

        let mut regions = filter_duplicates(
            threshold_candidates(candidates, seg.conf_threshold),
            seg.overlap_threshold,
        );
        regions.sort_by_key(|c| (c.bbox.y1, c.bbox.x1));
        debug!("{} candidates, {} regions after filtering", found, regions.len());

        let mut segmentation = PageSegmentation {
            source_id: source_id.to_string(),
            ..PageSegmentation::default()
        };

        for (line_index, region) in regions.iter().enumerate() {
            let line = region.bbox.unscale_y(seg.scale_coeff);
            segmentation.lines.push(line);

            let words = sort_reading_order(
                &self.splitter.split(&gray, line),
                seg.line_overlap_threshold,
            );

            for (word_index, word) in words.into_iter().enumerate() {
                let Some(bbox) = word.clamp_to(page_w, page_h) else {
                    debug!("Word {:?} falls outside the page, skipped", word);
                    continue;
                };
                let crop = imageops::crop_imm(
                    &gray,
                    bbox.x1 as u32,
                    bbox.y1 as u32,
                    bbox.width() as u32,
                    bbox.height() as u32,
                )
                .to_image();

                segmentation.words.push(WordFragment {
                    meta: FragmentMeta {
                        source_id: source_id.to_string(),
                        class_name: region.class_name.clone(),
                        line_index: line_index as u32,
                        word_index: word_index as u32,
                        confidence: region.confidence,
                    },
                    bbox,
                    crop,
                });
            }
        }

        info!(
            "Segmented {}: {} lines, {} words",
            source_id,
            segmentation.lines.len(),
            segmentation.words.len()
        );
        Ok(segmentation)
    }

    /// Write every fragment to `store`. Fragments that fail to write are
    /// logged and dropped from the segmentation.
    pub fn write_fragments(&self, segmentation: &mut PageSegmentation, store: &FragmentStore) {
        segmentation.words.retain(|word| match store.write(&word.meta, &word.crop) {
            Ok(_) => true,
            Err(e) => {
                warn!("Skipping fragment {:?}: {:#}", word.meta.file_name("?"), e);
                false
            }
        });
    }

    /// Page copy with line boxes in blue and word boxes in green
    pub fn annotate(&self, page: &DynamicImage, segmentation: &PageSegmentation) -> RgbImage {
        let mut canvas = page.to_rgb8();
        for rect in segmentation.lines.iter().filter_map(BoundingBox::to_rect) {
            draw_hollow_rect_mut(&mut canvas, rect, LINE_COLOR);
        }
        for rect in segmentation.words.iter().filter_map(|w| w.bbox.to_rect()) {
            draw_hollow_rect_mut(&mut canvas, rect, WORD_COLOR);
        }
        canvas
    }

    /// Save the annotated page into the output directory. Failures are
    /// logged; the annotation is a side artifact.
    pub fn save_annotated(
        &self,
        page: &DynamicImage,
        segmentation: &PageSegmentation,
    ) -> Option<PathBuf> {
        let output = &self.config.output;
        let path = output.output_dir.join(format!(
            "{}_annotated.{}",
            segmentation.source_id, output.image_format
        ));

        let saved = std::fs::create_dir_all(&output.output_dir)
            .map_err(image::ImageError::IoError)
            .and_then(|_| self.annotate(page, segmentation).save(&path));
        match saved {
            Ok(()) => {
                info!("Annotated page written to {:?}", path);
                Some(path)
            }
            Err(e) => {
                warn!("Could not write annotated page {:?}: {}", path, e);
                None
            }
        }
    }

    /// Recognize word fragments. Fragments the recognizer cannot handle
    /// are logged and skipped. Returns the assembler and the number of
    /// words that were not recognized.
    pub fn recognize(
        &self,
        recognizer: &mut dyn Recognizer,
        words: &[WordFragment],
    ) -> (TranscriptAssembler, usize) {
        let ext = &self.config.output.image_format;
        let crops: Vec<GrayImage> = words.iter().map(|w| w.crop.clone()).collect();
        let results = recognize_in_batches(recognizer, &crops, self.config.recognition.batch_size);

        let (recognized, sequences): (Vec<&WordFragment>, Vec<Vec<usize>>) = words
            .iter()
            .zip(results)
            .filter_map(|(word, ids)| ids.map(|ids| (word, ids)))
            .unzip();
        let skipped = words.len() - recognized.len();

        let mut assembler = TranscriptAssembler::new(ext);
        for (word, text) in recognized.into_iter().zip(self.tokenizer.decode_batch(&sequences)) {
            let text = self.validity.screen(text);
            debug!("{} -> {:?}", word.meta.file_name(ext), text);
            assembler.push_meta(word.meta.clone(), text);
        }

        (assembler, skipped)
    }

    /// Segment, export and recognize one page.
    ///
    /// Never panics on degenerate input: errors are reported through
    /// [`PipelineOutcome::success`] and the message.
    pub fn run(&mut self, source: &PageSource, recognizer: &mut dyn Recognizer) -> PipelineOutcome {
        match self.try_run(source, recognizer) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Page {} failed: {}", source.source_id(), e);
                PipelineOutcome::failure(e.to_string())
            }
        }
    }

    fn try_run(
        &mut self,
        source: &PageSource,
        recognizer: &mut dyn Recognizer,
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let source_id = source.source_id();
        let page = source.load()?;

        let mut segmentation = self.segment(&page, &source_id)?;
        let annotated = if self.config.output.annotate {
            self.save_annotated(&page, &segmentation)
        } else {
            None
        };

        if segmentation.lines.is_empty() {
            info!("No text lines found on {}", source_id);
            return Ok(PipelineOutcome {
                success: true,
                message: "No text found".to_string(),
                annotated,
                ..PipelineOutcome::default()
            });
        }

        let work = self.open_work_dir()?;
        let store = FragmentStore::new(work.path(), &self.config.output.image_format)
            .map_err(|e| OcrError::Config(format!("{e:#}")))?;
        self.write_fragments(&mut segmentation, &store);

        let (assembler, skipped) = self.recognize(recognizer, &segmentation.words);
        let transcript = assembler.assemble();
        let record = assembler.record();
        work.close();

        let recognized = segmentation.words.len() - skipped;
        let mut message = format!(
            "Recognized {} words on {} lines",
            recognized,
            segmentation.lines.len()
        );
        if skipped > 0 {
            message.push_str(&format!(" ({} words skipped)", skipped));
        }
        info!("{} in {:?}", message, start.elapsed());

        Ok(PipelineOutcome {
            success: true,
            message,
            transcript,
            record,
            fragments: segmentation.words.into_iter().map(|w| w.meta).collect(),
            lines: segmentation.lines,
            annotated,
        })
    }

    /// Segment a page and write its fragments into `dir`, which is kept
    pub fn export_fragments(&mut self, source: &PageSource, dir: &Path) -> Result<PageSegmentation> {
        let source_id = source.source_id();
        let page = source.load()?;

        let mut segmentation = self.segment(&page, &source_id)?;
        if self.config.output.annotate {
            self.save_annotated(&page, &segmentation);
        }

        let store = FragmentStore::new(dir, &self.config.output.image_format)
            .map_err(|e| OcrError::Config(format!("{e:#}")))?;
        self.write_fragments(&mut segmentation, &store);
        info!("Wrote {} fragments to {:?}", segmentation.words.len(), dir);

        Ok(segmentation)
    }

    fn open_work_dir(&self) -> Result<WorkDir> {
        let work = if self.config.output.keep_fragments {
            WorkDir::kept(&self.config.output.output_dir.join("fragments"))?
        } else {
            WorkDir::create(&self.work_root, &self.config.cleanup)?
        };
        debug!("Fragments go to {:?}", work.path());
        Ok(work)
    }
}

/// Run the recognizer over `crops` in batches of `batch_size`.
///
/// A batch that fails, or returns the wrong number of sequences, is retried
/// one crop at a time so a single bad crop only loses itself. The result
/// holds one entry per crop, `None` where recognition failed.
pub fn recognize_in_batches(
    recognizer: &mut dyn Recognizer,
    crops: &[GrayImage],
    batch_size: usize,
) -> Vec<Option<Vec<usize>>> {
    let mut results = Vec::with_capacity(crops.len());

    for (batch_index, batch) in crops.chunks(batch_size.max(1)).enumerate() {
        match run_batch(recognizer, batch) {
            Ok(sequences) => results.extend(sequences.into_iter().map(Some)),
            Err(e) if batch.len() > 1 => {
                warn!("Batch {} failed, retrying crop by crop: {:#}", batch_index, e);
                for crop in batch {
                    match run_batch(recognizer, std::slice::from_ref(crop)) {
                        Ok(mut sequences) => results.push(sequences.pop()),
                        Err(e) => {
                            warn!("Crop in batch {} skipped: {:#}", batch_index, e);
                            results.push(None);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Batch {} failed, skipped: {:#}", batch_index, e);
                results.push(None);
            }
        }
    }

    results
}

fn run_batch(recognizer: &mut dyn Recognizer, batch: &[GrayImage]) -> anyhow::Result<Vec<Vec<usize>>> {
    let sequences = recognizer.recognize_batch(batch)?;
    if sequences.len() != batch.len() {
        anyhow::bail!(
            "recognizer returned {} results for {} crops",
            sequences.len(),
            batch.len()
        );
    }
    Ok(sequences)
}

/// Recognize a folder of fragment images named like
/// [`FragmentMeta::file_name`] and assemble them into a transcript.
/// Unreadable files and crops the recognizer fails on are skipped.
pub fn recognize_folder(
    config: &AppConfig,
    recognizer: &mut dyn Recognizer,
    validity: &dyn ValidityFilter,
    dir: &Path,
) -> Result<(Transcript, Record)> {
    let fragments = load_fragments(dir).map_err(|e| OcrError::MissingInput(format!("{e:#}")))?;
    if fragments.is_empty() {
        return Err(OcrError::MissingInput(format!("no fragment images in {:?}", dir)));
    }
    let total = fragments.len();
    let (names, crops): (Vec<String>, Vec<GrayImage>) = fragments.into_iter().unzip();

    let results = recognize_in_batches(recognizer, &crops, config.recognition.batch_size);
    let (names, sequences): (Vec<String>, Vec<Vec<usize>>) = names
        .into_iter()
        .zip(results)
        .filter_map(|(name, ids)| ids.map(|ids| (name, ids)))
        .unzip();

    let tokenizer = Tokenizer::new(&config.recognition.alphabet);
    let mut assembler = TranscriptAssembler::new(&config.output.image_format);
    for (name, text) in names.into_iter().zip(tokenizer.decode_batch(&sequences)) {
        assembler.push_legacy(name, validity.screen(text));
    }

    info!("Recognized {} of {} fragments in {:?}", assembler.len(), total, dir);
    Ok((assembler.assemble(), assembler.record()))
}
