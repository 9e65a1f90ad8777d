//! Word fragment files
//!
//! Each word crop is saved as its own image. The file name encodes where
//! the word sits on the page, so a folder of fragments can be recognized
//! and reassembled later without any side data.

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions picked up when loading a fragment folder
const FRAGMENT_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Where a word crop came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMeta {
    /// Page identifier (file stem of the source image)
    pub source_id: String,
    /// Detector class of the enclosing region
    pub class_name: String,
    /// Index of the line in detection order
    pub line_index: u32,
    /// Index of the word within its line, left to right
    pub word_index: u32,
    /// Confidence of the enclosing detection
    pub confidence: f32,
}

impl FragmentMeta {
    /// `{source}_{class}_{line}_{word}_conf{confidence:.2}.{ext}`
    pub fn file_name(&self, ext: &str) -> String {
        format!(
            "{}_{}_{}_{}_conf{:.2}.{}",
            self.source_id, self.class_name, self.line_index, self.word_index, self.confidence, ext
        )
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey {
            line: self.line_index,
            word: self.word_index,
        }
    }
}

/// Page position recovered from a fragment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey {
    pub line: u32,
    pub word: u32,
}

impl FragmentKey {
    /// Parse `(line, word)` from an identifier shaped like
    /// [`FragmentMeta::file_name`]. Parts are read from the right, so source
    /// ids and class names may contain `_`. The trailing `conf` part is
    /// optional, and anything after a `.` or `conf` in the word part is
    /// ignored. At least one part (the class) must precede the line index.
    pub fn parse(identifier: &str) -> Option<Self> {
        let mut parts: Vec<&str> = identifier.split('_').collect();
        if parts.len() > 3 && parts.last()?.starts_with("conf") {
            parts.pop();
        }
        if parts.len() < 3 {
            return None;
        }

        let word_part = parts.pop()?;
        let word_part = word_part.split("conf").next()?;
        let word = word_part.split('.').next()?.parse().ok()?;
        let line = parts.pop()?.parse().ok()?;

        Some(Self { line, word })
    }
}

/// Writes and reads fragment images in one directory
pub struct FragmentStore {
    dir: PathBuf,
    extension: String,
    format: ImageFormat,
}

impl FragmentStore {
    /// Store writing `extension` images (e.g. "png") into `dir`
    pub fn new(dir: &Path, extension: &str) -> Result<Self> {
        let format = ImageFormat::from_extension(extension)
            .with_context(|| format!("Unsupported fragment image format {:?}", extension))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create fragment directory {:?}", dir))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
            format,
        })
    }

    /// Path a fragment with this metadata is written to
    pub fn path_for(&self, meta: &FragmentMeta) -> PathBuf {
        self.dir.join(meta.file_name(&self.extension))
    }

    /// Save one crop
    pub fn write(&self, meta: &FragmentMeta, crop: &GrayImage) -> Result<PathBuf> {
        let path = self.path_for(meta);
        crop.save_with_format(&path, self.format)
            .with_context(|| format!("Failed to write fragment {:?}", path))?;
        debug!("Wrote fragment {:?}", path);
        Ok(path)
    }
}

/// Load every fragment image in `dir` as grayscale, keyed by file name,
/// sorted by name. Unreadable files are skipped with a warning.
pub fn load_fragments(dir: &Path) -> Result<Vec<(String, GrayImage)>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list fragment directory {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAGMENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    names.sort();

    let mut fragments = Vec::with_capacity(names.len());
    for name in names {
        match image::open(dir.join(&name)) {
            Ok(img) => fragments.push((name, img.to_luma8())),
            Err(e) => warn!("Skipping unreadable fragment {}: {}", name, e),
        }
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detection::TEXTLINE_CLASS;
    use image::Luma;
    use tempfile::TempDir;

    fn meta(line: u32, word: u32) -> FragmentMeta {
        FragmentMeta {
            source_id: "page".to_string(),
            class_name: TEXTLINE_CLASS.to_string(),
            line_index: line,
            word_index: word,
            confidence: 0.876,
        }
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(meta(3, 12).file_name("png"), "page_textline_3_12_conf0.88.png");
    }

    #[test]
    fn test_parse_round_trips_file_name() {
        let m = meta(3, 12);
        assert_eq!(FragmentKey::parse(&m.file_name("png")), Some(m.key()));
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            FragmentKey::parse("scan_01_textline_2_7.jpg"),
            Some(FragmentKey { line: 2, word: 7 })
        );
        assert_eq!(
            FragmentKey::parse("a_textline_0_4conf0.5.png"),
            Some(FragmentKey { line: 0, word: 4 })
        );
    }

    #[test]
    fn test_parse_any_class_name() {
        let m = FragmentMeta {
            class_name: "line".to_string(),
            line_index: 1,
            word_index: 0,
            confidence: 0.9,
            ..meta(0, 0)
        };
        assert_eq!(m.file_name("png"), "page_line_1_0_conf0.90.png");
        assert_eq!(FragmentKey::parse(&m.file_name("png")), Some(FragmentKey { line: 1, word: 0 }));
    }

    #[test]
    fn test_parse_ignores_source_id_contents() {
        assert_eq!(
            FragmentKey::parse("textline_scan_textline_0_2_conf0.90.png"),
            Some(FragmentKey { line: 0, word: 2 })
        );
        assert_eq!(
            FragmentKey::parse("scan_2024_05_textline_3_4_conf0.50.png"),
            Some(FragmentKey { line: 3, word: 4 })
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(FragmentKey::parse("photo.png"), None);
        assert_eq!(FragmentKey::parse("x_textline_a_1.png"), None);
        assert_eq!(FragmentKey::parse("x_textline_1"), None);
        assert_eq!(FragmentKey::parse("x_textline_1_.png"), None);
        assert_eq!(FragmentKey::parse("2_7.png"), None);
    }

    #[test]
    fn test_key_ordering() {
        let a = FragmentKey { line: 1, word: 9 };
        let b = FragmentKey { line: 2, word: 0 };
        assert!(a < b);
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FragmentStore::new(dir.path(), "png").unwrap();

        let crop = GrayImage::from_pixel(12, 8, Luma([40]));
        let path = store.write(&meta(0, 1), &crop).unwrap();
        assert!(path.is_file());
        store.write(&meta(0, 0), &crop).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();

        let loaded = load_fragments(dir.path()).unwrap();
        let names: Vec<&str> = loaded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["page_textline_0_0_conf0.88.png", "page_textline_0_1_conf0.88.png"]
        );
        assert_eq!(loaded[0].1.dimensions(), (12, 8));
        assert_eq!(loaded[0].1.get_pixel(3, 3).0[0], 40);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(FragmentStore::new(dir.path(), "xyz").is_err());
    }
}
