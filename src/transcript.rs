//! Transcript assembly
//!
//! Recognized words arrive in any order (batches, folder listings) and are
//! put back in page order by their fragment position before being joined
//! into lines.

use anyhow::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use tracing::warn;

use crate::recognition::INVALID_MARKER;
use crate::storage::{FragmentKey, FragmentMeta};

/// Identifies the fragment a recognized word came from
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentId {
    /// Fragment produced by this crate's pipeline
    Meta(FragmentMeta),
    /// Bare identifier, typically a file name from a fragment folder
    Legacy(String),
}

impl FragmentId {
    /// Page position, if the identifier carries one
    pub fn key(&self) -> Option<FragmentKey> {
        match self {
            FragmentId::Meta(meta) => Some(meta.key()),
            FragmentId::Legacy(id) => FragmentKey::parse(id),
        }
    }

    /// Name used in the JSON record
    pub fn label(&self, extension: &str) -> String {
        match self {
            FragmentId::Meta(meta) => meta.file_name(extension),
            FragmentId::Legacy(id) => id.clone(),
        }
    }
}

/// Recognized text of a page, line by line
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Transcript {
    lines: Vec<Vec<String>>,
}

impl Transcript {
    pub fn lines(&self) -> &[Vec<String>] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Words joined by spaces, lines by newlines
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|words| words.join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Fragment label to recognized text, in page order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(pub Vec<(String, String)>);

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, text) in &self.0 {
            map.serialize_entry(label, text)?;
        }
        map.end()
    }
}

impl Record {
    /// Pretty JSON object with keys in page order
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Collects recognized words and orders them into a transcript
#[derive(Debug, Clone)]
pub struct TranscriptAssembler {
    entries: Vec<(FragmentId, String)>,
    extension: String,
}

impl TranscriptAssembler {
    /// `extension` is used to label structured fragments in the record
    pub fn new(extension: &str) -> Self {
        Self {
            entries: Vec::new(),
            extension: extension.to_string(),
        }
    }

    pub fn push(&mut self, id: FragmentId, text: String) {
        self.entries.push((id, text));
    }

    pub fn push_meta(&mut self, meta: FragmentMeta, text: String) {
        self.push(FragmentId::Meta(meta), text);
    }

    pub fn push_legacy(&mut self, id: impl Into<String>, text: String) {
        self.push(FragmentId::Legacy(id.into()), text);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries by `(line, word)`; identifiers without a position go last,
    /// in arrival order
    fn sorted(&self) -> Vec<(Option<FragmentKey>, &FragmentId, &str)> {
        let mut sorted: Vec<_> = self
            .entries
            .iter()
            .map(|(id, text)| (id.key(), id, text.as_str()))
            .collect();
        sorted.sort_by_key(|(key, _, _)| match key {
            Some(k) => (0u8, *k),
            None => (1u8, FragmentKey { line: 0, word: 0 }),
        });
        sorted
    }

    /// Sorted `(label, text)` pairs, including rejected words
    pub fn record(&self) -> Record {
        Record(
            self.sorted()
                .into_iter()
                .map(|(_, id, text)| (id.label(&self.extension), text.to_string()))
                .collect(),
        )
    }

    /// Group entries into lines. Rejected and empty words are dropped, but
    /// a line whose words were all dropped still appears (empty).
    pub fn assemble(&self) -> Transcript {
        let mut lines: Vec<Vec<String>> = Vec::new();
        let mut current_line: Option<u32> = None;

        for (key, id, text) in self.sorted() {
            let Some(key) = key else {
                warn!(
                    "Fragment {:?} has no line position, left out of the transcript",
                    id.label(&self.extension)
                );
                continue;
            };

            if current_line != Some(key.line) {
                lines.push(Vec::new());
                current_line = Some(key.line);
            }
            if text != INVALID_MARKER && !text.is_empty() {
                if let Some(line) = lines.last_mut() {
                    line.push(text.to_string());
                }
            }
        }

        Transcript { lines }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::TEXTLINE_CLASS;

    fn meta(line: u32, word: u32) -> FragmentMeta {
        FragmentMeta {
            source_id: "p".to_string(),
            class_name: TEXTLINE_CLASS.to_string(),
            line_index: line,
            word_index: word,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_orders_by_line_then_word() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_meta(meta(1, 0), "мир".to_string());
        asm.push_meta(meta(0, 1), "вам".to_string());
        asm.push_meta(meta(0, 0), "привет".to_string());
        asm.push_meta(meta(1, 1), "труд".to_string());

        let transcript = asm.assemble();
        assert_eq!(transcript.text(), "привет вам\nмир труд");
        assert_eq!(transcript.lines().len(), 2);
    }

    #[test]
    fn test_numeric_not_lexicographic_order() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_legacy("p_textline_0_10_conf0.90.png", "десять".to_string());
        asm.push_legacy("p_textline_0_2_conf0.90.png", "два".to_string());
        assert_eq!(asm.assemble().text(), "два десять");
    }

    #[test]
    fn test_legacy_ids_with_other_class_or_source_prefix() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_legacy("scan_line_1_0_conf0.90.png", "мир".to_string());
        asm.push_legacy("textline_scan_textline_0_2_conf0.90.png", "привет".to_string());
        assert_eq!(asm.assemble().text(), "привет\nмир");
    }

    #[test]
    fn test_unparseable_ids_sort_last_and_stay_stable() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_legacy("zeta.png", "z".to_string());
        asm.push_legacy("p_textline_1_0.png", "b".to_string());
        asm.push_legacy("alpha.png", "a".to_string());
        asm.push_legacy("p_textline_0_0.png", "a0".to_string());

        let labels: Vec<String> = asm.record().0.into_iter().map(|(l, _)| l).collect();
        assert_eq!(
            labels,
            vec!["p_textline_0_0.png", "p_textline_1_0.png", "zeta.png", "alpha.png"]
        );
        assert_eq!(asm.assemble().text(), "a0\nb");
    }

    #[test]
    fn test_invalid_words_dropped_but_line_kept() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_meta(meta(0, 0), "один".to_string());
        asm.push_meta(meta(1, 0), INVALID_MARKER.to_string());
        asm.push_meta(meta(2, 0), "три".to_string());
        asm.push_meta(meta(2, 1), INVALID_MARKER.to_string());

        let transcript = asm.assemble();
        assert_eq!(transcript.text(), "один\n\nтри");
        assert_eq!(asm.record().0.len(), 4);
    }

    #[test]
    fn test_empty_words_leave_no_stray_spaces() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_meta(meta(0, 0), "один".to_string());
        asm.push_meta(meta(0, 1), String::new());
        asm.push_meta(meta(0, 2), "два".to_string());
        asm.push_meta(meta(1, 0), String::new());

        assert_eq!(asm.assemble().text(), "один два\n");
        assert_eq!(asm.record().0.len(), 4);
    }

    #[test]
    fn test_empty_transcript() {
        let asm = TranscriptAssembler::new("png");
        assert!(asm.is_empty());
        let transcript = asm.assemble();
        assert!(transcript.is_empty());
        assert_eq!(transcript.text(), "");
        assert_eq!(asm.record().to_json_string().unwrap(), "{}");
    }

    #[test]
    fn test_json_record_keeps_page_order() {
        let mut asm = TranscriptAssembler::new("png");
        asm.push_meta(meta(1, 0), "б".to_string());
        asm.push_meta(meta(0, 0), "а".to_string());

        let json = asm.record().to_json_string().unwrap();
        let first = json.find("p_textline_0_0_conf1.00.png").unwrap();
        let second = json.find("p_textline_1_0_conf1.00.png").unwrap();
        assert!(first < second);
        assert!(json.contains("\"а\""));
    }
}
