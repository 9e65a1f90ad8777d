//! Answer comparison
//!
//! Compares a recognized student answer with a reference answer in stages,
//! cheapest first: exact match after normalization, edit-distance
//! similarity of the whole text, sentence-by-sentence edit-distance
//! matching, and finally an optional semantic similarity model.

use anyhow::Result;
use std::fmt;
use tracing::{debug, warn};

use crate::config::GradingConfig;

/// Characters kept by [`normalize`] besides letters, digits and spaces
const KEEP_SYMBOLS: &str = "+-x/=";

/// Scores how close two texts are in meaning, 0.0 - 1.0
pub trait SemanticScorer {
    fn similarity(&self, a: &str, b: &str) -> Result<f64>;
}

/// Stage that decided the comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Exact,
    Fuzzy,
    FuzzySentences,
    SemanticAllSentences,
    SemanticAnySentence,
    Semantic,
    NoMatch,
}

/// Outcome of comparing an answer with the reference
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GradeResult {
    /// Whether the answer is accepted
    pub verdict: bool,
    pub stage: MatchStage,
    /// Similarity that decided the stage (best edit similarity on no match)
    pub score: f64,
}

impl fmt::Display for GradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            MatchStage::Exact => write!(f, "Exact match"),
            MatchStage::Fuzzy => write!(f, "Fuzzy ({:.0}%)", self.score * 100.0),
            MatchStage::FuzzySentences => write!(f, "Fuzzy (sentences)"),
            MatchStage::SemanticAllSentences => write!(f, "Semantic (all sentences)"),
            MatchStage::SemanticAnySentence => write!(f, "Semantic (any sentence)"),
            MatchStage::Semantic => write!(f, "Semantic ({:.2})", self.score),
            MatchStage::NoMatch => write!(f, "No match"),
        }
    }
}

fn fold_symbols(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            'ё' => out.push('е'),
            '²' => out.push('2'),
            '³' => out.push('3'),
            '°' => out.push_str(" градусов "),
            '×' => out.push('x'),
            '÷' => out.push('/'),
            _ => out.push(c),
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, fold `ё` and math symbols, drop punctuation other than
/// `+-x/=`, collapse whitespace
pub fn normalize(text: &str) -> String {
    let kept: String = fold_symbols(text)
        .chars()
        .filter(|&c| {
            c.is_alphanumeric() || c == '_' || c.is_whitespace() || KEEP_SYMBOLS.contains(c)
        })
        .collect();
    collapse_whitespace(&kept)
}

/// Lighter normalization for the semantic model: punctuation is kept and
/// a leading `вариант N:` label is removed
pub fn soft_normalize(text: &str) -> String {
    let folded = fold_symbols(text);
    let trimmed = folded.trim_start();
    let without_label = trimmed
        .strip_prefix("вариант")
        .map(|rest| rest.trim_start())
        .and_then(|rest| {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            (digits > 0).then(|| &rest[digits..])
        })
        .and_then(|rest| rest.trim_start().strip_prefix(':'))
        .unwrap_or(trimmed);
    collapse_whitespace(without_label)
}

/// Split after `.`, `!`, `?` or `…` followed by whitespace; sentences
/// shorter than `min_len` characters are dropped
pub fn split_sentences(text: &str, min_len: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_end = matches!(c, '.' | '!' | '?' | '…');
        if at_end && chars.peek().is_some_and(|n| n.is_whitespace()) {
            sentences.push(std::mem::take(&mut current));
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    sentences
        .into_iter()
        .filter(|s| s.trim().chars().count() >= min_len)
        .collect()
}

/// Normalized Levenshtein similarity, 0.0 - 1.0
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Staged answer comparison
pub struct AnswerGrader {
    config: GradingConfig,
    semantic: Option<Box<dyn SemanticScorer>>,
}

impl AnswerGrader {
    pub fn new(config: GradingConfig) -> Self {
        Self {
            config,
            semantic: None,
        }
    }

    /// Enable the semantic stages
    pub fn with_semantic(mut self, scorer: Box<dyn SemanticScorer>) -> Self {
        self.semantic = Some(scorer);
        self
    }

    /// True when every student sentence matches a distinct reference
    /// sentence above the fuzzy threshold
    pub fn fuzzy_match_sentences(&self, student: &[String], reference: &[String]) -> bool {
        let reference: Vec<String> = reference.iter().map(|s| normalize(s)).collect();
        let mut used = vec![false; reference.len()];

        student.iter().all(|sentence| {
            let sentence = normalize(sentence);
            let hit = reference.iter().enumerate().position(|(i, r)| {
                !used[i] && edit_similarity(&sentence, r) > self.config.fuzzy_threshold
            });
            match hit {
                Some(i) => {
                    used[i] = true;
                    true
                }
                None => false,
            }
        })
    }

    fn semantic_score(&self, scorer: &dyn SemanticScorer, a: &str, b: &str) -> f64 {
        scorer.similarity(a, b).unwrap_or_else(|e| {
            warn!("Semantic comparison failed: {:#}", e);
            0.0
        })
    }

    /// Compare `student` with `reference`
    pub fn grade(&self, student: &str, reference: &str) -> GradeResult {
        let norm_student = normalize(student);
        let norm_reference = normalize(reference);

        if norm_student == norm_reference {
            return GradeResult {
                verdict: true,
                stage: MatchStage::Exact,
                score: 1.0,
            };
        }

        let fuzzy = edit_similarity(&norm_student, &norm_reference);
        debug!("Whole-text edit similarity {:.3}", fuzzy);
        if fuzzy > self.config.fuzzy_threshold {
            return GradeResult {
                verdict: true,
                stage: MatchStage::Fuzzy,
                score: fuzzy,
            };
        }

        let min_len = self.config.min_sentence_length;
        let student_sents = split_sentences(student, min_len);
        let reference_sents = split_sentences(reference, min_len);
        let threshold = self.config.semantic_threshold;

        if student_sents.len() > 1 || reference_sents.len() > 1 {
            if self.fuzzy_match_sentences(&student_sents, &reference_sents) {
                return GradeResult {
                    verdict: true,
                    stage: MatchStage::FuzzySentences,
                    score: fuzzy,
                };
            }

            if let Some(scorer) = self.semantic.as_deref() {
                let best_per_sentence: Vec<f64> = student_sents
                    .iter()
                    .map(|s| {
                        reference_sents
                            .iter()
                            .map(|r| self.semantic_score(scorer, s, r))
                            .fold(0.0, f64::max)
                    })
                    .collect();

                if !best_per_sentence.is_empty() {
                    let worst = best_per_sentence.iter().copied().fold(f64::INFINITY, f64::min);
                    let best = best_per_sentence.iter().copied().fold(0.0, f64::max);
                    if worst > threshold {
                        return GradeResult {
                            verdict: true,
                            stage: MatchStage::SemanticAllSentences,
                            score: worst,
                        };
                    }
                    if best > threshold {
                        return GradeResult {
                            verdict: true,
                            stage: MatchStage::SemanticAnySentence,
                            score: best,
                        };
                    }
                }
            }
        }

        if let Some(scorer) = self.semantic.as_deref() {
            let similarity =
                self.semantic_score(scorer, &soft_normalize(student), &soft_normalize(reference));
            if similarity > threshold {
                return GradeResult {
                    verdict: true,
                    stage: MatchStage::Semantic,
                    score: similarity,
                };
            }
        }

        GradeResult {
            verdict: false,
            stage: MatchStage::NoMatch,
            score: fuzzy,
        }
    }
}

impl Default for AnswerGrader {
    fn default() -> Self {
        Self::new(GradingConfig::default())
    }
}
