//! Scriptor - handwritten page transcription
//!
//! Finds text lines on a scanned page, splits them into words, recognizes
//! each word with a CTC model and assembles the transcript in reading order.

pub mod config;
pub mod error;
pub mod grading;
pub mod pipeline;
pub mod recognition;
pub mod storage;
pub mod transcript;
pub mod vision;
