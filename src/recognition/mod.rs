//! Recognition Layer
//!
//! Turns word crops into text: fixed-size tensor preprocessing, model
//! execution behind the [`Recognizer`] trait, greedy CTC decoding and
//! plausibility screening of the decoded words.

pub mod onnx;
pub mod preprocess;
pub mod tokenizer;
pub mod validity;

pub use onnx::{best_path, OnnxRecognizer, Recognizer};
pub use preprocess::{preprocess_batch, InputShape};
pub use tokenizer::{CharMap, Tokenizer, BLANK, OOV};
pub use validity::{filter_for, AcceptAll, PlausibleWordFilter, ValidityFilter, INVALID_MARKER};
