//! Character map and greedy CTC decoding
//!
//! Class 0 is the CTC blank, class 1 marks characters outside the alphabet,
//! and alphabet characters follow from class 2 in alphabet order.

use std::collections::HashMap;
use tracing::debug;

/// Blank class: no symbol emitted at this timestep
pub const BLANK: usize = 0;
/// Out-of-vocabulary class
pub const OOV: usize = 1;

/// Bijective mapping between alphabet characters and class ids
#[derive(Debug, Clone)]
pub struct CharMap {
    to_code: HashMap<char, usize>,
    to_char: Vec<Option<char>>,
}

impl CharMap {
    /// Build from an alphabet string. Repeated characters keep their first code.
    pub fn new(alphabet: &str) -> Self {
        let mut to_code = HashMap::new();
        let mut to_char = vec![None, None];

        for c in alphabet.chars() {
            if to_code.contains_key(&c) {
                debug!("Alphabet repeats {:?}, keeping first code", c);
                continue;
            }
            to_code.insert(c, to_char.len());
            to_char.push(Some(c));
        }

        Self { to_code, to_char }
    }

    /// Class id of a character, `OOV` if it is not in the alphabet
    pub fn code(&self, c: char) -> usize {
        self.to_code.get(&c).copied().unwrap_or(OOV)
    }

    /// Character of a class id; `None` for the reserved or unknown ids
    pub fn char(&self, code: usize) -> Option<char> {
        self.to_char.get(code).copied().flatten()
    }

    /// Number of classes including the two reserved ones
    pub fn num_classes(&self) -> usize {
        self.to_char.len()
    }
}

/// Encodes text to class ids and decodes best-path model output
#[derive(Debug, Clone)]
pub struct Tokenizer {
    map: CharMap,
}

impl Tokenizer {
    pub fn new(alphabet: &str) -> Self {
        Self {
            map: CharMap::new(alphabet),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.map.num_classes()
    }

    /// Class ids for each character of `text`
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.chars().map(|c| self.map.code(c)).collect()
    }

    /// Collapse a per-timestep best-path sequence into text.
    ///
    /// A timestep emits nothing when it is blank, out-of-vocabulary, or
    /// repeats the previous timestep's id. Repeats are compared against the
    /// raw previous id, so `[A, OOV, A]` yields `AA` while `[A, A]` yields `A`.
    pub fn decode(&self, ids: &[usize]) -> String {
        let mut text = String::with_capacity(ids.len());
        let mut prev: Option<usize> = None;

        for &id in ids {
            let repeated = prev == Some(id);
            prev = Some(id);
            if id == BLANK || id == OOV || repeated {
                continue;
            }
            match self.map.char(id) {
                Some(c) => text.push(c),
                None => debug!("Class id {} outside the character map, skipped", id),
            }
        }

        text
    }

    /// Decode every sequence of a batch
    pub fn decode_batch(&self, batch: &[Vec<usize>]) -> Vec<String> {
        batch.iter().map(|ids| self.decode(ids)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab() -> Tokenizer {
        Tokenizer::new("AB")
    }

    #[test]
    fn test_codes_start_at_two() {
        let map = CharMap::new("AB");
        assert_eq!(map.code('A'), 2);
        assert_eq!(map.code('B'), 3);
        assert_eq!(map.code('Z'), OOV);
        assert_eq!(map.char(BLANK), None);
        assert_eq!(map.char(OOV), None);
        assert_eq!(ab().num_classes(), 4);
    }

    #[test]
    fn test_collapsing_law() {
        let t = ab();
        assert_eq!(t.decode(&[0, 2, 2, 0, 3, 3, 3, 0]), "AB");
        assert_eq!(t.decode(&[2, 2, 2, 2]), "A");
        assert_eq!(t.decode(&[1, 2, 1, 3]), "AB");
    }

    #[test]
    fn test_blank_separates_repeats() {
        let t = ab();
        assert_eq!(t.decode(&[2, 0, 2]), "AA");
        assert_eq!(t.decode(&[2, 1, 2]), "AA");
        assert_eq!(t.decode(&[]), "");
        assert_eq!(t.decode(&[0, 0, 1, 1]), "");
    }

    #[test]
    fn test_decode_is_pure() {
        let t = Tokenizer::new(crate::config::DEFAULT_ALPHABET);
        let ids = t.encode("привет мир");
        assert_eq!(t.decode(&ids), t.decode(&ids));
    }

    #[test]
    fn test_encode_decode_cyrillic() {
        let t = Tokenizer::new(crate::config::DEFAULT_ALPHABET);
        let ids = t.encode("дом 12");
        assert!(ids.iter().all(|&id| id >= 2));
        assert_eq!(t.decode(&ids), "дом 12");
        assert_eq!(t.encode("Q"), vec![OOV]);
    }

    #[test]
    fn test_unknown_id_skipped() {
        let t = ab();
        assert_eq!(t.decode(&[2, 99, 3]), "AB");
    }

    #[test]
    fn test_decode_batch() {
        let t = ab();
        let out = t.decode_batch(&[vec![2, 3], vec![3, 3, 0, 2]]);
        assert_eq!(out, vec!["AB".to_string(), "BA".to_string()]);
    }
}
