use std::collections::HashMap;

use indexmap::IndexSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matrix::SparseMatrix;

/// Width of the sliding character window.
pub const NGRAM_WIDTH: usize = 3;

/// Row normalization mode applied to every frequency vector.
///
/// Kept as plain data so a persisted vectorizer can be reconstructed without
/// reference to any particular linear-algebra backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// Euclidean norm of each nonzero row equals 1.0.
    L2,
}

/// Character-trigram vectorizer with a vocabulary frozen at fit time.
///
/// `fit` discovers the vocabulary from the indexed strings; `transform`
/// vectorizes new strings against that frozen vocabulary, silently dropping
/// any trigram it has never seen. Feature indices follow first-occurrence
/// discovery order, which is stable within one fit but otherwise
/// implementation-defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrigramVectorizer {
    vocabulary: IndexSet<Box<str>>,
    ngram_width: usize,
    norm: Normalization,
}

impl TrigramVectorizer {
    /// Builds the vocabulary from `strings` and returns it together with the
    /// normalized trigram-frequency matrix of shape
    /// `(strings.len(), vocabulary len)`.
    pub fn fit<S: AsRef<str>>(strings: &[S]) -> Result<(Self, SparseMatrix)> {
        let mut vocabulary: IndexSet<Box<str>> = IndexSet::new();
        let mut entries: Vec<(usize, usize, f32)> = Vec::new();
        let mut counts: HashMap<usize, u32> = HashMap::new();

        for (row, s) in strings.iter().enumerate() {
            counts.clear();
            for gram in char_ngrams(s.as_ref(), NGRAM_WIDTH) {
                let feature = match vocabulary.get_index_of(gram) {
                    Some(i) => i,
                    None => vocabulary.insert_full(Box::from(gram)).0,
                };
                *counts.entry(feature).or_insert(0) += 1;
            }
            for (feature, value) in normalized(&counts, Normalization::L2) {
                entries.push((row, feature, value));
            }
        }

        let shape = (strings.len(), vocabulary.len());
        let matrix = SparseMatrix::from_triplets(entries, shape)?;
        let vectorizer = TrigramVectorizer {
            vocabulary,
            ngram_width: NGRAM_WIDTH,
            norm: Normalization::L2,
        };
        Ok((vectorizer, matrix))
    }

    /// Vectorizes `strings` against the frozen vocabulary.
    ///
    /// The result always has the full vocabulary width, even when trailing
    /// features never occur in this batch. Trigrams absent from the
    /// vocabulary contribute nothing.
    pub fn transform<S: AsRef<str> + Sync>(&self, strings: &[S]) -> Result<SparseMatrix> {
        let rows: Vec<Vec<(usize, f32)>> = strings
            .par_iter()
            .map(|s| self.vectorize(s.as_ref()))
            .collect();

        let mut entries = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for (row, features) in rows.into_iter().enumerate() {
            for (feature, value) in features {
                entries.push((row, feature, value));
            }
        }
        SparseMatrix::from_triplets(entries, (strings.len(), self.vocabulary.len()))
    }

    /// Number of features in the frozen vocabulary.
    pub fn vocab_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// Feature index of `gram`, if it was seen at fit time.
    pub fn feature_index(&self, gram: &str) -> Option<usize> {
        self.vocabulary.get_index_of(gram)
    }

    fn vectorize(&self, s: &str) -> Vec<(usize, f32)> {
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for gram in char_ngrams(s, self.ngram_width) {
            if let Some(feature) = self.vocabulary.get_index_of(gram) {
                *counts.entry(feature).or_insert(0) += 1;
            }
        }
        normalized(&counts, self.norm)
    }
}

fn normalized(counts: &HashMap<usize, u32>, norm: Normalization) -> Vec<(usize, f32)> {
    if counts.is_empty() {
        return Vec::new();
    }
    match norm {
        Normalization::L2 => {
            let scale = counts
                .values()
                .map(|&c| c as f64 * c as f64)
                .sum::<f64>()
                .sqrt();
            counts
                .iter()
                .map(|(&feature, &c)| (feature, (c as f64 / scale) as f32))
                .collect()
        }
    }
}

/// Overlapping character n-grams over the raw character sequence.
///
/// No tokenization, case folding or stripping. A non-empty string shorter
/// than `width` characters yields a single gram equal to the whole string;
/// the empty string yields nothing.
fn char_ngrams(s: &str, width: usize) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }
    let bounds: Vec<usize> = s
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .collect();
    let chars = bounds.len() - 1;
    if chars < width {
        return vec![s];
    }
    (0..=chars - width)
        .map(|i| &s[bounds[i]..bounds[i + width]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_ngrams_slides_over_chars() {
        assert_eq!(char_ngrams("cats", 3), vec!["cat", "ats"]);
        assert_eq!(char_ngrams("cat", 3), vec!["cat"]);
    }

    #[test]
    fn char_ngrams_short_string_is_one_gram() {
        assert_eq!(char_ngrams("ab", 3), vec!["ab"]);
        assert_eq!(char_ngrams("a", 3), vec!["a"]);
    }

    #[test]
    fn char_ngrams_empty_string_has_none() {
        assert!(char_ngrams("", 3).is_empty());
    }

    #[test]
    fn char_ngrams_respects_utf8_boundaries() {
        assert_eq!(char_ngrams("naïve", 3), vec!["naï", "aïv", "ïve"]);
        assert_eq!(char_ngrams("日本", 3), vec!["日本"]);
    }

    #[test]
    fn fit_builds_matrix_with_explicit_shape() {
        let strings = ["cat", "cats", "dog"];
        let (vectorizer, matrix) = TrigramVectorizer::fit(&strings).unwrap();
        // {"cat"}, {"cat","ats"}, {"dog"}
        assert_eq!(vectorizer.vocab_len(), 3);
        assert_eq!(matrix.shape(), (3, 3));
    }

    #[test]
    fn fit_rows_are_l2_normalized() {
        let strings = ["banana", "xyz"];
        let (_, matrix) = TrigramVectorizer::fit(&strings).unwrap();
        for row in 0..2 {
            let norm: f64 = matrix
                .row_entries(row)
                .iter()
                .map(|&(_, v)| v as f64 * v as f64)
                .sum::<f64>()
                .sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "row {row} norm {norm}");
        }
    }

    #[test]
    fn fit_empty_string_yields_zero_row() {
        let strings = ["", "cat"];
        let (_, matrix) = TrigramVectorizer::fit(&strings).unwrap();
        assert!(matrix.row_entries(0).is_empty());
        assert_eq!(matrix.row_entries(1).len(), 1);
    }

    #[test]
    fn transform_preserves_full_vocabulary_width() {
        let strings = ["cat", "dog"];
        let (vectorizer, _) = TrigramVectorizer::fit(&strings).unwrap();
        // "cat" activates only the first feature; the matrix must still be
        // as wide as the whole vocabulary.
        let q = vectorizer.transform(&["cat"]).unwrap();
        assert_eq!(q.shape(), (1, vectorizer.vocab_len()));
    }

    #[test]
    fn transform_drops_unseen_trigrams() {
        let strings = ["cat"];
        let (vectorizer, _) = TrigramVectorizer::fit(&strings).unwrap();
        let q = vectorizer.transform(&["xyz"]).unwrap();
        assert_eq!(q.nnz(), 0);

        // A mix of known and unknown grams keeps only the known one, still
        // normalized over what survived.
        let q = vectorizer.transform(&["cat xyz"]).unwrap();
        let entries = q.row_entries(0);
        assert_eq!(entries.len(), 1);
        assert!((entries[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn feature_indices_are_stable_within_one_fit() {
        let strings = ["cat", "cats", "dog"];
        let (a, _) = TrigramVectorizer::fit(&strings).unwrap();
        let (b, _) = TrigramVectorizer::fit(&strings).unwrap();
        for gram in ["cat", "ats", "dog"] {
            assert_eq!(a.feature_index(gram), b.feature_index(gram));
            assert!(a.feature_index(gram).is_some());
        }
        assert_eq!(a.feature_index("xyz"), None);
    }
}
