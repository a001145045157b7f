//! Term weighting over a small document set.
//!
//! [`TfidfModel`] builds a vocabulary of word n-grams from a set of bodies and maps each
//! body to a dense, L2-normalized [`TermVector`]:
//!
//! - tokens are lowercased alphanumeric runs (internal hyphens and apostrophes kept),
//!   English stop words removed before n-grams are formed
//! - the vocabulary keeps the `max_features` terms with the highest total count across
//!   the fitted documents, ties broken alphabetically, and is then sorted alphabetically
//! - weights are raw term counts times the smoothed inverse document frequency
//!   `ln((1 + n) / (1 + df)) + 1`
//!
//! # Example
//!
//! ```
//! use grantlink::tfidf::{cosine_similarity, TfidfConfig, TfidfModel};
//!
//! let bodies = ["cancer treatment trial results", "tumor therapy clinical trial"];
//! let model = TfidfModel::fit(bodies.iter().copied(), &TfidfConfig::default());
//!
//! let first = model.transform(bodies[0]);
//! let similarity = cosine_similarity(&first, &first).unwrap();
//! assert!((similarity - 1.0).abs() < 1e-9);
//! ```

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

/// Vectorizer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfidfConfig {
    /// Smallest and largest n-gram length, inclusive
    pub ngram_range: (usize, usize),
    /// Vocabulary cap
    pub max_features: usize,
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self {
            ngram_range: (1, 3),
            max_features: 100,
        }
    }
}

const STOP_WORDS_LIST: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "almost", "alone", "along",
    "already", "also", "although", "always", "am", "among", "an", "and", "another", "any",
    "anyhow", "anyone", "anything", "anyway", "anywhere", "are", "around", "as", "at", "be",
    "became", "because", "become", "becomes", "been", "before", "being", "below", "beside",
    "besides", "between", "beyond", "both", "but", "by", "can", "cannot", "could", "did", "do",
    "does", "done", "down", "due", "during", "each", "eg", "either", "else", "elsewhere",
    "enough", "etc", "even", "ever", "every", "except", "few", "for", "from", "further", "had",
    "has", "have", "he", "hence", "her", "here", "hers", "herself", "him", "himself", "his",
    "how", "however", "i", "ie", "if", "in", "indeed", "into", "is", "it", "its", "itself",
    "just", "last", "latter", "least", "less", "many", "may", "me", "meanwhile", "might",
    "more", "moreover", "most", "mostly", "much", "must", "my", "myself", "neither", "never",
    "nevertheless", "next", "no", "nor", "not", "nothing", "now", "of", "off", "often", "on",
    "once", "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours",
    "ourselves", "out", "over", "own", "per", "perhaps", "rather", "same", "seem", "seemed",
    "seems", "several", "she", "should", "since", "so", "some", "still", "such", "than",
    "that", "the", "their", "them", "themselves", "then", "there", "thereby", "therefore",
    "these", "they", "this", "those", "though", "through", "thus", "to", "together", "too",
    "toward", "towards", "under", "until", "up", "upon", "us", "very", "via", "was", "we",
    "well", "were", "what", "whatever", "when", "where", "whereas", "whether", "which",
    "while", "who", "whole", "whom", "whose", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

static STOP_WORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS_LIST.iter().copied().collect());

/// Dense term-weight vector in one fitted space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TermVector(Vec<f64>);

impl TermVector {
    #[must_use]
    /// The zero vector of a space with `len` dimensions.
    pub fn zeros(len: usize) -> Self {
        TermVector(vec![0.0; len])
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weights in dimension order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Inner product. Extra dimensions on either side are ignored.
    pub fn dot(&self, other: &TermVector) -> f64 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }

    /// Euclidean length.
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// True when every component is zero. Such vectors have no direction.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0.0)
    }

    /// Component-wise addition. `other` must live in the same space.
    pub fn add_assign(&mut self, other: &TermVector) {
        debug_assert_eq!(self.0.len(), other.0.len());
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a += b;
        }
    }

    /// Multiplies every weight by `factor` in place.
    pub fn scale(&mut self, factor: f64) {
        for w in &mut self.0 {
            *w *= factor;
        }
    }
}

impl From<Vec<f64>> for TermVector {
    fn from(weights: Vec<f64>) -> Self {
        TermVector(weights)
    }
}

/// Cosine similarity of two vectors from the same space.
///
/// Returns `None` when either vector has zero norm or the dimensions differ.
pub fn cosine_similarity(a: &TermVector, b: &TermVector) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let norms = a.norm() * b.norm();
    if norms == 0.0 || !norms.is_finite() {
        return None;
    }
    Some((a.dot(b) / norms).clamp(-1.0, 1.0))
}

/// A fitted vocabulary with inverse document frequencies.
#[derive(Debug, Clone)]
pub struct TfidfModel {
    config: TfidfConfig,
    /// term -> dimension, dimensions follow alphabetical term order
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfModel {
    /// Learns the vocabulary and document frequencies of `documents`.
    pub fn fit<'a>(documents: impl IntoIterator<Item = &'a str>, config: &TfidfConfig) -> Self {
        let mut total_counts: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut n_documents = 0usize;

        for document in documents {
            n_documents += 1;
            let counts = term_counts(document, config.ngram_range);
            for (term, count) in counts {
                *total_counts.entry(term.clone()).or_default() += count;
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        let vocabulary: BTreeMap<String, usize> = total_counts
            .into_iter()
            .sorted_by(|(ta, ca), (tb, cb)| cb.cmp(ca).then_with(|| ta.cmp(tb)))
            .take(config.max_features)
            .map(|(term, _)| term)
            .sorted()
            .enumerate()
            .map(|(dimension, term)| (term, dimension))
            .collect();

        let n = n_documents as f64;
        let mut idf = vec![0.0; vocabulary.len()];
        for (term, &dimension) in &vocabulary {
            let df = document_frequency.get(term).copied().unwrap_or(0) as f64;
            idf[dimension] = ((1.0 + n) / (1.0 + df)).ln() + 1.0;
        }

        tracing::trace!(
            documents = n_documents,
            terms = vocabulary.len(),
            "fitted term weighting"
        );

        Self {
            config: *config,
            vocabulary,
            idf,
        }
    }

    /// Maps a body into the fitted space, L2-normalized.
    ///
    /// A body with no in-vocabulary terms yields a zero vector.
    pub fn transform(&self, document: &str) -> TermVector {
        let mut vector = TermVector::zeros(self.vocabulary.len());
        for (term, count) in term_counts(document, self.config.ngram_range) {
            if let Some(&dimension) = self.vocabulary.get(&term) {
                vector.0[dimension] = count as f64 * self.idf[dimension];
            }
        }
        let norm = vector.norm();
        if norm > 0.0 {
            vector.scale(1.0 / norm);
        }
        vector
    }

    /// Terms in dimension order.
    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.vocabulary.keys().map(String::as_str)
    }

    /// Size of the fitted vocabulary, and so of every transformed vector.
    pub fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Lowercased word tokens with stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|token| token.trim_matches(|c| c == '-' || c == '\''))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(token.as_str()))
        .collect()
}

fn term_counts(text: &str, (min_n, max_n): (usize, usize)) -> HashMap<String, usize> {
    let tokens = tokenize(text);
    let mut counts = HashMap::new();
    for n in min_n.max(1)..=max_n {
        for window in tokens.windows(n) {
            *counts.entry(window.join(" ")).or_default() += 1;
        }
    }
    counts
}

/// Word-set cosine between two titles, used to pick the best search result.
///
/// Each distinct lowercased word counts once. Returns 0.0 when either title is empty.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> { s.split_whitespace().map(str::to_lowercase).collect() };
    let (a, b) = (words(a), words(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f64;
    shared / ((a.len() * b.len()) as f64).sqrt()
}
