//! BM25 sparse encoding.
//!
//! Terms are produced by a tantivy analyzer (simple tokenizer, long-token
//! removal, lowercasing, English stop words, English stemming) and mapped
//! to 32-bit indices by hashing, so the encoder never needs a vocabulary
//! of its own. Documents are encoded with BM25 term-frequency saturation;
//! queries are encoded with normalized inverse document frequencies. The
//! dot product of the two is the BM25 score of the pair.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use serde::{Deserialize, Serialize};
use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
    TokenStream,
};

pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;

/// Identifies the analyzer pipeline and term hashing below. Bumped whenever
/// either changes, so stale snapshots are refitted instead of silently
/// producing different term indices.
pub const TOKENIZER_ID: &str = "en_stem_stop/v1";

const MAX_TOKEN_LEN: usize = 40;

const SEED_CORPUS: &str = include_str!("../assets/bm25_seed_corpus.txt");

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an",
    "and", "any", "are", "as", "at", "be", "because", "been", "before",
    "being", "below", "between", "both", "but", "by", "can", "did", "do",
    "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "itself", "just", "me", "more", "most", "my", "myself",
    "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

/// A sparse vector with strictly ascending indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Multiply every value by `factor`.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            indices: self.indices.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    /// Dot product with another sparse vector.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j, mut sum) = (0, 0, 0.0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Fitted BM25 statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Encoder {
    pub(crate) k1: f32,
    pub(crate) b: f32,
    pub(crate) doc_count: u64,
    pub(crate) avg_doc_len: f64,
    pub(crate) doc_freq: BTreeMap<u32, u32>,
}

impl Default for Bm25Encoder {
    fn default() -> Self {
        Self::new(DEFAULT_K1, DEFAULT_B)
    }
}

/// Check BM25 parameters: `k1` must be positive and `b` in `[0, 1]`.
pub fn check_parameters(k1: f32, b: f32) -> Result<(), String> {
    if !(k1.is_finite() && k1 > 0.0) {
        return Err(format!("k1 must be positive, got {k1}"));
    }
    if !(0.0..=1.0).contains(&b) {
        return Err(format!("b must be between 0 and 1, got {b}"));
    }
    Ok(())
}

impl Bm25Encoder {
    /// An unfitted encoder with the given BM25 parameters.
    pub fn new(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            doc_count: 0,
            avg_doc_len: 0.0,
            doc_freq: BTreeMap::new(),
        }
    }

    /// An encoder with default parameters, fitted on the bundled seed
    /// corpus.
    pub fn default_fitted() -> Self {
        let mut encoder = Self::default();
        encoder.fit(SEED_CORPUS.lines().filter(|l| !l.trim().is_empty()));
        encoder
    }

    /// Replace the current statistics with ones learned from `corpus`.
    ///
    /// Documents without any indexable term are skipped. Returns the number
    /// of documents that contributed.
    pub fn fit<I, S>(&mut self, corpus: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut doc_count = 0u64;
        let mut total_len = 0u64;
        let mut doc_freq: BTreeMap<u32, u32> = BTreeMap::new();

        for doc in corpus {
            let tokens = tokenize(doc.as_ref());
            if tokens.is_empty() {
                continue;
            }
            doc_count += 1;
            total_len += tokens.len() as u64;

            let unique: BTreeSet<u32> =
                tokens.iter().map(|t| term_index(t)).collect();
            for idx in unique {
                *doc_freq.entry(idx).or_insert(0) += 1;
            }
        }

        self.doc_count = doc_count;
        self.avg_doc_len = if doc_count == 0 {
            0.0
        } else {
            total_len as f64 / doc_count as f64
        };
        self.doc_freq = doc_freq;

        tracing::debug!(
            documents = doc_count,
            terms = self.doc_freq.len(),
            avg_doc_len = self.avg_doc_len,
            "fitted BM25 encoder"
        );
        doc_count as usize
    }

    pub fn is_fitted(&self) -> bool {
        self.doc_count > 0
    }

    pub fn k1(&self) -> f32 {
        self.k1
    }

    pub fn b(&self) -> f32 {
        self.b
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }

    /// Number of distinct term indices seen while fitting.
    pub fn vocabulary_size(&self) -> usize {
        self.doc_freq.len()
    }

    /// Encode a document for storage: saturated, length-normalized term
    /// frequencies.
    pub fn encode_document(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return SparseVector::default();
        }

        let doc_len = tokens.len() as f64;
        let avg_doc_len = if self.avg_doc_len > 0.0 {
            self.avg_doc_len
        } else {
            doc_len
        };
        let k1 = f64::from(self.k1);
        let b = f64::from(self.b);
        let norm = k1 * (1.0 - b + b * doc_len / avg_doc_len);

        let (indices, values) = term_counts(&tokens)
            .into_iter()
            .map(|(idx, tf)| {
                let tf = f64::from(tf);
                (idx, (tf * (k1 + 1.0) / (tf + norm)) as f32)
            })
            .unzip();

        SparseVector { indices, values }
    }

    /// Encode a query: inverse document frequencies of its distinct terms,
    /// normalized to sum to one.
    pub fn encode_query(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let n = self.doc_count as f64;

        let idf: Vec<(u32, f64)> = term_counts(&tokens)
            .into_keys()
            .map(|idx| {
                let df = f64::from(self.doc_freq.get(&idx).copied().unwrap_or(0));
                (idx, ((n + 1.0) / (df + 0.5)).ln())
            })
            .collect();

        let total: f64 = idf.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return SparseVector::default();
        }

        let (indices, values) = idf
            .into_iter()
            .map(|(idx, w)| (idx, (w / total) as f32))
            .unzip();

        SparseVector { indices, values }
    }
}

static ANALYZER: LazyLock<TextAnalyzer> = LazyLock::new(analyzer);

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            ENGLISH_STOP_WORDS.iter().map(|w| w.to_string()),
        ))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Run `text` through the BM25 analyzer pipeline.
pub fn tokenize(text: &str) -> Vec<String> {
    // Token streams borrow the analyzer mutably; clones share the stop set.
    let mut analyzer = ANALYZER.clone();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}

/// Stable 32-bit index for an analyzed term.
pub fn term_index(term: &str) -> u32 {
    let hash = blake3::hash(term.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn term_counts(tokens: &[String]) -> BTreeMap<u32, u32> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(term_index(token)).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_corpus() -> Bm25Encoder {
        let mut encoder = Bm25Encoder::default();
        encoder.fit([
            "rust programming language",
            "python programming language",
            "guitar lessons for beginners",
            "cooking pasta at home",
        ]);
        encoder
    }

    #[test]
    fn tokenize_lowercases_stems_and_drops_stop_words() {
        assert_eq!(tokenize("The Running Dogs"), vec!["run", "dog"]);
    }

    #[test]
    fn parameter_bounds() {
        assert!(check_parameters(DEFAULT_K1, DEFAULT_B).is_ok());
        assert!(check_parameters(1.2, 0.0).is_ok());
        assert!(check_parameters(0.0, 0.75).is_err());
        assert!(check_parameters(f32::NAN, 0.75).is_err());
        assert!(check_parameters(1.2, 1.5).is_err());
        assert!(check_parameters(1.2, f32::NAN).is_err());
    }

    #[test]
    fn tokenize_agrees_across_threads() {
        let expected = tokenize("Running guitars in the studio");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| tokenize("Running guitars in the studio"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn tokenize_drops_overlong_tokens() {
        let long = "x".repeat(MAX_TOKEN_LEN + 5);
        assert_eq!(tokenize(&format!("guitar {long}")), vec!["guitar"]);
    }

    #[test]
    fn term_index_is_deterministic() {
        assert_eq!(term_index("guitar"), term_index("guitar"));
        assert_ne!(term_index("guitar"), term_index("piano"));
    }

    #[test]
    fn fit_counts_documents_and_frequencies() {
        let encoder = small_corpus();
        assert!(encoder.is_fitted());
        assert_eq!(encoder.doc_count(), 4);
        let programming = term_index(&tokenize("programming")[0]);
        assert_eq!(encoder.doc_freq.get(&programming), Some(&2));
    }

    #[test]
    fn fit_skips_documents_without_terms() {
        let mut encoder = Bm25Encoder::default();
        assert_eq!(encoder.fit(["the and of", "guitar"]), 1);
        assert_eq!(encoder.avg_doc_len(), 1.0);
    }

    #[test]
    fn document_vector_is_sorted_and_unique() {
        let encoder = small_corpus();
        let vector = encoder.encode_document("guitar guitar lessons and piano");
        assert_eq!(vector.len(), 3);
        assert!(vector.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(vector.values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn repeated_terms_weigh_more() {
        let encoder = small_corpus();
        let vector = encoder.encode_document("guitar guitar lessons");
        let weight = |term: &str| {
            let idx = term_index(&tokenize(term)[0]);
            let pos = vector.indices.iter().position(|i| *i == idx).unwrap();
            vector.values[pos]
        };
        assert!(weight("guitar") > weight("lessons"));
    }

    #[test]
    fn query_weights_are_normalized() {
        let encoder = small_corpus();
        let vector = encoder.encode_query("rust programming");
        let sum: f32 = vector.values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rare_terms_dominate_queries() {
        let encoder = small_corpus();
        let vector = encoder.encode_query("rust programming");
        let rust = term_index("rust");
        let programming = term_index(&tokenize("programming")[0]);
        let weight = |idx: u32| {
            let pos = vector.indices.iter().position(|i| *i == idx).unwrap();
            vector.values[pos]
        };
        assert!(weight(rust) > weight(programming));
    }

    #[test]
    fn bm25_ranks_matching_document_first() {
        let encoder = small_corpus();
        let query = encoder.encode_query("learn guitar");
        let guitar = encoder.encode_document("guitar lessons for beginners");
        let pasta = encoder.encode_document("cooking pasta at home");
        assert!(query.dot(&guitar) > query.dot(&pasta));
        assert_eq!(query.dot(&pasta), 0.0);
    }

    #[test]
    fn empty_text_encodes_to_empty_vector() {
        let encoder = small_corpus();
        assert!(encoder.encode_document("").is_empty());
        assert!(encoder.encode_query("   ").is_empty());
        assert!(encoder.encode_query("the of and").is_empty());
    }

    #[test]
    fn default_fitted_uses_seed_corpus() {
        let encoder = Bm25Encoder::default_fitted();
        assert!(encoder.is_fitted());
        assert!(encoder.vocabulary_size() > 50);
        assert_eq!(encoder.k1(), DEFAULT_K1);
        assert_eq!(encoder.b(), DEFAULT_B);
    }

    #[test]
    fn scale_multiplies_values_only() {
        let vector = SparseVector {
            indices: vec![1, 5],
            values: vec![0.5, 1.0],
        };
        let scaled = vector.scale(0.5);
        assert_eq!(scaled.indices, vec![1, 5]);
        assert_eq!(scaled.values, vec![0.25, 0.5]);
    }
}
