//! Full-text index.
//!
//! `TextIndex` keeps an inverted index (token → key → term frequency) and a
//! forward index (key → tokens) so entries can be replaced and removed.
//! Searches use OR semantics across query tokens and rank by TF·IDF:
//!
//! ```text
//! score(doc) = Σ_term  tf(term, doc) / len(doc) · (ln(N / df(term)) + 1)
//! ```
//!
//! The index is generic over its key so collections (document ids) and the
//! blob store (bucket/key pairs) share it.

use std::collections::{BTreeMap, HashMap};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

/// Configuration for the tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Minimum token length to index.
    pub min_token_length: usize,
    /// Maximum token length to index.
    pub max_token_length: usize,
    /// Whether common English words are dropped.
    pub drop_stop_words: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_token_length: 2,
            max_token_length: 256,
            drop_stop_words: true,
        }
    }
}

impl TokenizerConfig {
    /// Splits text into lowercase alphanumeric tokens.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| {
                let len = t.chars().count();
                len >= self.min_token_length && len <= self.max_token_length
            })
            .filter(|t| !(self.drop_stop_words && STOP_WORDS.contains(&t.as_str())))
            .collect()
    }
}

/// Ranked full-text index.
#[derive(Debug, Clone)]
pub struct TextIndex<K: Ord + Clone> {
    tokenizer: TokenizerConfig,
    inverted: HashMap<String, BTreeMap<K, u32>>,
    forward: BTreeMap<K, (Vec<String>, u32)>,
}

impl<K: Ord + Clone> Default for TextIndex<K> {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl<K: Ord + Clone> TextIndex<K> {
    /// Creates an empty index.
    pub fn new(tokenizer: TokenizerConfig) -> Self {
        Self {
            tokenizer,
            inverted: HashMap::new(),
            forward: BTreeMap::new(),
        }
    }

    /// Indexes `text` under `key`, replacing any previous entry.
    pub fn insert(&mut self, key: K, text: &str) {
        self.remove(&key);

        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let total = u32::try_from(tokens.len()).unwrap_or(u32::MAX);

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_default() += 1;
        }

        let mut terms = Vec::with_capacity(counts.len());
        for (token, tf) in counts {
            self.inverted
                .entry(token.clone())
                .or_default()
                .insert(key.clone(), tf);
            terms.push(token);
        }
        self.forward.insert(key, (terms, total));
    }

    /// Removes the entry for `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some((terms, _)) = self.forward.remove(key) else {
            return false;
        };
        for term in terms {
            if let Some(postings) = self.inverted.get_mut(&term) {
                postings.remove(key);
                if postings.is_empty() {
                    self.inverted.remove(&term);
                }
            }
        }
        true
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Ranks entries against `query`, best first, ties by key.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(K, f64)> {
        self.search_filtered(query, limit, |_| true)
    }

    /// Like [`search`](Self::search), restricted to keys accepted by `keep`.
    pub fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        keep: impl Fn(&K) -> bool,
    ) -> Vec<(K, f64)> {
        let mut terms = self.tokenizer.tokenize(query);
        terms.sort();
        terms.dedup();

        let n = self.forward.len() as f64;
        let mut scores: BTreeMap<K, f64> = BTreeMap::new();
        for term in &terms {
            let Some(postings) = self.inverted.get(term) else {
                continue;
            };
            let idf = (n / postings.len() as f64).ln() + 1.0;
            for (key, tf) in postings {
                if !keep(key) {
                    continue;
                }
                let len = self.forward.get(key).map_or(1, |(_, total)| *total).max(1);
                *scores.entry(key.clone()).or_default() += f64::from(*tf) / f64::from(len) * idf;
            }
        }

        let mut ranked: Vec<(K, f64)> = scores.into_iter().collect();
        // Stable sort keeps key order among equal scores
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tokenizer_drops_short_and_stop_words() {
        let tokens = TokenizerConfig::default().tokenize("The quick, brown fox! A b-52 IS here");
        assert_eq!(tokens, vec!["quick", "brown", "fox", "52", "here"]);
    }

    #[test]
    fn search_ranks_by_tf_idf() {
        let mut index = TextIndex::default();
        index.insert(1u64, "the quick brown fox");
        index.insert(2, "quick quick quick");
        index.insert(3, "lazy dog");

        let hits = index.search("quick", 10);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![2, 1]);
        assert!(hits[0].1 > hits[1].1);

        assert!(index.search("cat", 10).is_empty());
        assert!(index.search("the", 10).is_empty());
    }

    #[test]
    fn or_semantics_and_limit() {
        let mut index = TextIndex::default();
        index.insert(1u64, "apple");
        index.insert(2, "banana");
        index.insert(3, "cherry");
        let hits = index.search("apple banana", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(index.search("apple banana", 1).len(), 1);
    }

    #[test]
    fn ties_break_by_key() {
        let mut index = TextIndex::default();
        index.insert(9u64, "same words");
        index.insert(4, "same words");
        let keys: Vec<u64> = index.search("same", 10).into_iter().map(|h| h.0).collect();
        assert_eq!(keys, vec![4, 9]);
    }

    #[test]
    fn replace_and_remove() {
        let mut index = TextIndex::default();
        index.insert(1u64, "old text");
        index.insert(1, "new words");
        assert!(index.search("old", 10).is_empty());
        assert_eq!(index.search("new", 10).len(), 1);
        assert!(index.remove(&1));
        assert!(!index.remove(&1));
        assert!(index.is_empty());
    }

    #[test]
    fn filtered_search() {
        let mut index = TextIndex::default();
        index.insert(("a".to_string(), "1".to_string()), "report");
        index.insert(("b".to_string(), "1".to_string()), "report");
        let hits = index.search_filtered("report", 10, |k| k.0 == "b");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0 .0, "b");
    }

    proptest! {
        #[test]
        fn tokens_are_normalized(text in "\\PC{0,64}") {
            for token in TokenizerConfig::default().tokenize(&text) {
                prop_assert!(token.chars().count() >= 2);
                prop_assert!(!token.contains(char::is_whitespace));
            }
        }
    }
}
