//! Markov Text Engine
//!
//! Fixed-order character transition table:
//! - **learn**: fold observed text into the table, return the tail to carry forward
//! - **generate**: weighted random walk from a seed context, filtered and retried
//!
//! The table only ever grows. There is no decay or eviction.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::filter::FilterPolicy;

/// Default context length
pub const DEFAULT_ORDER: usize = 10;
/// Maximum characters produced in one generation pass
pub const OUTPUT_MAX: usize = 200;
/// Generation passes tried before giving up on filtered output
pub const MAX_GEN_ATTEMPTS: usize = 20;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct MarkovConfig {
    /// Context length (immutable once the model exists)
    pub order: usize,
    /// Step bound per generation pass
    pub output_max: usize,
    /// Passes before a filtered generation is abandoned
    pub max_attempts: usize,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            output_max: OUTPUT_MAX,
            max_attempts: MAX_GEN_ATTEMPTS,
        }
    }
}

impl MarkovConfig {
    pub fn with_order(order: usize) -> Self {
        Self {
            order: order.max(1),
            ..Self::default()
        }
    }
}

/// Next-character distribution for one context
type Distribution = BTreeMap<char, u32>;

/// Character-level Markov model
#[derive(Debug, Clone)]
pub struct MarkovModel {
    config: MarkovConfig,
    table: HashMap<String, Distribution>,
}

/// On-disk form of the model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Absent in files written by older versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    pub dict: HashMap<String, BTreeMap<String, u32>>,
}

/// Size of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelStats {
    pub contexts: usize,
    pub transitions: usize,
    pub observations: u64,
}

impl MarkovModel {
    /// Create an empty model
    pub fn new(config: MarkovConfig) -> Self {
        Self {
            config: MarkovConfig {
                order: config.order.max(1),
                ..config
            },
            table: HashMap::new(),
        }
    }

    /// Create an empty model of the given order with default bounds
    pub fn with_order(order: usize) -> Self {
        Self::new(MarkovConfig::with_order(order))
    }

    pub fn order(&self) -> usize {
        self.config.order
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Trailing `order` characters of `text` (all of it if shorter)
    pub fn tail(&self, text: &str) -> String {
        let count = text.chars().count();
        text.chars().skip(count.saturating_sub(self.config.order)).collect()
    }

    /// Context key for display, newlines escaped
    pub fn context_key(&self, text: &str) -> String {
        self.tail(text).replace('\n', "\\n")
    }

    /// Whether the trailing context of `text` is known
    pub fn has_context(&self, text: &str) -> bool {
        self.table.contains_key(&self.tail(text))
    }

    /// Occurrence count of `next` after `context`
    pub fn count(&self, context: &str, next: char) -> u32 {
        self.table
            .get(context)
            .and_then(|dist| dist.get(&next))
            .copied()
            .unwrap_or(0)
    }

    /// Fold `text` into the table.
    ///
    /// Returns the trailing `order` characters, which the caller carries into
    /// the next pass so transitions spanning the boundary are not lost.
    pub fn learn(&mut self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let order = self.config.order;

        if chars.len() > order {
            for window in chars.windows(order + 1) {
                let key: String = window[..order].iter().collect();
                *self
                    .table
                    .entry(key)
                    .or_default()
                    .entry(window[order])
                    .or_insert(0) += 1;
            }
        }

        let start = chars.len().saturating_sub(order);
        chars[start..].iter().collect()
    }

    /// Generate text continuing from the trailing context of `seed`.
    ///
    /// Returns `None` when the context is unknown, when every attempt
    /// contains a forbidden substring, or when nothing but whitespace came out.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        seed: &str,
        filter: &FilterPolicy,
        rng: &mut R,
    ) -> Option<String> {
        let context = self.tail(seed);
        if !self.table.contains_key(&context) {
            return None;
        }

        for attempt in 1..=self.config.max_attempts {
            let output = self.walk(&context, rng);

            if output.is_empty() {
                return None;
            }

            if filter.contains_forbidden(&output) {
                debug!("Generation attempt {} filtered", attempt);
                continue;
            }

            return Some(output);
        }

        debug!(
            "All {} generation attempts filtered for [{}]",
            self.config.max_attempts,
            self.context_key(&context)
        );
        None
    }

    /// One generation pass from `context`
    fn walk<R: Rng + ?Sized>(&self, context: &str, rng: &mut R) -> String {
        let mut window: Vec<char> = context.chars().collect();

        // A mid-line seed is echoed so the continuation reads as one message
        let mut output = match window.last() {
            Some('\n') | None => String::new(),
            Some(_) => context.to_string(),
        };

        for _ in 0..self.config.output_max {
            let key: String = window.iter().collect();
            let Some(dist) = self.table.get(&key) else {
                break;
            };
            let Some(next) = weighted_choice(dist, rng) else {
                break;
            };

            output.push(next);
            if next == '\n' {
                break;
            }

            window.remove(0);
            window.push(next);
        }

        output.trim_end().to_string()
    }

    /// Model size
    pub fn stats(&self) -> ModelStats {
        ModelStats {
            contexts: self.table.len(),
            transitions: self.table.values().map(|d| d.len()).sum(),
            observations: self
                .table
                .values()
                .flat_map(|d| d.values())
                .map(|&c| u64::from(c))
                .sum(),
        }
    }

    /// Serializable copy of the table
    pub fn snapshot(&self) -> ModelSnapshot {
        let dict = self
            .table
            .iter()
            .map(|(key, dist)| {
                let counts = dist.iter().map(|(c, n)| (c.to_string(), *n)).collect();
                (key.clone(), counts)
            })
            .collect();

        ModelSnapshot {
            order: Some(self.config.order),
            dict,
        }
    }

    /// Rebuild a model from a snapshot.
    ///
    /// A recorded order wins over `config.order`. Entries that would break the
    /// table invariants (wrong context length, multi-character symbols, zero
    /// counts) are dropped.
    pub fn from_snapshot(config: MarkovConfig, snapshot: ModelSnapshot) -> Self {
        let order = match snapshot.order {
            Some(saved) if saved > 0 && saved != config.order => {
                warn!("Model file has order {}, configured {}; keeping {}", saved, config.order, saved);
                saved
            }
            _ => config.order,
        };
        let mut model = Self::new(MarkovConfig { order, ..config });
        let order = model.config.order;

        let mut skipped = 0usize;
        for (key, counts) in snapshot.dict {
            if key.chars().count() != order {
                skipped += 1;
                continue;
            }

            let mut dist = Distribution::new();
            for (symbol, count) in counts {
                let mut chars = symbol.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if count > 0 => {
                        dist.insert(c, count);
                    }
                    _ => skipped += 1,
                }
            }

            if !dist.is_empty() {
                model.table.insert(key, dist);
            }
        }

        if skipped > 0 {
            warn!("Skipped {} malformed model entries", skipped);
        }

        model
    }
}

/// Pick a symbol with probability proportional to its count
fn weighted_choice<R: Rng + ?Sized>(dist: &Distribution, rng: &mut R) -> Option<char> {
    let symbols: Vec<(char, u32)> = dist.iter().map(|(&c, &n)| (c, n)).collect();
    symbols
        .choose_weighted(rng, |&(_, count)| count)
        .ok()
        .map(|&(symbol, _)| symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterLists;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn open_filter() -> FilterPolicy {
        FilterPolicy::new(FilterLists::default())
    }

    fn filter_with(words: &[&str]) -> FilterPolicy {
        FilterPolicy::new(FilterLists {
            forbidden: words.iter().map(|w| w.to_string()).collect(),
            ..FilterLists::default()
        })
    }

    #[test]
    fn test_learn_counts_every_window() {
        let mut model = MarkovModel::with_order(3);
        model.learn("abcabd");

        assert_eq!(model.count("abc", 'a'), 1);
        assert_eq!(model.count("bca", 'b'), 1);
        assert_eq!(model.count("cab", 'd'), 1);
        assert_eq!(model.stats().contexts, 3);
        assert_eq!(model.stats().observations, 3);
    }

    #[test]
    fn test_learn_increments_existing() {
        let mut model = MarkovModel::with_order(2);
        model.learn("abc");
        model.learn("abc");
        model.learn("abd");

        assert_eq!(model.count("ab", 'c'), 2);
        assert_eq!(model.count("ab", 'd'), 1);
    }

    #[test]
    fn test_learn_returns_tail() {
        let mut model = MarkovModel::with_order(4);
        assert_eq!(model.learn("hello world"), "orld");
        assert_eq!(model.learn("hi"), "hi");
    }

    #[test]
    fn test_learn_short_text_is_noop() {
        let mut model = MarkovModel::with_order(5);
        model.learn("hello");
        assert!(model.is_empty());
    }

    #[test]
    fn test_chunked_learning_matches_single_pass() {
        let text = "the quick brown fox\njumps over the lazy dog\n";
        let (first, second) = text.split_at(17);

        let mut whole = MarkovModel::with_order(4);
        whole.learn(text);

        let mut chunked = MarkovModel::with_order(4);
        let tail = chunked.learn(first);
        chunked.learn(&format!("{}{}", tail, second));

        assert_eq!(whole.snapshot().dict, chunked.snapshot().dict);
    }

    #[test]
    fn test_learn_handles_multibyte() {
        let mut model = MarkovModel::with_order(2);
        let tail = model.learn("héllo wörld");
        assert_eq!(tail, "ld");
        assert_eq!(model.count("hé", 'l'), 1);
        assert_eq!(model.count("wö", 'r'), 1);
    }

    #[test]
    fn test_generate_unknown_context() {
        let mut model = MarkovModel::with_order(3);
        model.learn("abcdef");
        let mut rng = StdRng::seed_from_u64(1);

        assert!(model.generate("xyz", &open_filter(), &mut rng).is_none());
        assert!(model.generate("", &open_filter(), &mut rng).is_none());
    }

    #[test]
    fn test_generate_follows_training() {
        let mut model = MarkovModel::with_order(5);
        model.learn("hello world\n");
        let mut rng = StdRng::seed_from_u64(42);

        let output = model.generate("world", &open_filter(), &mut rng);
        assert_eq!(output.as_deref(), Some("world"));

        let output = model.generate("say hello", &open_filter(), &mut rng);
        assert_eq!(output.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_generate_after_newline_seed() {
        let mut model = MarkovModel::with_order(3);
        model.learn("hi\nhey there\n");
        let mut rng = StdRng::seed_from_u64(7);

        // Context "hi\n" is followed only by "hey there"
        let output = model.generate("hi\n", &open_filter(), &mut rng).unwrap();
        assert_eq!(output, "hey there");
    }

    #[test]
    fn test_generate_is_deterministic_for_seed() {
        let mut model = MarkovModel::with_order(2);
        model.learn("abacabadabacaba\nabba\nacdc\n");

        let a = model.generate("ab", &open_filter(), &mut StdRng::seed_from_u64(9));
        let b = model.generate("ab", &open_filter(), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_respects_output_max() {
        let mut model = MarkovModel::new(MarkovConfig {
            order: 1,
            output_max: 5,
            max_attempts: 1,
        });
        model.learn("aaaa");
        let mut rng = StdRng::seed_from_u64(3);

        let output = model.generate("\na", &open_filter(), &mut rng).unwrap();
        // Seed "a" echoed, then five steps
        assert_eq!(output, "aaaaaa");
    }

    #[test]
    fn test_generate_fails_closed_on_filtered_output() {
        let mut model = MarkovModel::with_order(3);
        model.learn("go\nbadword\n");
        let filter = filter_with(&["BADWORD"]);
        let mut rng = StdRng::seed_from_u64(5);

        // Only path from "go\n" produces the forbidden word
        assert!(model.generate("go\n", &filter, &mut rng).is_none());
    }

    #[test]
    fn test_generate_retries_past_filtered_output() {
        let mut model = MarkovModel::with_order(2);
        model.learn("x\nnope\nx\nfine\n");
        let filter = filter_with(&["nope"]);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..20 {
            if let Some(out) = model.generate("x\n", &filter, &mut rng) {
                assert!(!out.to_lowercase().contains("nope"));
            }
        }
    }

    #[test]
    fn test_weighted_choice_proportional() {
        let mut dist = Distribution::new();
        dist.insert('a', 9);
        dist.insert('b', 1);
        let mut rng = StdRng::seed_from_u64(0);

        let a_count = (0..10_000)
            .filter(|_| weighted_choice(&dist, &mut rng) == Some('a'))
            .count();
        assert!((8_500..9_500).contains(&a_count), "got {}", a_count);
    }

    #[test]
    fn test_snapshot_roundtrip_and_validation() {
        let mut model = MarkovModel::with_order(3);
        model.learn("abcd\nabce\n");

        let mut snapshot = model.snapshot();
        snapshot
            .dict
            .insert("toolong".to_string(), BTreeMap::from([("x".to_string(), 1)]));
        snapshot
            .dict
            .insert("zzz".to_string(), BTreeMap::from([("xy".to_string(), 1), ("q".to_string(), 0)]));

        let restored = MarkovModel::from_snapshot(MarkovConfig::with_order(3), snapshot);
        assert_eq!(restored.count("abc", 'd'), 1);
        assert_eq!(restored.count("abc", 'e'), 1);
        assert!(!restored.has_context("toolong"));
        assert!(!restored.has_context("zzz"));
        assert_eq!(restored.stats(), model.stats());
    }

    #[test]
    fn test_snapshot_keeps_its_own_order() {
        let mut model = MarkovModel::with_order(10);
        model.learn("the quick brown fox jumps\nover the lazy dog\n");
        let saved = model.stats();

        // Configured order differs from the file; the table must survive
        let restored = MarkovModel::from_snapshot(MarkovConfig::with_order(5), model.snapshot());
        assert_eq!(restored.order(), 10);
        assert_eq!(restored.stats(), saved);
        assert!(restored.has_context("the quick "));

        let mut restored = restored;
        restored.learn("hi there, friend\n");
        let resaved = restored.snapshot();
        assert_eq!(resaved.order, Some(10));
        assert!(resaved.dict.len() > saved.contexts);
    }

    #[test]
    fn test_snapshot_without_order_uses_config() {
        let snapshot = ModelSnapshot {
            order: None,
            dict: HashMap::from([("abc".to_string(), BTreeMap::from([("d".to_string(), 2)]))]),
        };
        let restored = MarkovModel::from_snapshot(MarkovConfig::with_order(3), snapshot);
        assert_eq!(restored.order(), 3);
        assert_eq!(restored.count("abc", 'd'), 2);
    }

    #[test]
    fn test_weighted_choice_empty_or_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(weighted_choice(&Distribution::new(), &mut rng), None);
        assert_eq!(weighted_choice(&Distribution::from([('a', 0)]), &mut rng), None);
        assert_eq!(weighted_choice(&Distribution::from([('a', 0), ('b', 3)]), &mut rng), Some('b'));
    }

    #[test]
    fn test_context_key_escapes_newlines() {
        let model = MarkovModel::with_order(4);
        assert_eq!(model.context_key("hello\nyo\n"), "\\nyo\\n");
    }
}
