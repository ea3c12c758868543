//! Learn/post filtering
//!
//! Ignore lists and forbidden substrings are loaded once at startup and never
//! change during a run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Static filter data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterLists {
    /// Authors never learned from (lowercase)
    pub ignored_authors: HashSet<String>,
    /// Channels never learned from (lowercase)
    pub ignored_channels: HashSet<String>,
    /// Substrings that block learning and posting (case-insensitive)
    pub forbidden: Vec<String>,
}

/// Predicates over [`FilterLists`]
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    ignored_authors: HashSet<String>,
    ignored_channels: HashSet<String>,
    forbidden: Vec<String>,
}

impl FilterPolicy {
    pub fn new(lists: FilterLists) -> Self {
        Self {
            ignored_authors: lists
                .ignored_authors
                .into_iter()
                .map(|a| a.to_lowercase())
                .collect(),
            ignored_channels: lists
                .ignored_channels
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
            forbidden: lists
                .forbidden
                .into_iter()
                .map(|f| f.to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Whether a message may be folded into the model.
    ///
    /// Only gates learning. The message is still counted and relayed.
    pub fn can_learn(&self, channel: &str, author: &str, text: &str) -> bool {
        if self.ignored_channels.contains(&channel.to_lowercase()) {
            return false;
        }
        if self.ignored_authors.contains(&author.to_lowercase()) {
            return false;
        }
        !self.contains_forbidden(text)
    }

    /// Case-insensitive forbidden substring check
    pub fn contains_forbidden(&self, text: &str) -> bool {
        if self.forbidden.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.forbidden.iter().any(|f| lower.contains(f.as_str()))
    }

    pub fn forbidden_count(&self) -> usize {
        self.forbidden.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FilterPolicy {
        FilterPolicy::new(FilterLists {
            ignored_authors: HashSet::from(["NightBot".to_string()]),
            ignored_channels: HashSet::from(["quietroom".to_string()]),
            forbidden: vec!["Spoiler".to_string(), String::new()],
        })
    }

    #[test]
    fn test_can_learn_clean_message() {
        assert!(policy().can_learn("lobby", "alice", "hello there"));
    }

    #[test]
    fn test_each_check_blocks_independently() {
        let p = policy();
        assert!(!p.can_learn("QuietRoom", "alice", "hello"));
        assert!(!p.can_learn("lobby", "nightbot", "hello"));
        assert!(!p.can_learn("lobby", "alice", "big SPOILER ahead"));

        // Any single failing check is enough
        assert!(!p.can_learn("quietroom", "nightbot", "spoiler"));
        assert!(!p.can_learn("lobby", "nightbot", "clean"));
        assert!(!p.can_learn("quietroom", "alice", "clean"));
    }

    #[test]
    fn test_forbidden_is_case_insensitive() {
        let p = policy();
        assert!(p.contains_forbidden("sPoIlEr"));
        assert!(!p.contains_forbidden("spoil"));
    }

    #[test]
    fn test_empty_filter_entries_ignored() {
        // An empty substring would otherwise match everything
        assert_eq!(policy().forbidden_count(), 1);
        assert!(!FilterPolicy::default().contains_forbidden("anything"));
    }
}
