//! Channel Lifecycle Management
//!
//! Channels move through two states:
//! - **Pending**: queued, waiting for an admission window
//! - **Active**: joined
//!
//! Joins are rate limited: at most `join_ceiling` channels are admitted per
//! window, and a new window opens only after `join_cooldown` has passed since
//! the previous batch. A channel is never both pending and active.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for channel admission
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Most channels joined in one window
    pub join_ceiling: usize,
    /// Minimum time between admission batches
    pub join_cooldown: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            join_ceiling: 19,
            join_cooldown: Duration::from_secs(12),
        }
    }
}

/// Result of a summon request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummonOutcome {
    Queued,
    AlreadyActive,
    AlreadyPending,
    /// Empty channel name
    Invalid,
}

/// Result of an unsummon request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsummonOutcome {
    /// Was active, needs a part
    Left,
    /// Was still waiting, dropped from the queue
    Dequeued,
    NotPresent,
}

/// Active/pending channel membership
#[derive(Debug, Clone)]
pub struct ChannelLifecycleManager {
    config: AdmissionConfig,
    active: Vec<String>,
    pending: VecDeque<String>,
    last_admission: Instant,
}

impl ChannelLifecycleManager {
    /// Split a persisted channel list into an initial batch and a queue.
    ///
    /// The first `join_ceiling` unique channels become active at `now`; the
    /// caller joins them. The rest wait for later windows.
    pub fn from_persisted(config: AdmissionConfig, channels: Vec<String>, now: Instant) -> Self {
        let mut manager = Self {
            config,
            active: Vec::new(),
            pending: VecDeque::new(),
            last_admission: now,
        };

        for channel in channels {
            manager.summon(&channel);
        }

        let initial = manager.take_batch();
        info!(
            "Joining {} of {} loaded channels: {}",
            initial.len(),
            initial.len() + manager.pending.len(),
            initial.join(", ")
        );
        manager
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub fn pending(&self) -> impl Iterator<Item = &String> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_active(&self, channel: &str) -> bool {
        self.active.iter().any(|c| c == channel)
    }

    pub fn is_pending(&self, channel: &str) -> bool {
        self.pending.iter().any(|c| c == channel)
    }

    /// Everything that should survive a restart: active first, then queued
    pub fn persisted_list(&self) -> Vec<String> {
        self.active
            .iter()
            .chain(self.pending.iter())
            .cloned()
            .collect()
    }

    /// Length of the longest known channel name, for aligned logs
    pub fn longest_name(&self) -> usize {
        self.active
            .iter()
            .chain(self.pending.iter())
            .map(|c| c.chars().count())
            .max()
            .unwrap_or(0)
    }

    /// Queue a channel for joining
    pub fn summon(&mut self, channel: &str) -> SummonOutcome {
        let channel = channel.trim().trim_start_matches('#').to_lowercase();
        if channel.is_empty() {
            return SummonOutcome::Invalid;
        }
        if self.is_active(&channel) {
            return SummonOutcome::AlreadyActive;
        }
        if self.is_pending(&channel) {
            return SummonOutcome::AlreadyPending;
        }
        debug!("Queued channel {}", channel);
        self.pending.push_back(channel);
        SummonOutcome::Queued
    }

    /// Remove a channel from membership
    pub fn unsummon(&mut self, channel: &str) -> UnsummonOutcome {
        let channel = channel.to_lowercase();
        if let Some(pos) = self.active.iter().position(|c| *c == channel) {
            self.active.remove(pos);
            return UnsummonOutcome::Left;
        }
        if let Some(pos) = self.pending.iter().position(|c| *c == channel) {
            self.pending.remove(pos);
            return UnsummonOutcome::Dequeued;
        }
        UnsummonOutcome::NotPresent
    }

    /// Admit the next batch if the cooldown has passed.
    ///
    /// Returns the channels the caller must join (empty when nothing is due).
    pub fn admit_due(&mut self, now: Instant) -> Vec<String> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        if now.saturating_duration_since(self.last_admission) <= self.config.join_cooldown {
            return Vec::new();
        }

        self.last_admission = now;
        self.take_batch()
    }

    /// Move one window's worth of channels from the queue front
    fn take_batch(&mut self) -> Vec<String> {
        let count = self.config.join_ceiling.min(self.pending.len());
        let batch: Vec<String> = self.pending.drain(..count).collect();
        self.active.extend(batch.iter().cloned());
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chan{:02}", i)).collect()
    }

    fn assert_disjoint(manager: &ChannelLifecycleManager) {
        for c in manager.active() {
            assert!(!manager.is_pending(c), "{} in both sets", c);
        }
    }

    #[test]
    fn test_initial_split() {
        let start = Instant::now();
        let manager =
            ChannelLifecycleManager::from_persisted(AdmissionConfig::default(), names(25), start);

        assert_eq!(manager.active().len(), 19);
        assert_eq!(manager.pending_len(), 6);
        assert_eq!(manager.active()[0], "chan00");
        assert_eq!(manager.pending().next().unwrap(), "chan19");
        assert_disjoint(&manager);
    }

    #[test]
    fn test_batches_bounded_by_ceiling() {
        let start = Instant::now();
        let mut manager =
            ChannelLifecycleManager::from_persisted(AdmissionConfig::default(), Vec::new(), start);
        for name in names(25) {
            assert_eq!(manager.summon(&name), SummonOutcome::Queued);
        }

        // Cooldown not yet passed
        assert!(manager.admit_due(start + Duration::from_secs(5)).is_empty());

        let first = manager.admit_due(start + Duration::from_secs(13));
        assert_eq!(first.len(), 19);
        assert_eq!(manager.active().len(), 19);
        assert_disjoint(&manager);

        // Too soon after the first batch
        assert!(manager.admit_due(start + Duration::from_secs(20)).is_empty());

        let second = manager.admit_due(start + Duration::from_secs(26));
        assert_eq!(second.len(), 6);
        assert_eq!(manager.active().len(), 25);
        assert_eq!(manager.pending_len(), 0);
        assert_disjoint(&manager);
    }

    #[test]
    fn test_every_window_admits_up_to_ceiling() {
        let start = Instant::now();
        let config = AdmissionConfig {
            join_ceiling: 3,
            join_cooldown: Duration::from_secs(12),
        };
        let mut manager = ChannelLifecycleManager::from_persisted(config, names(8), start);
        assert_eq!(manager.active().len(), 3);

        let second = manager.admit_due(start + Duration::from_secs(13));
        assert_eq!(second, ["chan03", "chan04", "chan05"]);

        let third = manager.admit_due(start + Duration::from_secs(26));
        assert_eq!(third, ["chan06", "chan07"]);
        assert_eq!(manager.pending_len(), 0);
        assert_disjoint(&manager);
    }

    #[test]
    fn test_summon_deduplicates() {
        let start = Instant::now();
        let mut manager = ChannelLifecycleManager::from_persisted(
            AdmissionConfig::default(),
            vec!["alpha".to_string(), "Alpha".to_string()],
            start,
        );

        assert_eq!(manager.active(), ["alpha"]);
        assert_eq!(manager.summon("alpha"), SummonOutcome::AlreadyActive);
        assert_eq!(manager.summon("beta"), SummonOutcome::Queued);
        assert_eq!(manager.summon("#Beta"), SummonOutcome::AlreadyPending);
        assert_eq!(manager.summon("  "), SummonOutcome::Invalid);
        assert_eq!(manager.persisted_list(), ["alpha", "beta"]);
    }

    #[test]
    fn test_unsummon() {
        let start = Instant::now();
        let mut manager = ChannelLifecycleManager::from_persisted(
            AdmissionConfig {
                join_ceiling: 1,
                ..AdmissionConfig::default()
            },
            vec!["alpha".to_string(), "beta".to_string()],
            start,
        );

        assert_eq!(manager.unsummon("beta"), UnsummonOutcome::Dequeued);
        assert_eq!(manager.unsummon("alpha"), UnsummonOutcome::Left);
        assert_eq!(manager.unsummon("gamma"), UnsummonOutcome::NotPresent);
        assert!(manager.persisted_list().is_empty());
    }

    #[test]
    fn test_longest_name() {
        let manager = ChannelLifecycleManager::from_persisted(
            AdmissionConfig::default(),
            vec!["ab".to_string(), "abcdef".to_string()],
            Instant::now(),
        );
        assert_eq!(manager.longest_name(), 6);
    }
}
