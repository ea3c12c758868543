//! Conversation Scheduler
//!
//! Decides, per incoming message, whether to learn from it, whether to answer
//! a direct mention, and whether the channel's cadence says it is time to
//! post. Owns the model and every channel's [`ConversationBuffer`].
//!
//! ```text
//! message ──► mention? ──yes (1%)──► direct reply (nothing else happens)
//!                │
//!                no
//!                ▼
//!          count + rolling stream ──► learnable? ──► pending text (dirty)
//!                │
//!                ▼
//!          known context? ──► capture reply context
//!                │
//!                ▼
//!          count >= threshold? ──► generate ──► tag? ──► translate ──► post
//! ```
//!
//! A failed generation leaves the count alone, so every later message retries
//! until a post goes out.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::buffer::ConversationBuffer;
use crate::filter::FilterPolicy;
use crate::markov::{MarkovModel, ModelSnapshot};
use crate::settings::ChannelSettings;
use crate::transport::InboundMessage;
use crate::translate::{pick_target, TranslationPolicy};

/// Inclusive range of artificial send delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    pub fn none() -> Self {
        Self::secs(0, 0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rng.gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}

/// Scheduler tunables
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The bot's own login name
    pub bot_name: String,
    /// Percent chance to answer a mention outside the home channel
    pub mention_reply_chance: u32,
    /// Percent chance to tag the triggering author in a cadence post
    pub tag_chance: u32,
    /// Delay before a mention reply
    pub reply_delay: DelayRange,
    /// Delay before a cadence post
    pub post_delay: DelayRange,
    /// Threshold range for a channel's first post
    pub initial_threshold: (u32, u32),
}

impl SchedulerConfig {
    pub fn new(bot_name: &str) -> Self {
        Self {
            bot_name: bot_name.to_lowercase(),
            mention_reply_chance: 1,
            tag_chance: 8,
            reply_delay: DelayRange::secs(3, 6),
            post_delay: DelayRange::secs(3, 8),
            initial_threshold: (10, 18),
        }
    }
}

/// Why a message is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingKind {
    DirectReply,
    CadencePost,
    CommandReply,
}

/// A message ready to send after `delay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub channel: String,
    pub text: String,
    pub delay: Duration,
    pub kind: OutgoingKind,
}

/// Counters for monitoring
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub messages_seen: AtomicU64,
    pub messages_learned: AtomicU64,
    pub posts: AtomicU64,
    pub direct_replies: AtomicU64,
    pub generation_misses: AtomicU64,
}

/// Snapshot of scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatsSnapshot {
    pub channels: usize,
    pub messages_seen: u64,
    pub messages_learned: u64,
    pub posts: u64,
    pub direct_replies: u64,
    pub generation_misses: u64,
}

/// Per-channel conversation state machine
pub struct ConversationScheduler {
    config: SchedulerConfig,
    model: RwLock<MarkovModel>,
    filter: FilterPolicy,
    settings: Arc<RwLock<ChannelSettings>>,
    translation: Option<TranslationPolicy>,
    buffers: Mutex<HashMap<String, ConversationBuffer>>,
    rng: Mutex<StdRng>,
    mention: Regex,
    mention_strip: Regex,
    learned_since_save: AtomicBool,
    log_width: AtomicUsize,
    stats: SchedulerStats,
}

impl ConversationScheduler {
    pub fn new(
        config: SchedulerConfig,
        model: MarkovModel,
        filter: FilterPolicy,
        settings: Arc<RwLock<ChannelSettings>>,
        translation: Option<TranslationPolicy>,
    ) -> Result<Self, regex::Error> {
        Self::with_rng(
            config,
            model,
            filter,
            settings,
            translation,
            StdRng::from_entropy(),
        )
    }

    /// Construct with a given random source (seeded in tests)
    pub fn with_rng(
        config: SchedulerConfig,
        model: MarkovModel,
        filter: FilterPolicy,
        settings: Arc<RwLock<ChannelSettings>>,
        translation: Option<TranslationPolicy>,
        rng: StdRng,
    ) -> Result<Self, regex::Error> {
        let name = regex::escape(&config.bot_name);
        let mention = Regex::new(&format!("(?i)@{}", name))?;
        let mention_strip = Regex::new(&format!(r"(?i)\s?@{}\s?", name))?;

        Ok(Self {
            config,
            model: RwLock::new(model),
            filter,
            settings,
            translation,
            buffers: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            mention,
            mention_strip,
            learned_since_save: AtomicBool::new(false),
            log_width: AtomicUsize::new(0),
            stats: SchedulerStats::default(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn filter(&self) -> &FilterPolicy {
        &self.filter
    }

    /// Width channel names are padded to in post logs
    pub fn set_log_width(&self, width: usize) {
        self.log_width.store(width, Ordering::Relaxed);
    }

    /// Whether `text` mentions the bot
    pub fn is_mention(&self, text: &str) -> bool {
        self.mention.is_match(text)
    }

    fn roll_percent(&self, chance: u32) -> bool {
        self.rng.lock().gen_range(0..100) < chance
    }

    fn padded(&self, channel: &str) -> String {
        let width = self.log_width.load(Ordering::Relaxed);
        format!("{:<width$}", channel, width = width)
    }

    /// Process one chat message from a regular channel
    pub async fn on_message(&self, msg: &InboundMessage) -> Option<Outgoing> {
        if self.is_mention(&msg.text) && self.roll_percent(self.config.mention_reply_chance) {
            if let Some(reply) = self.direct_reply(msg) {
                return Some(reply);
            }
        }

        self.stats.messages_seen.fetch_add(1, Ordering::Relaxed);
        let seed = self.accumulate(msg)?;
        self.cadence_post(msg, &seed).await
    }

    /// Answer a mention, seeded by the message with the mention removed
    pub fn direct_reply(&self, msg: &InboundMessage) -> Option<Outgoing> {
        let lowered = msg.text.to_lowercase();
        let stripped = self.mention_strip.replace_all(&lowered, "");
        let seed = format!("{}\n", stripped);

        let generated = {
            let model = self.model.read();
            let mut rng = self.rng.lock();
            model.generate(&seed, &self.filter, &mut *rng)
        };
        let Some(text) = generated else {
            debug!("No reply for mention in {}", msg.channel);
            return None;
        };

        let text = format!("@{} {}", msg.display_name, text);
        let delay = self.config.reply_delay.sample(&mut *self.rng.lock());
        self.stats.direct_replies.fetch_add(1, Ordering::Relaxed);

        info!(
            "{}: [{}][{}] {}",
            self.padded(&msg.channel),
            self.model.read().context_key(&seed),
            msg.display_name,
            text
        );

        Some(Outgoing {
            channel: msg.channel.clone(),
            text,
            delay,
            kind: OutgoingKind::DirectReply,
        })
    }

    /// Update the channel buffer; returns the reply seed once cadence is reached
    fn accumulate(&self, msg: &InboundMessage) -> Option<String> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(msg.channel.clone()).or_insert_with(|| {
            let (min, max) = self.config.initial_threshold;
            let threshold = self.rng.lock().gen_range(min.min(max)..=max.max(min));
            info!("{} : posting in {}", self.padded(&msg.channel), threshold);
            ConversationBuffer::new(self.model.read().order(), threshold)
        });

        buffer.observe(&msg.text);

        if self.filter.can_learn(&msg.channel, &msg.author, &msg.text) {
            buffer.queue_for_learning(&msg.text);
            self.stats.messages_learned.fetch_add(1, Ordering::Relaxed);
        }

        if self.model.read().has_context(&buffer.rolling_stream()) {
            buffer.capture_reply_context(&msg.display_name);
        }

        if buffer.cadence_reached() {
            Some(buffer.reply_context.clone())
        } else {
            None
        }
    }

    async fn cadence_post(&self, msg: &InboundMessage, seed: &str) -> Option<Outgoing> {
        let generated = {
            let model = self.model.read();
            let mut rng = self.rng.lock();
            model.generate(seed, &self.filter, &mut *rng)
        };
        let Some(mut text) = generated else {
            self.stats.generation_misses.fetch_add(1, Ordering::Relaxed);
            debug!("{}: cadence reached, nothing to say", msg.channel);
            return None;
        };

        let (min, max) = self.settings.read().get(&msg.channel).range();
        let (next_threshold, tag, delay) = {
            let mut rng = self.rng.lock();
            (
                rng.gen_range(min..=max),
                rng.gen_range(0..100) < self.config.tag_chance,
                self.config.post_delay.sample(&mut *rng),
            )
        };

        if let Some(buffer) = self.buffers.lock().get_mut(&msg.channel) {
            buffer.record_post(next_threshold);
        }

        if tag {
            text = format!("@{} {}", msg.display_name, text);
        }

        info!(
            "{}: ({})[{}] {}",
            self.padded(&msg.channel),
            next_threshold,
            self.model.read().context_key(seed),
            text
        );

        let text = self.translate(&msg.channel, text).await;
        self.stats.posts.fetch_add(1, Ordering::Relaxed);

        Some(Outgoing {
            channel: msg.channel.clone(),
            text,
            delay,
            kind: OutgoingKind::CadencePost,
        })
    }

    /// Apply the channel's translation settings to an outgoing message
    pub async fn translate(&self, channel: &str, text: String) -> String {
        let Some(ref policy) = self.translation else {
            return text;
        };

        let target = {
            let settings = self.settings.read();
            let mut rng = self.rng.lock();
            pick_target(settings.translation_targets(channel), &mut *rng).map(str::to_string)
        };

        match target {
            Some(target) => policy.apply(&text, &target).await,
            None => text,
        }
    }

    /// Fold every dirty channel's pending text into the model.
    ///
    /// Returns the number of channels learned from.
    pub fn drain_pending(&self) -> usize {
        let mut buffers = self.buffers.lock();
        let mut model = self.model.write();

        let learned = buffers
            .values_mut()
            .filter(|buffer| buffer.is_dirty())
            .map(|buffer| buffer.fold_into(&mut model))
            .filter(|&learned| learned)
            .count();

        if learned > 0 {
            self.learned_since_save.store(true, Ordering::SeqCst);
            debug!("Learned from {} channels", learned);
        }
        learned
    }

    /// Whether the model changed since the last successful save
    pub fn has_unsaved_changes(&self) -> bool {
        self.learned_since_save.load(Ordering::SeqCst)
    }

    /// Take a snapshot for saving and clear the unsaved flag.
    ///
    /// Call [`mark_unsaved`](Self::mark_unsaved) if the save then fails.
    pub fn take_snapshot_for_save(&self) -> Option<ModelSnapshot> {
        if !self.learned_since_save.swap(false, Ordering::SeqCst) {
            return None;
        }
        Some(self.model.read().snapshot())
    }

    pub fn mark_unsaved(&self) {
        self.learned_since_save.store(true, Ordering::SeqCst);
    }

    /// Snapshot regardless of the unsaved flag
    pub fn snapshot(&self) -> ModelSnapshot {
        self.model.read().snapshot()
    }

    /// Swap in a freshly loaded model.
    ///
    /// Refused when the order differs, since live buffers hold windows of the
    /// current order.
    pub fn replace_model(&self, model: MarkovModel) -> bool {
        let mut current = self.model.write();
        if current.order() != model.order() {
            warn!(
                "Not replacing order {} model with order {}",
                current.order(),
                model.order()
            );
            return false;
        }
        let stats = model.stats();
        *current = model;
        info!("Model replaced ({} contexts)", stats.contexts);
        true
    }

    /// Generate from free text, as the console does
    pub fn generate_from(&self, text: &str) -> Option<String> {
        let seed = format!("{}\n", text);
        let model = self.model.read();
        let mut rng = self.rng.lock();
        model.generate(&seed, &self.filter, &mut *rng)
    }

    pub fn model_stats(&self) -> crate::markov::ModelStats {
        self.model.read().stats()
    }

    /// Copy of a channel's buffer, if the channel has been seen
    pub fn buffer(&self, channel: &str) -> Option<ConversationBuffer> {
        self.buffers.lock().get(channel).cloned()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            channels: self.buffers.lock().len(),
            messages_seen: self.stats.messages_seen.load(Ordering::Relaxed),
            messages_learned: self.stats.messages_learned.load(Ordering::Relaxed),
            posts: self.stats.posts.load(Ordering::Relaxed),
            direct_replies: self.stats.direct_replies.load(Ordering::Relaxed),
            generation_misses: self.stats.generation_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterLists;
    use crate::settings::PostSettings;
    use std::collections::HashSet;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            reply_delay: DelayRange::none(),
            post_delay: DelayRange::none(),
            ..SchedulerConfig::new("Parrot")
        }
    }

    fn scheduler_with(
        config: SchedulerConfig,
        model: MarkovModel,
        filter: FilterLists,
    ) -> ConversationScheduler {
        let mut settings = ChannelSettings::new();
        settings.set_post_range("lobby", 14, 14);
        ConversationScheduler::with_rng(
            config,
            model,
            FilterPolicy::new(filter),
            Arc::new(RwLock::new(settings)),
            None,
            StdRng::seed_from_u64(7),
        )
        .unwrap()
    }

    fn trained(order: usize, text: &str) -> MarkovModel {
        let mut model = MarkovModel::with_order(order);
        model.learn(text);
        model
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new("lobby", "alice", text).with_display_name("Alice")
    }

    #[tokio::test]
    async fn test_buffer_created_with_initial_threshold() {
        let s = scheduler_with(config(), MarkovModel::with_order(4), FilterLists::default());
        s.on_message(&msg("hi")).await;

        let buffer = s.buffer("lobby").unwrap();
        assert!((10..=18).contains(&buffer.post_threshold));
        assert_eq!(buffer.message_count, 1);
        assert!(buffer.is_dirty());
        assert_eq!(buffer.pending_learn_text(), "hi\n");
    }

    #[tokio::test]
    async fn test_unlearnable_message_still_counted() {
        let filter = FilterLists {
            forbidden: vec!["secret".to_string()],
            ..FilterLists::default()
        };
        let s = scheduler_with(config(), MarkovModel::with_order(4), filter);
        s.on_message(&msg("my secret")).await;

        let buffer = s.buffer("lobby").unwrap();
        assert_eq!(buffer.message_count, 1);
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.rolling_stream(), "ret\n");
        assert_eq!(s.stats().messages_learned, 0);
    }

    #[tokio::test]
    async fn test_reply_context_captured_on_known_context() {
        let s = scheduler_with(config(), trained(3, "yo\nhey\n"), FilterLists::default());
        s.on_message(&msg("yo")).await;

        let buffer = s.buffer("lobby").unwrap();
        assert_eq!(buffer.reply_context, "yo\n");
        assert_eq!(buffer.last_replied_author, "Alice");
    }

    #[tokio::test]
    async fn test_cadence_post_and_reroll() {
        let config = SchedulerConfig {
            initial_threshold: (2, 2),
            tag_chance: 0,
            ..config()
        };
        let s = scheduler_with(config, trained(3, "yo\nhey there\n"), FilterLists::default());

        assert!(s.on_message(&msg("yo")).await.is_none());
        let out = s.on_message(&msg("yo")).await.unwrap();

        assert_eq!(out.channel, "lobby");
        assert_eq!(out.text, "hey there");
        assert_eq!(out.kind, OutgoingKind::CadencePost);

        let buffer = s.buffer("lobby").unwrap();
        assert_eq!(buffer.message_count, 0);
        assert_eq!(buffer.post_threshold, 14);
        assert_eq!(s.stats().posts, 1);
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_count() {
        let config = SchedulerConfig {
            initial_threshold: (1, 1),
            ..config()
        };
        let s = scheduler_with(config, MarkovModel::with_order(3), FilterLists::default());

        for expected in 1..=3 {
            assert!(s.on_message(&msg("nothing known")).await.is_none());
            assert_eq!(s.buffer("lobby").unwrap().message_count, expected);
        }
        assert_eq!(s.stats().generation_misses, 3);
    }

    #[tokio::test]
    async fn test_tag_prefixes_author() {
        let config = SchedulerConfig {
            initial_threshold: (1, 1),
            tag_chance: 100,
            ..config()
        };
        let s = scheduler_with(config, trained(3, "yo\nhey\n"), FilterLists::default());

        let out = s.on_message(&msg("yo")).await.unwrap();
        assert_eq!(out.text, "@Alice hey");
    }

    #[tokio::test]
    async fn test_mention_reply_skips_everything_else() {
        let config = SchedulerConfig {
            mention_reply_chance: 100,
            ..config()
        };
        let s = scheduler_with(config, trained(3, "hi\nwelcome back\n"), FilterLists::default());

        let out = s.on_message(&msg("@PARROT hi")).await.unwrap();
        assert_eq!(out.kind, OutgoingKind::DirectReply);
        assert_eq!(out.text, "@Alice welcome back");

        // Not counted, not learned
        assert!(s.buffer("lobby").is_none());
        assert_eq!(s.stats().messages_seen, 0);
    }

    #[tokio::test]
    async fn test_unanswerable_mention_falls_through() {
        let config = SchedulerConfig {
            mention_reply_chance: 100,
            ..config()
        };
        let s = scheduler_with(config, MarkovModel::with_order(3), FilterLists::default());

        assert!(s.on_message(&msg("@parrot zzz")).await.is_none());
        assert_eq!(s.buffer("lobby").unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn test_mention_ignored_when_roll_fails() {
        let config = SchedulerConfig {
            mention_reply_chance: 0,
            ..config()
        };
        let s = scheduler_with(config, trained(3, "hi\nwelcome\n"), FilterLists::default());

        assert!(s.on_message(&msg("@parrot hi")).await.is_none());
        assert_eq!(s.buffer("lobby").unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn test_drain_pending_learns_and_keeps_tail() {
        let s = scheduler_with(config(), MarkovModel::with_order(3), FilterLists::default());
        s.on_message(&msg("abcd")).await;
        s.on_message(&InboundMessage::new("other", "bob", "wxyz")).await;

        assert!(!s.has_unsaved_changes());
        assert_eq!(s.drain_pending(), 2);
        assert!(s.has_unsaved_changes());
        assert_eq!(s.buffer("lobby").unwrap().pending_learn_text(), "cd\n");

        // Nothing new since last drain
        assert_eq!(s.drain_pending(), 0);
        assert!(s.generate_from("ab").is_none());
        assert_eq!(s.model_stats().contexts, 4);
    }

    #[tokio::test]
    async fn test_snapshot_for_save_clears_flag() {
        let s = scheduler_with(config(), MarkovModel::with_order(3), FilterLists::default());
        assert!(s.take_snapshot_for_save().is_none());

        s.on_message(&msg("hello")).await;
        s.drain_pending();
        assert!(s.take_snapshot_for_save().is_some());
        assert!(s.take_snapshot_for_save().is_none());

        s.mark_unsaved();
        assert!(s.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_thresholds_stay_in_range() {
        let config = SchedulerConfig {
            initial_threshold: (1, 1),
            ..config()
        };
        let mut settings = ChannelSettings::new();
        settings.set_post_range("lobby", 30, 70);
        let s = ConversationScheduler::with_rng(
            config,
            trained(2, "a\nb\na\nb\n"),
            FilterPolicy::default(),
            Arc::new(RwLock::new(settings)),
            None,
            StdRng::seed_from_u64(99),
        )
        .unwrap();

        let mut seen = HashSet::new();
        let mut posts = 0;
        for _ in 0..5_000 {
            if s.on_message(&msg("a")).await.is_some() {
                posts += 1;
                let threshold = s.buffer("lobby").unwrap().post_threshold;
                assert!((30..=70).contains(&threshold), "threshold {}", threshold);
                seen.insert(threshold);
            }
        }
        assert!(posts > 10);
        assert!(seen.len() > 5);
        assert_eq!(PostSettings::default().range(), (30, 70));
    }

    /// Reports English and tags output with the target
    struct TagTranslator;

    #[async_trait::async_trait]
    impl crate::translate::Translator for TagTranslator {
        async fn detect_language(&self, _text: &str) -> Result<String, crate::error::TranslateError> {
            Ok("en".to_string())
        }

        async fn translate(
            &self,
            text: &str,
            target: &str,
        ) -> Result<String, crate::error::TranslateError> {
            Ok(format!("[{}] {}", target, text))
        }
    }

    fn translating_scheduler(model: MarkovModel) -> ConversationScheduler {
        let mut settings = ChannelSettings::new();
        settings.set_translation("lobby", vec!["es".to_string()]);
        settings.set_translation(crate::settings::DEFAULT_KEY, vec!["fr".to_string()]);
        let policy = TranslationPolicy::new(Arc::new(TagTranslator), "!").unwrap();

        ConversationScheduler::with_rng(
            SchedulerConfig {
                initial_threshold: (1, 1),
                tag_chance: 0,
                ..config()
            },
            model,
            FilterPolicy::default(),
            Arc::new(RwLock::new(settings)),
            Some(policy),
            StdRng::seed_from_u64(7),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cadence_post_is_translated() {
        let s = translating_scheduler(trained(3, "yo\nhey there\n"));

        let out = s.on_message(&msg("yo")).await.unwrap();
        assert_eq!(out.kind, OutgoingKind::CadencePost);
        assert_eq!(out.text, "[es] hey there");
    }

    #[tokio::test]
    async fn test_translation_uses_own_entry_only() {
        let s = translating_scheduler(MarkovModel::with_order(3));

        assert_eq!(s.translate("lobby", "hi".to_string()).await, "[es] hi");
        // The default entry's targets never apply to other channels
        assert_eq!(s.translate("elsewhere", "hi".to_string()).await, "hi");
        // Commands are never translated
        assert_eq!(s.translate("lobby", "!summon".to_string()).await, "!summon");
    }

    #[tokio::test]
    async fn test_replace_model_requires_same_order() {
        let s = scheduler_with(config(), trained(3, "yo\nhey\n"), FilterLists::default());

        assert!(!s.replace_model(trained(5, "hello there\n")));
        assert_eq!(s.generate_from("yo").as_deref(), Some("hey"));

        assert!(s.replace_model(trained(3, "yo\nsup\n")));
        assert_eq!(s.generate_from("yo").as_deref(), Some("sup"));
    }
}
