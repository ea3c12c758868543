//! Per-channel settings
//!
//! Post cadence bounds and translation targets, keyed by channel name.
//! Channels without their own entry read the `default` entry.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Lowest cadence a channel may request
pub const MIN_MESSAGES_PER_POST: u32 = 14;
/// Highest cadence a channel may request
pub const MAX_MESSAGES_PER_POST: u32 = 200;
/// Key of the fallback entry
pub const DEFAULT_KEY: &str = "default";

/// Language codes accepted by `translate`
pub static KNOWN_LANGUAGES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "af", "sq", "am", "ar", "hy", "az", "eu", "be", "bn", "bs", "bg", "ca", "ceb", "ny",
        "zh-cn", "zh-tw", "co", "hr", "cs", "da", "nl", "en", "eo", "et", "tl", "fi", "fr", "fy",
        "gl", "ka", "de", "el", "gu", "ht", "ha", "haw", "iw", "he", "hi", "hmn", "hu", "is",
        "ig", "id", "ga", "it", "ja", "jw", "kn", "kk", "km", "ko", "ku", "ky", "lo", "la", "lv",
        "lt", "lb", "mk", "mg", "ms", "ml", "mt", "mi", "mr", "mn", "my", "ne", "no", "or", "ps",
        "fa", "pl", "pt", "pa", "ro", "ru", "sm", "gd", "sr", "st", "sn", "sd", "si", "sk", "sl",
        "so", "es", "su", "sw", "sv", "tg", "ta", "te", "th", "tr", "uk", "ur", "ug", "uz", "vi",
        "cy", "xh", "yi", "yo", "zu",
    ]
    .into_iter()
    .collect()
});

pub fn is_known_language(code: &str) -> bool {
    KNOWN_LANGUAGES.contains(code)
}

/// Settings for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSettings {
    pub post_min: u32,
    pub post_max: u32,
    #[serde(default)]
    pub translate: Vec<String>,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            post_min: 30,
            post_max: 70,
            translate: Vec::new(),
        }
    }
}

impl PostSettings {
    /// Inclusive cadence range, tolerant of swapped bounds
    pub fn range(&self) -> (u32, u32) {
        (
            self.post_min.min(self.post_max),
            self.post_min.max(self.post_max),
        )
    }
}

/// All channel settings as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSettings {
    channels: HashMap<String, PostSettings>,
}

impl ChannelSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp a requested cadence into the global limits
    pub fn clamp_post_rate(rate: u32) -> u32 {
        rate.clamp(MIN_MESSAGES_PER_POST, MAX_MESSAGES_PER_POST)
    }

    /// Settings for `channel`, falling back to the default entry
    pub fn get(&self, channel: &str) -> PostSettings {
        self.channels
            .get(channel)
            .or_else(|| self.channels.get(DEFAULT_KEY))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_own_entry(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    fn get_or_create(&mut self, channel: &str) -> &mut PostSettings {
        self.channels.entry(channel.to_string()).or_default()
    }

    /// Store clamped cadence bounds and return what was stored
    pub fn set_post_range(&mut self, channel: &str, min: u32, max: u32) -> (u32, u32) {
        let (min, max) = (Self::clamp_post_rate(min), Self::clamp_post_rate(max));
        let (min, max) = (min.min(max), min.max(max));
        let entry = self.get_or_create(channel);
        entry.post_min = min;
        entry.post_max = max;
        (min, max)
    }

    /// Replace translation targets; empty clears
    pub fn set_translation(&mut self, channel: &str, languages: Vec<String>) {
        self.get_or_create(channel).translate = languages;
    }

    /// Translation targets for channels with their own entry only
    pub fn translation_targets(&self, channel: &str) -> &[String] {
        self.channels
            .get(channel)
            .map(|s| s.translate.as_slice())
            .unwrap_or(&[])
    }
}
