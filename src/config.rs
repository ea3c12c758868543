//! Configuration management

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::background::BackgroundConfig;
use crate::bot::BotOptions;
use crate::lifecycle::AdmissionConfig;
use crate::markov::{MarkovConfig, DEFAULT_ORDER, MAX_GEN_ATTEMPTS, OUTPUT_MAX};
use crate::scheduler::SchedulerConfig;
use crate::transport::IrcConfig;

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot login name
    pub nick: String,

    /// Chat OAuth token (optional - without it the bot runs console-only)
    pub oauth_token: Option<String>,

    /// IRC server host
    pub irc_host: String,

    /// IRC server port
    pub irc_port: u16,

    /// Directory for channel lists, settings, filters and backups
    pub data_dir: PathBuf,

    /// Model file path
    pub model_path: PathBuf,

    /// Prefix for chat commands
    pub command_prefix: String,

    /// Markov context length
    pub order: usize,

    /// Step bound per generation pass
    pub output_max: usize,

    /// Generation passes before giving up on filtered output
    pub max_gen_attempts: usize,

    /// Percent chance to tag the author in a cadence post
    pub tag_chance: u32,

    /// Percent chance to answer a mention
    pub mention_reply_chance: u32,

    /// Channels joined per admission window
    pub channel_join_limit: usize,

    /// Seconds between admission windows
    pub join_cooldown_secs: u64,

    /// Seconds between model saves
    pub save_interval_secs: u64,

    /// Other bots to ignore entirely
    pub ignored_bots: HashSet<String>,

    /// LibreTranslate endpoint (optional - no translation without it)
    pub translate_url: Option<String>,

    /// LibreTranslate API key (optional)
    pub translate_api_key: Option<String>,

    /// Seconds before a send is abandoned
    pub send_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let nick = std::env::var("BOT_NICK")
            .context("BOT_NICK not set")?
            .trim()
            .to_lowercase();

        let oauth_token = std::env::var("BOT_OAUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let data_dir = std::env::var("BOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let local = PathBuf::from("data");
                if local.exists() {
                    local
                } else {
                    dirs::data_local_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("markov-chatbot")
                }
            });

        let model_path = std::env::var("BOT_MODEL_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("markov_dict.json"));

        let ignored_bots = std::env::var("BOT_IGNORED_BOTS")
            .unwrap_or_else(|_| "funtoon,cynanbot".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            nick,
            oauth_token,
            irc_host: std::env::var("IRC_HOST").unwrap_or_else(|_| "irc.chat.twitch.tv".to_string()),
            irc_port: env_or("IRC_PORT", 6667),
            data_dir,
            model_path,
            command_prefix: std::env::var("BOT_COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),
            order: env_or("BOT_MARKOV_ORDER", DEFAULT_ORDER).max(1),
            output_max: env_or("BOT_OUTPUT_MAX", OUTPUT_MAX),
            max_gen_attempts: env_or("BOT_MAX_GEN_ATTEMPTS", MAX_GEN_ATTEMPTS).max(1),
            tag_chance: env_or("BOT_TAG_CHANCE", 8u32).min(100),
            mention_reply_chance: env_or("BOT_MENTION_REPLY_CHANCE", 1u32).min(100),
            channel_join_limit: env_or("BOT_CHANNEL_LIMIT", 19usize).max(1),
            join_cooldown_secs: env_or("BOT_JOIN_COOLDOWN_SECS", 12),
            save_interval_secs: env_or("BOT_SAVE_INTERVAL_SECS", 300),
            ignored_bots,
            translate_url: std::env::var("TRANSLATE_URL").ok().filter(|u| !u.is_empty()),
            translate_api_key: std::env::var("TRANSLATE_API_KEY").ok().filter(|k| !k.is_empty()),
            send_timeout_secs: env_or("BOT_SEND_TIMEOUT_SECS", 10),
        })
    }

    pub fn markov(&self) -> MarkovConfig {
        MarkovConfig {
            order: self.order,
            output_max: self.output_max,
            max_attempts: self.max_gen_attempts,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tag_chance: self.tag_chance,
            mention_reply_chance: self.mention_reply_chance,
            ..SchedulerConfig::new(&self.nick)
        }
    }

    pub fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            join_ceiling: self.channel_join_limit,
            join_cooldown: Duration::from_secs(self.join_cooldown_secs),
        }
    }

    pub fn background(&self) -> BackgroundConfig {
        BackgroundConfig {
            save_interval: Duration::from_secs(self.save_interval_secs),
            ..BackgroundConfig::default()
        }
    }

    pub fn bot_options(&self) -> BotOptions {
        BotOptions {
            command_prefix: self.command_prefix.clone(),
            ignored_bots: self.ignored_bots.clone(),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }

    /// IRC settings, if a token is configured
    pub fn irc(&self) -> Option<IrcConfig> {
        self.oauth_token.as_ref().map(|token| IrcConfig {
            host: self.irc_host.clone(),
            port: self.irc_port,
            nick: self.nick.clone(),
            token: token.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_parses_and_falls_back() {
        std::env::set_var("MARKOV_TEST_NUMBER", " 42 ");
        std::env::set_var("MARKOV_TEST_GARBAGE", "forty-two");

        assert_eq!(env_or("MARKOV_TEST_NUMBER", 7u32), 42);
        assert_eq!(env_or("MARKOV_TEST_GARBAGE", 7u32), 7);
        assert_eq!(env_or("MARKOV_TEST_MISSING", 7u32), 7);
    }
}
