//! Admin chat commands
//!
//! Issued in the bot's home channel, always scoped to the invoking user's own
//! channel:
//! - `summon`: queue the bot to join
//! - `unsummon`: leave and forget the channel
//! - `msgrate <min> <max>`: cadence bounds, clamped to global limits
//! - `translate <lang>... | none`: translation targets

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::lifecycle::{ChannelLifecycleManager, SummonOutcome, UnsummonOutcome};
use crate::persistence::PersistenceGateway;
use crate::settings::{is_known_language, ChannelSettings};
use crate::transport::Transport;

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Summon,
    Unsummon,
    MsgRate(Vec<String>),
    Translate(Vec<String>),
}

impl Command {
    /// Parse `<prefix><name> args...`; unknown names yield `None`
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let lowered = text.trim().to_lowercase();
        let rest = lowered.strip_prefix(prefix)?;
        let mut parts = rest.split_whitespace();
        let name = parts.next()?;
        let args: Vec<String> = parts.map(str::to_string).collect();

        match name {
            "summon" => Some(Self::Summon),
            "unsummon" => Some(Self::Unsummon),
            "msgrate" => Some(Self::MsgRate(args)),
            "translate" => Some(Self::Translate(args)),
            _ => None,
        }
    }
}

/// Executes commands against shared bot state
pub struct CommandHandler {
    membership: Arc<Mutex<ChannelLifecycleManager>>,
    settings: Arc<RwLock<ChannelSettings>>,
    store: Arc<dyn PersistenceGateway>,
    transport: Arc<dyn Transport>,
    prefix: String,
}

impl CommandHandler {
    pub fn new(
        membership: Arc<Mutex<ChannelLifecycleManager>>,
        settings: Arc<RwLock<ChannelSettings>>,
        store: Arc<dyn PersistenceGateway>,
        transport: Arc<dyn Transport>,
        prefix: &str,
    ) -> Self {
        Self {
            membership,
            settings,
            store,
            transport,
            prefix: prefix.to_string(),
        }
    }

    /// Run `command` for `author`; returns the chat reply, if any
    pub async fn execute(&self, command: Command, author: &str, display_name: &str) -> Option<String> {
        let channel = author.to_lowercase();
        match command {
            Command::Summon => self.summon(&channel, display_name).await,
            Command::Unsummon => self.unsummon(&channel, display_name).await,
            Command::MsgRate(args) => Some(self.msgrate(&channel, display_name, &args).await),
            Command::Translate(args) => Some(self.translate(&channel, display_name, &args).await),
        }
    }

    async fn persist_membership(&self) -> bool {
        let channels = self.membership.lock().persisted_list();
        match self.store.save_channels(&channels).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error saving channel list: {}", e);
                false
            }
        }
    }

    async fn persist_settings(&self) -> bool {
        let settings = self.settings.read().clone();
        match self.store.save_settings(&settings).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error saving channel settings: {}", e);
                false
            }
        }
    }

    async fn summon(&self, channel: &str, display_name: &str) -> Option<String> {
        let outcome = self.membership.lock().summon(channel);
        match outcome {
            SummonOutcome::Queued => {
                info!("*** Queued join for {}", channel);
                if self.persist_membership().await {
                    Some(format!("Joining your channel now, {}!", display_name))
                } else {
                    Some(format!(
                        "Joining your channel now, {}, but I couldn't save that. I may forget after a restart.",
                        display_name
                    ))
                }
            }
            SummonOutcome::AlreadyPending => {
                Some(format!("Joining your channel now, {}!", display_name))
            }
            SummonOutcome::AlreadyActive => {
                Some(format!("I'm already in your channel, {}!", display_name))
            }
            SummonOutcome::Invalid => None,
        }
    }

    async fn unsummon(&self, channel: &str, display_name: &str) -> Option<String> {
        let outcome = self.membership.lock().unsummon(channel);
        match outcome {
            UnsummonOutcome::Left => {
                let saved = self.persist_membership().await;
                if let Err(e) = self.transport.part_channel(channel).await {
                    warn!("Failed to part {}: {}", channel, e);
                }
                info!("*** Left channel {}", display_name);
                Some(Self::unsummon_reply(display_name, saved))
            }
            UnsummonOutcome::Dequeued => {
                let saved = self.persist_membership().await;
                info!("*** Dropped {} from join queue", display_name);
                Some(Self::unsummon_reply(display_name, saved))
            }
            UnsummonOutcome::NotPresent => None,
        }
    }

    fn unsummon_reply(display_name: &str, saved: bool) -> String {
        if saved {
            format!("Alright, I'm out of there, {}!", display_name)
        } else {
            warn!("Channel list not saved after {} left; it may rejoin on restart", display_name);
            format!(
                "Alright, I'm out of there, {}, but I couldn't save that. I may rejoin after a restart.",
                display_name
            )
        }
    }

    async fn msgrate(&self, channel: &str, display_name: &str, args: &[String]) -> String {
        let parsed = match args {
            [min, max] => min.parse::<u32>().ok().zip(max.parse::<u32>().ok()),
            _ => None,
        };

        if let Some((min, max)) = parsed {
            let (min, max) = self.settings.write().set_post_range(channel, min, max);
            if self.persist_settings().await {
                info!("*** Updated min/max for channel {} to {} {}", display_name, min, max);
                return format!("Min and max post settings updated. Thanks @{}!", display_name);
            }
        }

        let (min, max) = self.settings.read().get(channel).range();
        format!(
            "@{}, I will talk every {} to {} messages in your chat. To change this, use `{}msgrate <min> <max>`. For example, `{}msgrate 20 40` to chat every 20 to 40 messages.",
            display_name, min, max, self.prefix, self.prefix
        )
    }

    async fn translate(&self, channel: &str, display_name: &str, args: &[String]) -> String {
        let usage = format!(
            "To change this, use `{p}translate <lang1> <lang2> ... <langN>`, or `{p}translate none` to clear. For example, `{p}translate es en` to translate half messages into spanish and half into english.",
            p = self.prefix
        );

        if let [only] = args {
            if only == "none" {
                self.settings.write().set_translation(channel, Vec::new());
                if self.persist_settings().await {
                    info!("*** Cleared translation for channel {}", display_name);
                    return format!("Translation cleared. Thanks @{}!", display_name);
                }
                return Self::translation_status(display_name, &[], &usage);
            }
        }

        if !args.is_empty() {
            // `none` only clears on its own; in a list it is just an unknown code
            if let Some(unknown) = args.iter().find(|lang| !is_known_language(lang)) {
                return format!("@{}, I don't know the language `{}`.", display_name, unknown);
            }

            self.settings.write().set_translation(channel, args.to_vec());
            if self.persist_settings().await {
                info!("*** Updated translation for channel {} to {:?}", display_name, args);
                return format!("Translation settings updated. Thanks @{}!", display_name);
            }
        }

        let current = self.settings.read().translation_targets(channel).to_vec();
        Self::translation_status(display_name, &current, &usage)
    }

    fn translation_status(display_name: &str, current: &[String], usage: &str) -> String {
        if current.is_empty() {
            format!(
                "@{}, I am not currently translating any messages for you. {}",
                display_name, usage
            )
        } else {
            format!(
                "@{}, I'm currently translating into these languages for you: {}. {}",
                display_name,
                current.join(", "),
                usage
            )
        }
    }
}
