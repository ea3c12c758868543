//! Operator console
//!
//! Line-oriented stdin interface:
//! - `text`: generate from `text` and print the result
//! - `#channel text`: generate from `text` and post it to `channel`
//! - `/join a,b`: queue channels for joining
//! - `/load`: reload the model from disk
//! - `/save`: save the model now
//! - `/stats`: model and scheduler counters
//! - `/quit`: shut down

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info};

use crate::bot::ChatBot;
use crate::markov::{MarkovConfig, MarkovModel};
use crate::persistence::PersistenceGateway;
use crate::scheduler::{Outgoing, OutgoingKind};

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Generate(String),
    Post { channel: String, text: String },
    Join(Vec<String>),
    Load,
    Save,
    Stats,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
            return Some(match name.to_lowercase().as_str() {
                "join" => Self::Join(
                    args.split([',', ' '])
                        .map(|c| c.trim().trim_start_matches('#').to_lowercase())
                        .filter(|c| !c.is_empty())
                        .collect(),
                ),
                "load" => Self::Load,
                "save" => Self::Save,
                "stats" => Self::Stats,
                "quit" | "exit" => Self::Quit,
                other => Self::Unknown(other.to_string()),
            });
        }

        if let Some(rest) = line.strip_prefix('#') {
            if let Some((channel, text)) = rest.split_once(' ') {
                return Some(Self::Post {
                    channel: channel.to_lowercase(),
                    text: text.to_string(),
                });
            }
        }

        Some(Self::Generate(line.to_string()))
    }
}

/// Interactive console bound to a running bot
pub struct Console {
    bot: Arc<ChatBot>,
    store: Arc<dyn PersistenceGateway>,
    markov_config: MarkovConfig,
    shutdown: watch::Sender<bool>,
}

impl Console {
    pub fn new(
        bot: Arc<ChatBot>,
        store: Arc<dyn PersistenceGateway>,
        markov_config: MarkovConfig,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            bot,
            store,
            markov_config,
            shutdown,
        }
    }

    /// Execute one command; returns text to print
    pub async fn execute(&self, command: ConsoleCommand) -> String {
        let scheduler = self.bot.scheduler();
        match command {
            ConsoleCommand::Generate(text) => scheduler
                .generate_from(&text)
                .unwrap_or_else(|| "(no response)".to_string()),

            ConsoleCommand::Post { channel, text } => {
                let Some(generated) = scheduler.generate_from(&text) else {
                    return "(no response)".to_string();
                };
                let generated = scheduler.translate(&channel, generated).await;
                info!("Sending: {}", generated);
                self.bot.dispatch(Outgoing {
                    channel: channel.clone(),
                    text: generated.clone(),
                    delay: std::time::Duration::ZERO,
                    kind: OutgoingKind::CadencePost,
                });
                format!("#{} <- {}", channel, generated)
            }

            ConsoleCommand::Join(channels) => {
                if channels.is_empty() {
                    return "Usage: /join <channel>[,<channel>...]".to_string();
                }
                let list = {
                    let mut membership = self.bot.membership().lock();
                    for channel in &channels {
                        membership.summon(channel);
                    }
                    membership.persisted_list()
                };
                if let Err(e) = self.store.save_channels(&list).await {
                    error!("Error saving channel list: {}", e);
                }
                format!("Queued: {}", channels.join(", "))
            }

            ConsoleCommand::Load => match self.store.load_model().await {
                Ok(Some(snapshot)) => {
                    let model = MarkovModel::from_snapshot(self.markov_config.clone(), snapshot);
                    let (contexts, order) = (model.stats().contexts, model.order());
                    if scheduler.replace_model(model) {
                        format!("Loaded {} contexts", contexts)
                    } else {
                        format!("Load refused: saved model has order {}", order)
                    }
                }
                Ok(None) => "No saved model".to_string(),
                Err(e) => format!("Load failed: {}", e),
            },

            ConsoleCommand::Save => {
                let snapshot = scheduler.snapshot();
                match self.store.save_model(&snapshot).await {
                    Ok(()) => format!("Saved {} contexts", snapshot.dict.len()),
                    Err(e) => format!("Save failed: {}", e),
                }
            }

            ConsoleCommand::Stats => {
                let model = scheduler.model_stats();
                let stats = scheduler.stats();
                let (active, pending) = {
                    let membership = self.bot.membership().lock();
                    (membership.active().len(), membership.pending_len())
                };
                format!(
                    "contexts={} transitions={} channels={} active={} pending={} seen={} learned={} posts={} replies={} misses={}",
                    model.contexts,
                    model.transitions,
                    stats.channels,
                    active,
                    pending,
                    stats.messages_seen,
                    stats.messages_learned,
                    stats.posts,
                    stats.direct_replies,
                    stats.generation_misses
                )
            }

            ConsoleCommand::Quit => {
                let _ = self.shutdown.send(true);
                "Shutting down".to_string()
            }

            ConsoleCommand::Unknown(name) => format!("Unknown command: /{}", name),
        }
    }

    /// Read stdin until EOF or `/quit`
    pub async fn run(self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            error!("Console read error: {}", e);
                            break;
                        }
                    };
                    let Some(command) = ConsoleCommand::parse(&line) else {
                        continue;
                    };
                    let quit = command == ConsoleCommand::Quit;
                    println!("{}", self.execute(command).await);
                    if quit {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
