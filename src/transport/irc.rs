//! IRC Transport
//!
//! Plain-text IRC with Twitch capabilities (tags carry the display name).
//!
//! # Configuration
//!
//! Environment variables (see `Config`):
//! - `BOT_NICK`: login name
//! - `BOT_OAUTH_TOKEN`: chat token, with or without the `oauth:` prefix
//! - `IRC_HOST`, `IRC_PORT`: server address

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::traits::{InboundMessage, Transport};
use crate::error::TransportError;

/// Connection settings
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub token: String,
}

/// Connected IRC client
pub struct IrcTransport {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    ready: Arc<AtomicBool>,
}

impl IrcTransport {
    /// Connect, authenticate, and start the reader task.
    ///
    /// Inbound chat messages arrive on the returned receiver.
    pub async fn connect(
        config: &IrcConfig,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), TransportError> {
        let address = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        let (read_half, write_half) = stream.into_split();

        let transport = Self {
            writer: Arc::new(Mutex::new(write_half)),
            ready: Arc::new(AtomicBool::new(true)),
        };

        let token = if config.token.starts_with("oauth:") {
            config.token.clone()
        } else {
            format!("oauth:{}", config.token)
        };

        transport
            .write_line("CAP REQ :twitch.tv/tags twitch.tv/commands")
            .await?;
        transport.write_line(&format!("PASS {}", token)).await?;
        transport
            .write_line(&format!("NICK {}", config.nick.to_lowercase()))
            .await?;

        info!("Connected to {} as {}", address, config.nick);

        let (tx, rx) = mpsc::channel(1024);
        let writer = Arc::clone(&transport.writer);
        let ready = Arc::clone(&transport.ready);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(payload) = line.strip_prefix("PING ") {
                            let pong = format!("PONG {}\r\n", payload);
                            if let Err(e) = writer.lock().await.write_all(pong.as_bytes()).await {
                                warn!("Failed to answer PING: {}", e);
                            }
                            continue;
                        }

                        if line.contains("Login authentication failed") {
                            error!("{}", TransportError::AuthenticationFailed(line));
                            break;
                        }

                        if let Some(message) = parse_privmsg(&line) {
                            if tx.send(message).await.is_err() {
                                debug!("Inbound receiver dropped");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("IRC connection closed by server");
                        break;
                    }
                    Err(e) => {
                        error!("IRC read error: {}", e);
                        break;
                    }
                }
            }
            ready.store(false, Ordering::SeqCst);
        });

        Ok((transport, rx))
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for IrcTransport {
    async fn join_channels(&self, channels: &[String]) -> Result<(), TransportError> {
        if channels.is_empty() {
            return Ok(());
        }
        let list = channels
            .iter()
            .map(|c| format!("#{}", c.to_lowercase()))
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&format!("JOIN {}", list)).await
    }

    async fn part_channel(&self, channel: &str) -> Result<(), TransportError> {
        self.write_line(&format!("PART #{}", channel.to_lowercase()))
            .await
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        // One line per PRIVMSG
        let text = text.replace(['\r', '\n'], " ");
        self.write_line(&format!("PRIVMSG #{} :{}", channel.to_lowercase(), text))
            .await
    }
}

/// Parse a (possibly tagged) PRIVMSG line.
///
/// `@tags :nick!user@host PRIVMSG #channel :text`
pub fn parse_privmsg(line: &str) -> Option<InboundMessage> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (tags, rest) = match line.strip_prefix('@') {
        Some(tagged) => {
            let (tags, rest) = tagged.split_once(' ')?;
            (Some(tags), rest)
        }
        None => (None, line),
    };

    let rest = rest.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix("PRIVMSG ")?;
    let (target, text) = rest.split_once(" :")?;

    let author = prefix.split('!').next()?.to_lowercase();
    let channel = target.trim_start_matches('#').to_lowercase();
    if author.is_empty() || channel.is_empty() {
        return None;
    }

    let display_name = tags
        .and_then(|tags| {
            tags.split(';')
                .filter_map(|tag| tag.split_once('='))
                .find(|(key, _)| *key == "display-name")
                .map(|(_, value)| value.to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| author.clone());

    Some(InboundMessage {
        channel,
        author,
        display_name,
        text: text.to_string(),
    })
}
