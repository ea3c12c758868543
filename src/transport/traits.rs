//! Transport Trait Definitions

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;

/// A chat message received from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel name, lowercase, without `#`
    pub channel: String,
    /// Author login name, lowercase
    pub author: String,
    /// Author name as shown in chat
    pub display_name: String,
    /// Message body
    pub text: String,
}

impl InboundMessage {
    pub fn new(channel: &str, author: &str, text: &str) -> Self {
        Self {
            channel: channel.to_lowercase(),
            author: author.to_lowercase(),
            display_name: author.to_string(),
            text: text.to_string(),
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }
}

/// Outbound side of a chat connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join several channels at once
    async fn join_channels(&self, channels: &[String]) -> Result<(), TransportError>;

    /// Leave a channel
    async fn part_channel(&self, channel: &str) -> Result<(), TransportError>;

    /// Post `text` to `channel`
    async fn send(&self, channel: &str, text: &str) -> Result<(), TransportError>;
}

/// A message handed to [`RecordingTransport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: String,
    pub text: String,
}

/// Transport that records calls instead of talking to a server
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    joined: Mutex<Vec<String>>,
    parted: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().clone()
    }

    pub fn parted(&self) -> Vec<String> {
        self.parted.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn join_channels(&self, channels: &[String]) -> Result<(), TransportError> {
        self.joined.lock().extend(channels.iter().cloned());
        Ok(())
    }

    async fn part_channel(&self, channel: &str) -> Result<(), TransportError> {
        self.parted.lock().push(channel.to_string());
        Ok(())
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.sent.lock().push(SentMessage {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
