//! Chat transport
//!
//! The bot only needs to join, part, send, and receive a stream of
//! [`InboundMessage`]s. Any chat protocol that can do that plugs in through
//! the [`Transport`] trait.
//!
//! - `irc`: Twitch-flavoured IRC over TCP
//! - `RecordingTransport`: in-process fake that records everything

pub mod irc;
pub mod traits;

pub use irc::{IrcConfig, IrcTransport};
pub use traits::{InboundMessage, RecordingTransport, SentMessage, Transport};
