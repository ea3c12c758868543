//! Markov Chat Bot
//!
//! Watches chat channels, learns a character-level Markov model of what
//! people say, and every so often says something back in the same style.
//!
//! # Features
//!
//! - **Markov Engine**: fixed-order character transitions, weighted generation
//! - **Filtering**: ignored authors/channels, forbidden substrings (fail closed)
//! - **Cadence**: per-channel message thresholds re-rolled after each post
//! - **Admission**: rate-limited channel joins from a FIFO queue
//! - **Persistence**: JSON files with backup-before-overwrite
//! - **Translation**: optional per-channel output translation
//!
//! # Architecture
//!
//! ```text
//! Transport ──► ChatBot ──► ConversationScheduler ──► MarkovModel
//!   (IRC)          │               │
//!                  │               ├── FilterPolicy
//!                  │               ├── ConversationBuffers
//!                  │               └── TranslationPolicy
//!                  └── CommandHandler ──► ChannelLifecycleManager
//!
//! Background: LearnerJob (learn + save), AdmissionJob (joins)
//! ```

pub mod background;
pub mod bot;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod markov;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod translate;
pub mod transport;

pub use background::{AdmissionJob, BackgroundConfig, LearnerJob};
pub use bot::{BotOptions, ChatBot};
pub use buffer::{ContextWindow, ConversationBuffer};
pub use commands::{Command, CommandHandler};
pub use config::Config;
pub use error::{PersistError, TranslateError, TransportError};
pub use filter::{FilterLists, FilterPolicy};
pub use lifecycle::{AdmissionConfig, ChannelLifecycleManager, SummonOutcome, UnsummonOutcome};
pub use markov::{MarkovConfig, MarkovModel, ModelSnapshot};
pub use persistence::{JsonFileStore, MemoryStore, PersistenceGateway};
pub use scheduler::{ConversationScheduler, DelayRange, Outgoing, OutgoingKind, SchedulerConfig};
pub use settings::{ChannelSettings, PostSettings};
pub use translate::{LibreTranslateClient, TranslationPolicy, Translator};
pub use transport::{InboundMessage, IrcTransport, RecordingTransport, Transport};
