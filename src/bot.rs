//! Bot wiring
//!
//! Routes inbound chat events to the scheduler or the command handler and
//! sends whatever comes back. Sends are spawned so an artificial delay in
//! one channel never holds up another.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::commands::{Command, CommandHandler};
use crate::error::TransportError;
use crate::lifecycle::ChannelLifecycleManager;
use crate::persistence::PersistenceGateway;
use crate::scheduler::{ConversationScheduler, Outgoing, OutgoingKind};
use crate::settings::ChannelSettings;
use crate::transport::{InboundMessage, Transport};

/// Routing options
#[derive(Debug, Clone)]
pub struct BotOptions {
    /// Prefix for admin commands
    pub command_prefix: String,
    /// Other bots whose messages are dropped (lowercase)
    pub ignored_bots: HashSet<String>,
    /// Upper bound on a single transport send
    pub send_timeout: Duration,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            ignored_bots: ["funtoon", "cynanbot"].into_iter().map(String::from).collect(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// The assembled bot
pub struct ChatBot {
    options: BotOptions,
    scheduler: Arc<ConversationScheduler>,
    commands: CommandHandler,
    membership: Arc<Mutex<ChannelLifecycleManager>>,
    transport: Arc<dyn Transport>,
}

impl ChatBot {
    pub fn new(
        options: BotOptions,
        scheduler: Arc<ConversationScheduler>,
        membership: Arc<Mutex<ChannelLifecycleManager>>,
        settings: Arc<RwLock<ChannelSettings>>,
        store: Arc<dyn PersistenceGateway>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let commands = CommandHandler::new(
            Arc::clone(&membership),
            settings,
            store,
            Arc::clone(&transport),
            &options.command_prefix,
        );
        scheduler.set_log_width(membership.lock().longest_name());

        Self {
            options,
            scheduler,
            commands,
            membership,
            transport,
        }
    }

    pub fn scheduler(&self) -> &Arc<ConversationScheduler> {
        &self.scheduler
    }

    pub fn membership(&self) -> &Arc<Mutex<ChannelLifecycleManager>> {
        &self.membership
    }

    fn bot_name(&self) -> &str {
        &self.scheduler.config().bot_name
    }

    /// Handle one inbound event.
    ///
    /// Returns the spawned send, if the message produced one.
    pub async fn handle(&self, msg: InboundMessage) -> Option<JoinHandle<Result<(), TransportError>>> {
        let outgoing = self.route(&msg).await?;
        Some(self.dispatch(outgoing))
    }

    /// Decide what (if anything) to send in response to `msg`
    pub async fn route(&self, msg: &InboundMessage) -> Option<Outgoing> {
        if msg.author == self.bot_name() || self.options.ignored_bots.contains(&msg.author) {
            return None;
        }

        if msg.channel == self.bot_name() {
            return self.handle_home_channel(msg).await;
        }

        self.scheduler.on_message(msg).await
    }

    /// The bot's own channel: mentions always answered, commands run, nothing learned
    async fn handle_home_channel(&self, msg: &InboundMessage) -> Option<Outgoing> {
        if self.scheduler.is_mention(&msg.text) {
            return self.scheduler.direct_reply(msg).map(|mut reply| {
                reply.delay = Duration::ZERO;
                reply
            });
        }

        let command = Command::parse(&msg.text, &self.options.command_prefix)?;
        debug!("Command {:?} from {}", command, msg.author);
        let reply = self
            .commands
            .execute(command, &msg.author, &msg.display_name)
            .await?;
        self.scheduler
            .set_log_width(self.membership.lock().longest_name());

        Some(Outgoing {
            channel: msg.channel.clone(),
            text: reply,
            delay: Duration::ZERO,
            kind: OutgoingKind::CommandReply,
        })
    }

    /// Send after the outgoing delay, bounded by the send timeout
    pub fn dispatch(&self, outgoing: Outgoing) -> JoinHandle<Result<(), TransportError>> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.options.send_timeout;

        tokio::spawn(async move {
            if !outgoing.delay.is_zero() {
                tokio::time::sleep(outgoing.delay).await;
            }

            let result = tokio::time::timeout(
                timeout,
                transport.send(&outgoing.channel, &outgoing.text),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout.as_secs())));

            if let Err(ref e) = result {
                warn!("Send to {} failed: {}", outgoing.channel, e);
            }
            result
        })
    }
}
