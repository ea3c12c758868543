//! Background Jobs
//!
//! Two periodic jobs run beside message handling:
//! - **Learner**: folds pending channel text into the model every tick and
//!   saves the model when it changed and the save interval has passed
//! - **Admission**: joins the next batch of queued channels when due
//!
//! Errors inside a tick are logged and the job carries on. On shutdown the
//! learner drains once more and saves if anything is unsaved.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::PersistError;
use crate::lifecycle::ChannelLifecycleManager;
use crate::persistence::PersistenceGateway;
use crate::scheduler::ConversationScheduler;
use crate::transport::Transport;

/// Configuration for background jobs
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// How often each job wakes up
    pub tick: Duration,
    /// Minimum time between model saves
    pub save_interval: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            save_interval: Duration::from_secs(300),
        }
    }
}

/// What a learner tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LearnTick {
    pub channels_learned: usize,
    pub saved: bool,
}

/// Drains pending text into the model and saves it periodically
pub struct LearnerJob {
    scheduler: Arc<ConversationScheduler>,
    store: Arc<dyn PersistenceGateway>,
    config: BackgroundConfig,
    last_save: Instant,
}

impl LearnerJob {
    pub fn new(
        scheduler: Arc<ConversationScheduler>,
        store: Arc<dyn PersistenceGateway>,
        config: BackgroundConfig,
        now: Instant,
    ) -> Self {
        Self {
            scheduler,
            store,
            config,
            last_save: now,
        }
    }

    /// One iteration at time `now`
    pub async fn tick(&mut self, now: Instant) -> LearnTick {
        let channels_learned = self.scheduler.drain_pending();

        let due = now.saturating_duration_since(self.last_save) > self.config.save_interval;
        if !due || !self.scheduler.has_unsaved_changes() {
            return LearnTick {
                channels_learned,
                saved: false,
            };
        }

        // Failed saves wait for the next interval rather than retrying every tick
        self.last_save = now;
        let saved = match self.save().await {
            Ok(saved) => saved,
            Err(e) => {
                error!("Model save failed: {}", e);
                false
            }
        };

        LearnTick {
            channels_learned,
            saved,
        }
    }

    /// Save the model if it has unsaved changes
    pub async fn save(&self) -> Result<bool, PersistError> {
        let Some(snapshot) = self.scheduler.take_snapshot_for_save() else {
            return Ok(false);
        };

        if let Err(e) = self.store.save_model(&snapshot).await {
            self.scheduler.mark_unsaved();
            return Err(e);
        }
        Ok(true)
    }

    /// Final drain and save before exit
    pub async fn flush(&self) -> Result<bool, PersistError> {
        self.scheduler.drain_pending();
        self.save().await
    }

    /// Run until `shutdown` flips to true, then flush
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Learner started (save every {:?})", self.config.save_interval);
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.tick(Instant::now()).await;
                    if result.saved {
                        debug!("Model saved after learning from {} channels", result.channels_learned);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match self.flush().await {
            Ok(true) => info!("Model flushed on shutdown"),
            Ok(false) => debug!("Model unchanged at shutdown"),
            Err(e) => error!("Failed to flush model on shutdown: {}", e),
        }
    }
}

/// Joins queued channels in rate-limited batches
pub struct AdmissionJob {
    membership: Arc<Mutex<ChannelLifecycleManager>>,
    scheduler: Arc<ConversationScheduler>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistenceGateway>,
    tick: Duration,
}

impl AdmissionJob {
    pub fn new(
        membership: Arc<Mutex<ChannelLifecycleManager>>,
        scheduler: Arc<ConversationScheduler>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistenceGateway>,
        tick: Duration,
    ) -> Self {
        Self {
            membership,
            scheduler,
            transport,
            store,
            tick,
        }
    }

    /// Admit whatever is due at `now`; returns the channels joined
    pub async fn tick(&self, now: Instant) -> Vec<String> {
        let (batch, channels, width) = {
            let mut membership = self.membership.lock();
            let batch = membership.admit_due(now);
            (batch, membership.persisted_list(), membership.longest_name())
        };

        if batch.is_empty() {
            return batch;
        }

        info!("*** Joining channels: {}", batch.join(", "));
        self.scheduler.set_log_width(width);

        if let Err(e) = self.transport.join_channels(&batch).await {
            warn!("Join request failed: {}", e);
        }
        if let Err(e) = self.store.save_channels(&channels).await {
            error!("Error saving channel list: {}", e);
        }
        batch
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Channel admission started");
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Channel admission stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterPolicy;
    use crate::lifecycle::AdmissionConfig;
    use crate::markov::MarkovModel;
    use crate::persistence::MemoryStore;
    use crate::scheduler::SchedulerConfig;
    use crate::settings::ChannelSettings;
    use crate::transport::{InboundMessage, RecordingTransport};
    use parking_lot::RwLock;

    fn scheduler() -> Arc<ConversationScheduler> {
        Arc::new(
            ConversationScheduler::new(
                SchedulerConfig::new("bot"),
                MarkovModel::with_order(3),
                FilterPolicy::default(),
                Arc::new(RwLock::new(ChannelSettings::new())),
                None,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_learner_saves_only_when_due_and_dirty() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryStore::new());
        let start = Instant::now();
        let mut job = LearnerJob::new(scheduler.clone(), store.clone(), BackgroundConfig::default(), start);

        scheduler
            .on_message(&InboundMessage::new("room", "alice", "hello"))
            .await;

        let tick = job.tick(start + Duration::from_secs(1)).await;
        assert_eq!(tick.channels_learned, 1);
        assert!(!tick.saved);
        assert_eq!(store.model_saves(), 0);

        let tick = job.tick(start + Duration::from_secs(301)).await;
        assert!(tick.saved);
        assert_eq!(store.model_saves(), 1);

        // Nothing new learned, nothing to save
        let tick = job.tick(start + Duration::from_secs(700)).await;
        assert!(!tick.saved);
        assert_eq!(store.model_saves(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_is_retried_later() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryStore::new());
        let start = Instant::now();
        let mut job = LearnerJob::new(scheduler.clone(), store.clone(), BackgroundConfig::default(), start);

        scheduler
            .on_message(&InboundMessage::new("room", "alice", "hello"))
            .await;
        store.set_fail_writes(true);

        let tick = job.tick(start + Duration::from_secs(301)).await;
        assert!(!tick.saved);
        assert!(scheduler.has_unsaved_changes());

        store.set_fail_writes(false);
        // Waits for the next interval
        assert!(!job.tick(start + Duration::from_secs(302)).await.saved);
        assert!(job.tick(start + Duration::from_secs(602)).await.saved);
        assert!(store.saved_model().is_some());
    }

    #[tokio::test]
    async fn test_flush_saves_pending_learning() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryStore::new());
        let job = LearnerJob::new(scheduler.clone(), store.clone(), BackgroundConfig::default(), Instant::now());

        scheduler
            .on_message(&InboundMessage::new("room", "alice", "hello"))
            .await;

        assert!(job.flush().await.unwrap());
        assert!(!job.flush().await.unwrap());
        assert!(store.saved_model().unwrap().dict.contains_key("hel"));
    }

    #[tokio::test]
    async fn test_admission_joins_and_persists() {
        let start = Instant::now();
        let names: Vec<String> = (0..25).map(|i| format!("c{}", i)).collect();
        let membership = Arc::new(Mutex::new(ChannelLifecycleManager::from_persisted(
            AdmissionConfig::default(),
            names,
            start,
        )));
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(MemoryStore::new());
        let job = AdmissionJob::new(
            membership.clone(),
            scheduler(),
            transport.clone(),
            store.clone(),
            Duration::from_secs(1),
        );

        assert!(job.tick(start + Duration::from_secs(1)).await.is_empty());

        let joined = job.tick(start + Duration::from_secs(13)).await;
        assert_eq!(joined.len(), 6);
        assert_eq!(transport.joined().len(), 6);
        assert_eq!(store.saved_channels().len(), 25);
        assert_eq!(membership.lock().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_flushes() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryStore::new());
        let job = LearnerJob::new(scheduler.clone(), store.clone(), BackgroundConfig::default(), Instant::now());
        let (tx, rx) = watch::channel(false);

        scheduler
            .on_message(&InboundMessage::new("room", "alice", "hello world"))
            .await;

        let handle = tokio::spawn(job.run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.model_saves(), 1);
    }
}
