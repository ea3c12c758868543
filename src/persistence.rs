//! Persistence Gateway
//!
//! Durable state is the model table, the active channel list, per-channel
//! settings and the filter lists. Conversation buffers are never stored.
//!
//! # Files
//!
//! ```text
//! <data_dir>/
//! ├── channels.json             {"channels": [...]}
//! ├── channel_settings.json     {"default": {...}, "<channel>": {...}}
//! ├── user_ignore_list.json     {"ignore_list": [...]}
//! ├── channel_ignore_list.json  {"ignore_list": [...]}
//! ├── filter.json               {"filter_list": [...]}
//! └── backups/                  previous copies of channels/settings
//! ```
//!
//! The model file lives wherever the config points it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::filter::FilterLists;
use crate::markov::ModelSnapshot;
use crate::settings::ChannelSettings;

pub type Result<T> = std::result::Result<T, PersistError>;

/// Storage for everything that outlives the process
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_model(&self) -> Result<Option<ModelSnapshot>>;
    async fn save_model(&self, snapshot: &ModelSnapshot) -> Result<()>;

    async fn load_channels(&self) -> Result<Vec<String>>;
    /// Backs up the previous list before overwriting
    async fn save_channels(&self, channels: &[String]) -> Result<()>;

    async fn load_settings(&self) -> Result<ChannelSettings>;
    /// Backs up the previous settings before overwriting
    async fn save_settings(&self, settings: &ChannelSettings) -> Result<()>;

    async fn load_filters(&self) -> Result<FilterLists>;
}

#[derive(Serialize, Deserialize)]
struct ChannelsFile {
    channels: Vec<String>,
}

#[derive(Deserialize)]
struct IgnoreListFile {
    ignore_list: Vec<String>,
}

#[derive(Deserialize)]
struct FilterFile {
    filter_list: Vec<String>,
}

/// JSON files under a data directory
pub struct JsonFileStore {
    data_dir: PathBuf,
    model_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            model_path: model_path.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Read and parse a JSON file; `Ok(None)` if it does not exist
    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let path_str = path.display().to_string();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found", path_str);
                return Ok(None);
            }
            Err(e) => return Err(PersistError::io(path_str, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistError::json(path_str, e))
    }

    /// Write through a temp file so a crash never leaves half a file
    async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, pretty: bool) -> Result<()> {
        let path_str = path.display().to_string();
        let data = if pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| PersistError::json(path_str.clone(), e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistError::io(path_str.clone(), e))?;
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| PersistError::io(path_str.clone(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PersistError::io(path_str, e))?;
        Ok(())
    }

    /// Copy the current version of `path` into the backups directory
    async fn backup(&self, path: &Path) -> Result<()> {
        if tokio::fs::metadata(path).await.is_err() {
            return Ok(());
        }

        let dir = self.backup_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistError::io(dir.display().to_string(), e))?;

        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let target = dir.join(name);
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| PersistError::io(target.display().to_string(), e))?;
        debug!("Backed up {} to {}", path.display(), target.display());
        Ok(())
    }

    async fn load_ignore_list(&self, name: &str) -> Result<Vec<String>> {
        Ok(Self::read_json::<IgnoreListFile>(&self.path(name))
            .await?
            .map(|f| f.ignore_list)
            .unwrap_or_default())
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn load_model(&self) -> Result<Option<ModelSnapshot>> {
        let snapshot = Self::read_json::<ModelSnapshot>(&self.model_path).await?;
        if let Some(ref s) = snapshot {
            info!("Loaded model with {} contexts from {}", s.dict.len(), self.model_path.display());
        }
        Ok(snapshot)
    }

    async fn save_model(&self, snapshot: &ModelSnapshot) -> Result<()> {
        Self::write_json(&self.model_path, snapshot, false).await?;
        info!("Saved model ({} contexts)", snapshot.dict.len());
        Ok(())
    }

    async fn load_channels(&self) -> Result<Vec<String>> {
        let path = self.path("channels.json");
        match Self::read_json::<ChannelsFile>(&path).await? {
            Some(file) => Ok(file.channels),
            None => {
                warn!("No channel list at {}, starting empty", path.display());
                Ok(Vec::new())
            }
        }
    }

    async fn save_channels(&self, channels: &[String]) -> Result<()> {
        let path = self.path("channels.json");
        self.backup(&path).await?;
        let file = ChannelsFile {
            channels: channels.to_vec(),
        };
        Self::write_json(&path, &file, true).await
    }

    async fn load_settings(&self) -> Result<ChannelSettings> {
        Ok(Self::read_json(&self.path("channel_settings.json"))
            .await?
            .unwrap_or_default())
    }

    async fn save_settings(&self, settings: &ChannelSettings) -> Result<()> {
        let path = self.path("channel_settings.json");
        self.backup(&path).await?;
        Self::write_json(&path, settings, true).await
    }

    async fn load_filters(&self) -> Result<FilterLists> {
        let ignored_authors = self.load_ignore_list("user_ignore_list.json").await?;
        let ignored_channels = self.load_ignore_list("channel_ignore_list.json").await?;
        let forbidden = Self::read_json::<FilterFile>(&self.path("filter.json"))
            .await?
            .map(|f| f.filter_list)
            .unwrap_or_default();

        info!(
            "Filters: {} ignored authors, {} ignored channels, {} forbidden",
            ignored_authors.len(),
            ignored_channels.len(),
            forbidden.len()
        );

        Ok(FilterLists {
            ignored_authors: ignored_authors.into_iter().collect(),
            ignored_channels: ignored_channels.into_iter().collect(),
            forbidden,
        })
    }
}

/// In-process store, for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    model: Mutex<Option<ModelSnapshot>>,
    channels: Mutex<Vec<String>>,
    settings: Mutex<ChannelSettings>,
    filters: Mutex<FilterLists>,
    model_saves: Mutex<usize>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: &[&str]) -> Self {
        let store = Self::default();
        *store.channels.lock() = channels.iter().map(|c| c.to_string()).collect();
        store
    }

    pub fn set_filters(&self, filters: FilterLists) {
        *self.filters.lock() = filters;
    }

    /// Make every save fail, to exercise error paths
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn model_saves(&self) -> usize {
        *self.model_saves.lock()
    }

    pub fn saved_model(&self) -> Option<ModelSnapshot> {
        self.model.lock().clone()
    }

    pub fn saved_channels(&self) -> Vec<String> {
        self.channels.lock().clone()
    }

    pub fn saved_settings(&self) -> ChannelSettings {
        self.settings.lock().clone()
    }

    fn check_writable(&self, what: &str) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(PersistError::io(
                what,
                std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn load_model(&self) -> Result<Option<ModelSnapshot>> {
        Ok(self.model.lock().clone())
    }

    async fn save_model(&self, snapshot: &ModelSnapshot) -> Result<()> {
        self.check_writable("model")?;
        *self.model.lock() = Some(snapshot.clone());
        *self.model_saves.lock() += 1;
        Ok(())
    }

    async fn load_channels(&self) -> Result<Vec<String>> {
        Ok(self.channels.lock().clone())
    }

    async fn save_channels(&self, channels: &[String]) -> Result<()> {
        self.check_writable("channels")?;
        *self.channels.lock() = channels.to_vec();
        Ok(())
    }

    async fn load_settings(&self) -> Result<ChannelSettings> {
        Ok(self.settings.lock().clone())
    }

    async fn save_settings(&self, settings: &ChannelSettings) -> Result<()> {
        self.check_writable("settings")?;
        *self.settings.lock() = settings.clone();
        Ok(())
    }

    async fn load_filters(&self) -> Result<FilterLists> {
        Ok(self.filters.lock().clone())
    }
}
