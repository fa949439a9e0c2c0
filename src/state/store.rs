//! State persistence backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::env_string;
use crate::error::{ConfigError, StateError};
use crate::state::PersistedState;
use crate::state::libsql_store::LibSqlStateStore;

/// Loads and saves the dispatcher state document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Load state. An absent or unreadable document yields defaults with a warning;
    /// only a failure to reach the store at all is an error.
    async fn load(&self) -> Result<PersistedState, StateError>;

    /// Replace the stored document. All-or-nothing.
    async fn save(&self, state: &PersistedState) -> Result<(), StateError>;
}

/// Which backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Json,
    LibSql,
}

impl StateBackend {
    /// `DISPATCH_STATE_BACKEND`: `json` (default) or `libsql`.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env_string("DISPATCH_STATE_BACKEND").as_deref() {
            None => Ok(Self::Json),
            Some(raw) => Self::parse(raw),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "DISPATCH_STATE_BACKEND".to_string(),
                message: format!("unknown backend '{other}'"),
            }),
        }
    }

    /// Default file name for the backend.
    pub fn default_path(&self) -> PathBuf {
        match self {
            Self::Json => PathBuf::from("bot_state.json"),
            Self::LibSql => PathBuf::from("bot_state.db"),
        }
    }
}

/// Open the configured backend.
pub async fn open_store(
    backend: StateBackend,
    path: &Path,
) -> Result<Box<dyn StateStore>, StateError> {
    match backend {
        StateBackend::Json => Ok(Box::new(JsonFileStore::new(path))),
        StateBackend::LibSql => Ok(Box::new(LibSqlStateStore::new_local(path).await?)),
    }
}

/// Pretty-printed JSON document on disk.
///
/// Saves go to a sibling temp file which is synced and then renamed over the
/// target, so a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn load(&self) -> Result<PersistedState, StateError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file, starting fresh");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(StateError::Io(e)),
        };

        match serde_json::from_str(&raw) {
            Ok(state) => {
                debug!(path = %self.path.display(), "State loaded");
                Ok(state)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt, starting from defaults"
                );
                Ok(PersistedState::default())
            }
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.temp_path();

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StateError::Write(format!(
                "Failed to replace {}: {e}",
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "State saved");
        Ok(())
    }
}

/// In-memory store (for tests).
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Last saved document, if any.
    pub async fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().await.clone()
    }

    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<PersistedState, StateError> {
        Ok(self.state.lock().await.clone().unwrap_or_default())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        *self.state.lock().await = Some(state.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DedupCategory;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.load().await.unwrap(), PersistedState::default());
    }

    #[tokio::test]
    async fn save_then_load_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        let mut state = PersistedState::default();
        state.dedup_sets.mark(DedupCategory::ProcessedPosts, "p1");
        state.milestone_watermarks.insert("p2".into(), 50);
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.dedup_sets.contains(DedupCategory::ProcessedPosts, "p1"));
        assert_eq!(loaded.milestone_watermarks["p2"], 50);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&PersistedState::default()).await.unwrap();

        assert!(store.path().exists());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryStateStore::new();
        store.save(&PersistedState::default()).await.unwrap();
        store.save(&PersistedState::default()).await.unwrap();
        assert_eq!(store.save_count().await, 2);
        assert!(store.snapshot().await.is_some());
    }

    #[test]
    fn parses_backend_names() {
        assert_eq!(StateBackend::parse("JSON").unwrap(), StateBackend::Json);
        assert_eq!(StateBackend::parse("libsql").unwrap(), StateBackend::LibSql);
        assert!(StateBackend::parse("redis").is_err());
    }
}
