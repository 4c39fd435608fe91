//! Backing stores for tracker state
//!
//! Tracker state is tiny (a handful of `bucket:count` lines, or one decimal
//! integer) but must survive process restarts. The store is deliberately dumb:
//! it reads and writes an opaque payload per tracker key, and the trackers own
//! parsing, formatting and locking. Corrupt or missing payloads are treated by
//! the trackers as zero usage, never as an error.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::error::Result;

/// Durable key-value payload store for tracker state.
///
/// Implementations must tolerate concurrent readers; writers are serialized by
/// the tracker's own keyed lock, not by the store. A read racing a write must
/// return either the old payload or the new one, never a partial payload.
#[async_trait]
pub trait CounterStore: fmt::Debug + Send + Sync {
    /// Read the payload for `key`, or `None` if nothing was ever written.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the payload for `key`.
    async fn write(&self, key: &str, payload: &str) -> Result<()>;
}

/// In-memory store for tests and transient trackers.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn write(&self, key: &str, payload: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }
}

/// File-backed store: one file per tracker key under a root directory.
///
/// Key characters outside `[A-Za-z0-9._-]` are mapped to `_` so keys like
/// `server:01HX...` produce safe flat filenames with no traversal potential.
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    root: PathBuf,
}

impl FileCounterStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, payload: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        // Tracker reads run without the tracker lock, so the payload is
        // staged next to the target and published with a rename; a concurrent
        // read never sees a truncated file.
        let target = self.path_for(key);
        let mut staged = target.clone().into_os_string();
        staged.push(".staging");
        let staged = PathBuf::from(staged);

        tokio::fs::write(&staged, payload).await?;
        tokio::fs::rename(&staged, &target).await?;
        Ok(())
    }
}
