//! Persistent key/value settings.
//!
//! Every pointer and the version ledger are stored as plain strings under a
//! fixed name. Reads never fail on a missing key: they return the caller's
//! default instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::DeployError;

/// Durable string settings with default-on-miss reads.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read `name`, returning `default` when it was never written.
    async fn get(&self, name: &str, default: &str) -> Result<String, DeployError>;

    /// Write `value` under `name`.
    async fn set(&self, name: &str, value: &str) -> Result<(), DeployError>;
}

/// In-memory settings, for tests and embedders that persist elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, name: &str, default: &str) -> Result<String, DeployError> {
        Ok(self
            .values
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), DeployError> {
        self.values
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Settings persisted as a flat JSON object in a single file.
///
/// The whole file is rewritten on every `set`, through a temporary file
/// and a rename so a crash never leaves a truncated document behind.
pub struct FileSettings {
    path: PathBuf,
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl FileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<HashMap<String, String>, DeployError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DeployError::Settings(format!("{:?}: {}", self.path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}, starting empty", self.path);
                Ok(HashMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, values: &HashMap<String, String>) -> Result<(), DeployError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_vec_pretty(values)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettings {
    async fn get(&self, name: &str, default: &str) -> Result<String, DeployError> {
        if let Some(values) = self.cache.read().await.as_ref() {
            return Ok(values.get(name).cloned().unwrap_or_else(|| default.to_string()));
        }

        let values = self.read_file().await?;
        let result = values.get(name).cloned().unwrap_or_else(|| default.to_string());
        *self.cache.write().await = Some(values);
        Ok(result)
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), DeployError> {
        let mut cache = self.cache.write().await;
        let mut values = match cache.take() {
            Some(values) => values,
            None => self.read_file().await?,
        };
        let previous = values.insert(name.to_string(), value.to_string());
        let written = self.write_file(&values).await;
        if let Err(e) = &written {
            warn!("Failed to persist setting {}: {}", name, e);
            // The cache keeps mirroring what is on disk.
            match previous {
                Some(previous) => values.insert(name.to_string(), previous),
                None => values.remove(name),
            };
        }
        *cache = Some(values);
        written
    }
}
