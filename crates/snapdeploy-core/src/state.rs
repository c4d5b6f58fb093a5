//! Persisted deploy pointers.
//!
//! The settings store only holds strings, so every pointer lives under its
//! own key. [`DeployState`] is the typed view: load it at the start of an
//! operation, mutate the fields, and save it back.

use tracing::debug;

use crate::error::DeployError;
use crate::settings::SettingsStore;

/// Settings keys.
pub mod keys {
    pub const CURRENT_UUID: &str = "uuid";
    pub const UPSTREAM_UUID: &str = "upstream_uuid";
    pub const LOADED_UUID: &str = "loaded_uuid";
    pub const MY_VERSIONS: &str = "my_versions";
    pub const VERSION_COUNT: &str = "version_count";
    pub const IGNORE_VERSION: &str = "ionicdeploy_version_ignore";
    pub const VERSION_LABEL: &str = "ionicdeploy_version_label";
}

/// Placeholder uuid meaning "nothing deployed yet".
pub const NO_DEPLOY_AVAILABLE: &str = "NO_DEPLOY_AVAILABLE";

/// Ignore marker value meaning "no version is ignored".
pub const NOTHING_TO_IGNORE: &str = "NOTHING_TO_IGNORE";

/// Snapshot pointers for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployState {
    /// Current deploy, set once its archive is fully downloaded
    pub uuid: String,
    /// Snapshot discovered by the last successful check
    pub upstream_uuid: String,
    /// Snapshot the embedder is serving
    pub loaded_uuid: String,
    /// Snapshot never to be offered again
    pub ignore_uuid: String,
    /// Diagnostic label, see [`VersionLabel`]
    pub label: String,
}

impl DeployState {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self, DeployError> {
        Ok(Self {
            uuid: store.get(keys::CURRENT_UUID, "").await?,
            upstream_uuid: store.get(keys::UPSTREAM_UUID, "").await?,
            loaded_uuid: store.get(keys::LOADED_UUID, "").await?,
            ignore_uuid: store.get(keys::IGNORE_VERSION, "").await?,
            label: store.get(keys::VERSION_LABEL, "").await?,
        })
    }

    pub async fn save(&self, store: &dyn SettingsStore) -> Result<(), DeployError> {
        store.set(keys::CURRENT_UUID, &self.uuid).await?;
        store.set(keys::UPSTREAM_UUID, &self.upstream_uuid).await?;
        store.set(keys::LOADED_UUID, &self.loaded_uuid).await?;
        store.set(keys::IGNORE_VERSION, &self.ignore_uuid).await?;
        store.set(keys::VERSION_LABEL, &self.label).await?;
        debug!("Saved deploy state: {:?}", self);
        Ok(())
    }

    /// Whether a deploy is recorded as current.
    pub fn has_deploy(&self) -> bool {
        !self.uuid.is_empty() && self.uuid != NO_DEPLOY_AVAILABLE
    }

    /// Clear every pointer that names `uuid`. Returns true if anything changed.
    pub fn forget(&mut self, uuid: &str) -> bool {
        let mut changed = false;
        if self.uuid == uuid {
            self.uuid.clear();
            changed = true;
        }
        if self.loaded_uuid == uuid {
            self.loaded_uuid.clear();
            changed = true;
        }
        changed
    }
}

/// `binary_version:installed_at_millis:uuid` diagnostic label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLabel {
    pub binary_version: String,
    pub installed_at_millis: i64,
    pub uuid: String,
}

impl VersionLabel {
    pub fn new(binary_version: &str, installed_at_millis: i64, uuid: &str) -> Self {
        Self {
            binary_version: binary_version.to_string(),
            installed_at_millis,
            uuid: uuid.to_string(),
        }
    }

    /// Split a stored label back into its parts.
    ///
    /// The uuid is taken as everything after the second `:`.
    pub fn parse(label: &str) -> Option<Self> {
        let mut parts = label.splitn(3, ':');
        let binary_version = parts.next()?.to_string();
        let installed_at_millis = parts.next()?.parse().ok()?;
        let uuid = parts.next()?.to_string();
        Some(Self {
            binary_version,
            installed_at_millis,
            uuid,
        })
    }
}

impl std::fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.binary_version, self.installed_at_millis, self.uuid
        )
    }
}
