//! Per-app deploy session.
//!
//! Everything the lifecycle components share lives here instead of in
//! globals: the settings and transport handles, the data directory, the
//! app/server identity set by `initialize`, and the transient update
//! candidate found by the last check.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::archive::{ArchiveDecoder, ZipDecoder};
use crate::config::DeployConfig;
use crate::settings::SettingsStore;
use crate::transport::DeployTransport;

/// Update offered by the channel and not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCandidate {
    pub uuid: String,
    pub download_url: String,
    pub compatible: bool,
    pub available: bool,
}

/// App identity and server, replaceable through `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub app_id: String,
    pub server_url: String,
}

/// Shared state for one app's deploy lifecycle.
pub struct DeployContext {
    config: DeployConfig,
    data_dir: PathBuf,
    settings: Arc<dyn SettingsStore>,
    transport: Arc<dyn DeployTransport>,
    decoder: Arc<dyn ArchiveDecoder>,
    session: RwLock<Session>,
    candidate: RwLock<Option<UpdateCandidate>>,
}

impl DeployContext {
    pub fn new(
        config: DeployConfig,
        settings: Arc<dyn SettingsStore>,
        transport: Arc<dyn DeployTransport>,
    ) -> Self {
        let data_dir = config.data_dir();
        let session = Session {
            app_id: config.app_id.clone(),
            server_url: config.server_url.clone(),
        };
        Self {
            config,
            data_dir,
            settings,
            transport,
            decoder: Arc::new(ZipDecoder),
            session: RwLock::new(session),
            candidate: RwLock::new(None),
        }
    }

    /// Replace the archive decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn ArchiveDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn transport(&self) -> &dyn DeployTransport {
        self.transport.as_ref()
    }

    pub fn decoder(&self) -> &dyn ArchiveDecoder {
        self.decoder.as_ref()
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn set_session(&self, app_id: &str, server_url: &str) {
        *self.session.write().await = Session {
            app_id: app_id.to_string(),
            server_url: server_url.trim_end_matches('/').to_string(),
        };
    }

    pub async fn set_app_id(&self, app_id: &str) {
        self.session.write().await.app_id = app_id.to_string();
    }

    pub async fn candidate(&self) -> Option<UpdateCandidate> {
        self.candidate.read().await.clone()
    }

    pub async fn set_candidate(&self, candidate: Option<UpdateCandidate>) {
        *self.candidate.write().await = candidate;
    }
}
