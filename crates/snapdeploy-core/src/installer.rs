//! Snapshot download, extraction and activation.
//!
//! A pending snapshot moves through three steps:
//! 1. `download` streams its archive to the staging file `www.zip`
//! 2. `extract` unpacks the staged archive into a folder named after the
//!    snapshot and registers it in the [`VersionLedger`]
//! 3. `activate` marks it as the snapshot the embedder serves
//!
//! Extraction of a snapshot the ledger already holds is skipped, so a
//! retried `extract` never rewrites files.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::unpack_entries;
use crate::context::{DeployContext, UpdateCandidate};
use crate::error::DeployError;
use crate::ledger::{check_snapshot_id, VersionLedger};
use crate::state::{DeployState, VersionLabel, NOTHING_TO_IGNORE};

/// Name of the staged archive inside the data directory.
pub const STAGING_ARCHIVE: &str = "www.zip";

/// Value returned by a successful extraction.
pub const EXTRACT_DONE: &str = "done";

/// What `download` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The pending snapshot is already retained; nothing was fetched
    AlreadyInstalled { uuid: String },
    /// The archive was fetched into the staging file
    Downloaded {
        uuid: String,
        size: u64,
        sha256: String,
    },
}

/// Installs pending snapshots.
pub struct ArchiveInstaller {
    ctx: Arc<DeployContext>,
    ledger: Arc<VersionLedger>,
}

impl ArchiveInstaller {
    pub fn new(ctx: Arc<DeployContext>, ledger: Arc<VersionLedger>) -> Self {
        Self { ctx, ledger }
    }

    /// Path of the staged archive.
    pub fn staging_path(&self) -> PathBuf {
        self.ctx.data_dir().join(STAGING_ARCHIVE)
    }

    fn partial_path(&self) -> PathBuf {
        self.ctx.data_dir().join(format!("{}.part", STAGING_ARCHIVE))
    }

    /// Fetch the pending snapshot's archive.
    ///
    /// The archive is written to a `.part` file and renamed into place once
    /// complete; only then is the current `uuid` pointer moved to the
    /// pending snapshot.
    pub async fn download(
        &self,
        candidate: Option<&UpdateCandidate>,
    ) -> Result<DownloadOutcome, DeployError> {
        let mut state = DeployState::load(self.ctx.settings().as_ref()).await?;
        let upstream = state.upstream_uuid.clone();

        if !upstream.is_empty() && self.ledger.has(&upstream).await? {
            info!("Snapshot {} already installed, skipping download", upstream);
            return Ok(DownloadOutcome::AlreadyInstalled { uuid: upstream });
        }

        let candidate = candidate.ok_or(DeployError::NoPendingUpdate)?;
        if upstream.is_empty() {
            return Err(DeployError::NoPendingUpdate);
        }
        if candidate.uuid != upstream {
            warn!(
                "Candidate {} differs from pending snapshot {}",
                candidate.uuid, upstream
            );
            return Err(DeployError::NoPendingUpdate);
        }

        tokio::fs::create_dir_all(self.ctx.data_dir()).await?;
        let partial = self.partial_path();
        let staging = self.staging_path();

        let file = match self
            .ctx
            .transport()
            .download(&candidate.download_url, &partial)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                error!("Download of snapshot {} failed: {}", upstream, e);
                remove_if_present(&partial).await;
                return Err(match e {
                    DeployError::Transfer(_) => e,
                    other => DeployError::Transfer(other.to_string()),
                });
            }
        };

        tokio::fs::rename(&partial, &staging)
            .await
            .map_err(|e| DeployError::Transfer(format!("cannot stage archive: {}", e)))?;

        state.uuid = upstream.clone();
        state.save(self.ctx.settings().as_ref()).await?;

        info!(
            "Staged snapshot {} ({} bytes) at {:?}",
            upstream, file.size, staging
        );
        Ok(DownloadOutcome::Downloaded {
            uuid: upstream,
            size: file.size,
            sha256: file.sha256,
        })
    }

    /// Unpack the staged archive into the folder for `target_uuid`.
    ///
    /// All-or-nothing per call: the first decode or write failure aborts
    /// before the snapshot is registered, and the next call starts over.
    ///
    /// The staged archive belongs to the current `uuid`; any other target
    /// that is not already retained needs a fresh download first.
    pub async fn extract(&self, target_uuid: &str) -> Result<&'static str, DeployError> {
        check_snapshot_id(target_uuid)?;

        if self.ledger.has(target_uuid).await? {
            info!("Snapshot {} already extracted", target_uuid);
            self.finish_install(target_uuid).await?;
            return Ok(EXTRACT_DONE);
        }

        let state = DeployState::load(self.ctx.settings().as_ref()).await?;
        if state.uuid != target_uuid {
            warn!(
                "Staged archive belongs to {:?}, not {}; download it first",
                state.uuid, target_uuid
            );
            return Err(DeployError::NoPendingUpdate);
        }

        let folder = self.ledger.snapshot_dir(target_uuid);
        tokio::fs::create_dir_all(&folder).await.map_err(|e| {
            DeployError::Extraction(format!("cannot create {:?}: {}", folder, e))
        })?;

        let staging = self.staging_path();
        let bytes = tokio::fs::read(&staging).await.map_err(|e| {
            DeployError::Extraction(format!("cannot read staged archive {:?}: {}", staging, e))
        })?;

        let entries = self.ctx.decoder().decode(&bytes)?;
        let written = unpack_entries(&folder, &entries).await.map_err(|e| {
            error!("Extraction of snapshot {} failed: {}", target_uuid, e);
            e
        })?;
        info!(
            "Extracted {} files for snapshot {} into {:?}",
            written, target_uuid, folder
        );

        self.ledger.add(target_uuid).await?;
        remove_if_present(&staging).await;
        self.finish_install(target_uuid).await?;

        Ok(EXTRACT_DONE)
    }

    /// Serve `uuid` from now on.
    pub async fn activate(&self, uuid: &str) -> Result<(), DeployError> {
        check_snapshot_id(uuid)?;
        if !self.ledger.has(uuid).await? {
            warn!("Activating snapshot {} which is not retained", uuid);
        }

        let mut state = DeployState::load(self.ctx.settings().as_ref()).await?;
        state.loaded_uuid = uuid.to_string();
        state.save(self.ctx.settings().as_ref()).await?;
        info!("Activated snapshot {}", uuid);
        Ok(())
    }

    /// Reset the ignore marker and refresh the version label.
    async fn finish_install(&self, uuid: &str) -> Result<(), DeployError> {
        let mut state = DeployState::load(self.ctx.settings().as_ref()).await?;
        state.ignore_uuid = NOTHING_TO_IGNORE.to_string();
        state.label = VersionLabel::new(
            &self.ctx.config().binary_version_string(),
            self.installed_at_millis(),
            uuid,
        )
        .to_string();
        debug!("Version label now {}", state.label);
        state.save(self.ctx.settings().as_ref()).await
    }

    /// Install time of the host binary, falling back to its modification time.
    fn installed_at_millis(&self) -> i64 {
        if let Some(installed_at) = self.ctx.config().installed_at {
            return installed_at.timestamp_millis();
        }
        std::env::current_exe()
            .and_then(|exe| exe.metadata())
            .and_then(|meta| meta.modified())
            .map(|modified| chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis())
            .unwrap_or(0)
    }
}

async fn remove_if_present(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}
