//! Deploy facade - the surface every external command goes through.
//!
//! The facade owns the session context and the three lifecycle components:
//! - [`UpdateChecker`] for channel checks
//! - [`ArchiveInstaller`] for download, extraction and activation
//! - [`VersionLedger`] for retained snapshot bookkeeping
//!
//! Each call makes sure the sequence counter is initialised, then forwards
//! to the components. Failures are returned unchanged; nothing is retried.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::checker::UpdateChecker;
use crate::config::DeployConfig;
use crate::context::DeployContext;
use crate::error::DeployError;
use crate::installer::{ArchiveInstaller, DownloadOutcome};
use crate::ledger::VersionLedger;
use crate::settings::SettingsStore;
use crate::state::DeployState;
use crate::transport::{DeployTransport, HttpTransport};

/// Answer to `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployInfo {
    pub deploy_uuid: String,
    pub binary_version: String,
}

/// Orchestrates the deploy lifecycle for one app.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use snapdeploy_core::{DeployConfig, DeployFacade, FileSettings};
///
/// let config = DeployConfig::load_from_file(path)?;
/// let settings = Arc::new(FileSettings::new(config.data_dir().join("settings.json")));
/// let deploy = DeployFacade::with_http(config, settings)?;
///
/// if deploy.check("production").await? {
///     deploy.download().await?;
///     deploy.extract().await?;
/// }
/// ```
pub struct DeployFacade {
    ctx: Arc<DeployContext>,
    ledger: Arc<VersionLedger>,
    checker: UpdateChecker,
    installer: ArchiveInstaller,
}

impl DeployFacade {
    pub fn new(ctx: DeployContext) -> Self {
        let ctx = Arc::new(ctx);
        let ledger = Arc::new(VersionLedger::new(
            ctx.settings().clone(),
            ctx.data_dir().to_path_buf(),
        ));
        Self {
            checker: UpdateChecker::new(ctx.clone()),
            installer: ArchiveInstaller::new(ctx.clone(), ledger.clone()),
            ledger,
            ctx,
        }
    }

    /// Build a facade talking to the configured server over HTTP.
    pub fn with_http(
        config: DeployConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, DeployError> {
        config.validate()?;
        let transport: Arc<dyn DeployTransport> = Arc::new(HttpTransport::new(&config.network)?);
        Ok(Self::new(DeployContext::new(config, settings, transport)))
    }

    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    async fn ensure_app(&self) -> Result<(), DeployError> {
        self.ledger.init_counter().await
    }

    /// Switch app identity and server.
    pub async fn initialize(&self, app_id: &str, server_url: &str) -> Result<(), DeployError> {
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(DeployError::InvalidArgument(format!(
                "server url must be http(s): {}",
                server_url
            )));
        }
        self.ctx.set_session(app_id, server_url).await;
        self.ensure_app().await?;
        info!("Initialised deploy for app {} against {}", app_id, server_url);
        Ok(())
    }

    /// Switch app identity, keeping the server.
    pub async fn set_app(&self, app_id: &str) -> Result<(), DeployError> {
        self.ctx.set_app_id(app_id).await;
        self.ensure_app().await
    }

    /// Check `channel_tag` for a new snapshot.
    pub async fn check(&self, channel_tag: &str) -> Result<bool, DeployError> {
        self.ensure_app().await?;
        let state = DeployState::load(self.ctx.settings().as_ref()).await?;
        let candidate = self
            .checker
            .check_for_update(channel_tag, &state.uuid)
            .await?;
        Ok(candidate.is_some())
    }

    /// Evaluate a channel response obtained by the embedder.
    pub async fn parse_update(&self, raw: &str) -> Result<bool, DeployError> {
        self.ensure_app().await?;
        self.checker.parse_update(raw).await
    }

    /// Download the pending snapshot.
    ///
    /// `true` both after a transfer and when the snapshot is already retained.
    pub async fn download(&self) -> Result<bool, DeployError> {
        self.download_outcome().await.map(|_| true)
    }

    /// Like [`Self::download`], reporting what actually happened.
    pub async fn download_outcome(&self) -> Result<DownloadOutcome, DeployError> {
        self.ensure_app().await?;
        let candidate = self.ctx.candidate().await;
        let outcome = self.installer.download(candidate.as_ref()).await?;
        if matches!(outcome, DownloadOutcome::Downloaded { .. }) {
            self.ctx.set_candidate(None).await;
        }
        Ok(outcome)
    }

    /// Extract the downloaded snapshot.
    ///
    /// Targets the pending `upstream_uuid`, or the current `uuid` when
    /// nothing is pending.
    pub async fn extract(&self) -> Result<&'static str, DeployError> {
        self.ensure_app().await?;
        let state = DeployState::load(self.ctx.settings().as_ref()).await?;
        let target = if state.upstream_uuid.is_empty() {
            state.uuid
        } else {
            state.upstream_uuid
        };
        if target.is_empty() {
            return Err(DeployError::NoPendingUpdate);
        }
        debug!("Extracting snapshot {}", target);
        self.installer.extract(&target).await
    }

    /// Serve `uuid` from now on.
    pub async fn activate(&self, uuid: &str) -> Result<(), DeployError> {
        self.ensure_app().await?;
        self.installer.activate(uuid).await
    }

    /// Current deploy and binary version.
    pub async fn info(&self) -> Result<DeployInfo, DeployError> {
        self.ensure_app().await?;
        let state = DeployState::load(self.ctx.settings().as_ref()).await?;
        Ok(DeployInfo {
            deploy_uuid: state.uuid,
            binary_version: self.ctx.config().binary_version_string(),
        })
    }

    /// Pointers as currently persisted.
    pub async fn state(&self) -> Result<DeployState, DeployError> {
        DeployState::load(self.ctx.settings().as_ref()).await
    }

    /// Retained snapshot uuids.
    pub async fn list_versions(&self) -> Result<Vec<String>, DeployError> {
        self.ensure_app().await?;
        self.ledger.list().await
    }

    /// Delete a retained snapshot. Returns whether a folder was removed.
    pub async fn delete_version(&self, uuid: &str) -> Result<bool, DeployError> {
        self.ensure_app().await?;
        self.ledger.remove(uuid).await
    }

    /// User metadata of a snapshot.
    pub async fn metadata(&self, uuid: &str) -> Result<Value, DeployError> {
        self.ensure_app().await?;
        self.checker.fetch_metadata(uuid).await
    }

    /// Never offer `uuid` again.
    pub async fn ignore(&self, uuid: &str) -> Result<(), DeployError> {
        self.ensure_app().await?;
        self.checker.ignore(uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys;
    use crate::test_support::{build_zip, check_body, harness};

    fn facade_from(h: &crate::test_support::Harness) -> DeployFacade {
        DeployFacade::new(DeployContext::new(
            h.ctx.config().clone(),
            h.settings.clone(),
            h.transport.clone(),
        ))
    }

    #[tokio::test]
    async fn test_calls_initialise_counter() {
        let h = harness();
        let deploy = facade_from(&h);
        deploy.list_versions().await.unwrap();
        assert_eq!(h.settings.get(keys::VERSION_COUNT, "").await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_initialize_switches_server() {
        let h = harness();
        let deploy = facade_from(&h);
        deploy
            .initialize("app-2", "https://other.example.com/")
            .await
            .unwrap();
        *h.transport.check_response.lock().unwrap() = Some(check_body("v1", true, true));

        assert!(deploy.check("production").await.unwrap());
        let posts = h.transport.posts.lock().unwrap();
        assert_eq!(
            posts[0].0,
            "https://other.example.com/deploy/channels/production/check-device"
        );
        assert_eq!(posts[0].1["app_id"], "app-2");
    }

    #[tokio::test]
    async fn test_initialize_rejects_non_http() {
        let h = harness();
        let deploy = facade_from(&h);
        assert!(deploy.initialize("a", "file:///tmp").await.is_err());
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let h = harness();
        let deploy = facade_from(&h);
        *h.transport.check_response.lock().unwrap() = Some(check_body("v1", true, true));
        *h.transport.archive.lock().unwrap() = Some(build_zip(&[("index.html", b"v1")]));

        assert!(deploy.check("production").await.unwrap());
        assert!(deploy.download().await.unwrap());
        assert_eq!(deploy.extract().await.unwrap(), "done");
        deploy.activate("v1").await.unwrap();

        let info = deploy.info().await.unwrap();
        assert_eq!(info.deploy_uuid, "v1");
        assert_eq!(deploy.list_versions().await.unwrap(), vec!["v1"]);

        // The loaded snapshot is not offered again.
        assert!(!deploy.check("production").await.unwrap());
        assert!(deploy.context().candidate().await.is_none());
    }

    #[tokio::test]
    async fn test_extract_with_nothing_pending() {
        let h = harness();
        let deploy = facade_from(&h);
        assert!(matches!(
            deploy.extract().await,
            Err(DeployError::NoPendingUpdate)
        ));
    }

    #[tokio::test]
    async fn test_check_failure_surfaces() {
        let h = harness();
        let deploy = facade_from(&h);
        let err = deploy.check("production").await.unwrap_err();
        assert_eq!(err.code(), "DEPLOY_HTTP_ERROR");
    }
}
