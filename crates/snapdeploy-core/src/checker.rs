//! Channel update checks.
//!
//! A check posts a description of this device to the channel and decides
//! from the answer whether a new snapshot should be offered. An offered
//! snapshot becomes the pending `upstream_uuid` and the full candidate is
//! held in the session until it is downloaded or superseded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{DeployContext, UpdateCandidate};
use crate::error::DeployError;
use crate::state::{keys, DeployState, NOTHING_TO_IGNORE, NO_DEPLOY_AVAILABLE};

/// Device description sent with a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDetails {
    pub binary_version: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

/// Body of `POST /deploy/channels/<tag>/check-device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRequest {
    pub channel_tag: String,
    pub app_id: String,
    pub device: DeviceDetails,
}

/// `data` member of the check response.
#[derive(Debug, Clone, Deserialize)]
struct ChannelUpdate {
    #[serde(default)]
    compatible: bool,
    #[serde(default)]
    available: bool,
    snapshot: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    data: ChannelUpdate,
}

/// Queries the channel and evaluates offered snapshots.
pub struct UpdateChecker {
    ctx: Arc<DeployContext>,
}

impl UpdateChecker {
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        Self { ctx }
    }

    /// Build the check request for `channel_tag`.
    ///
    /// The snapshot is omitted when nothing is deployed yet.
    pub async fn device_request(&self, channel_tag: &str, current_uuid: &str) -> CheckRequest {
        let session = self.ctx.session().await;
        let config = self.ctx.config();
        let snapshot = if current_uuid.is_empty() || current_uuid == NO_DEPLOY_AVAILABLE {
            None
        } else {
            Some(current_uuid.to_string())
        };

        CheckRequest {
            channel_tag: channel_tag.to_string(),
            app_id: session.app_id,
            device: DeviceDetails {
                binary_version: config.binary_version_string(),
                platform: config.platform.clone(),
                snapshot,
            },
        }
    }

    /// Ask the channel whether a new snapshot is available.
    ///
    /// Returns the candidate when the response passes [`Self::evaluate`].
    pub async fn check_for_update(
        &self,
        channel_tag: &str,
        current_uuid: &str,
    ) -> Result<Option<UpdateCandidate>, DeployError> {
        if channel_tag.is_empty() {
            return Err(DeployError::InvalidArgument("channel tag is empty".to_string()));
        }

        let session = self.ctx.session().await;
        let endpoint = format!(
            "{}/deploy/channels/{}/check-device",
            session.server_url.trim_end_matches('/'),
            channel_tag
        );
        let request = self.device_request(channel_tag, current_uuid).await;
        info!("Checking channel {} for updates", channel_tag);
        debug!("Check request: {:?}", request);

        let response = self
            .ctx
            .transport()
            .post_json(&endpoint, &serde_json::to_value(&request)?)
            .await
            .map_err(|e| match e {
                DeployError::HttpStatus { .. } | DeployError::Network(_) => e,
                other => DeployError::Network(other.to_string()),
            })?;

        if self.evaluate(Some(&response)).await? {
            Ok(self.ctx.candidate().await)
        } else {
            Ok(None)
        }
    }

    /// Decide whether a channel response carries an actionable update.
    ///
    /// | condition | outcome |
    /// |---|---|
    /// | absent or malformed | not available |
    /// | incompatible and not available | not available |
    /// | snapshot is the ignored one | not available |
    /// | snapshot is the loaded one | not available |
    /// | otherwise | available, recorded as `upstream_uuid` |
    ///
    /// An incompatible response that still reports `available` is not
    /// rejected outright; it goes on to the ignore and loaded checks.
    pub async fn evaluate(&self, response: Option<&Value>) -> Result<bool, DeployError> {
        let Some(response) = response else {
            info!("Unable to check for update");
            return Ok(false);
        };

        let update = match CheckResponse::deserialize(response) {
            Ok(parsed) => parsed.data,
            Err(e) => {
                warn!("Malformed check response: {}", e);
                return Ok(false);
            }
        };

        if !update.compatible {
            warn!("Refusing update due to incompatible binary version");
            if !update.available {
                return Ok(false);
            }
        }

        let mut state = DeployState::load(self.ctx.settings().as_ref()).await?;
        if update.snapshot == state.ignore_uuid {
            debug!("Snapshot {} is ignored", update.snapshot);
            return Ok(false);
        }
        if update.snapshot == state.loaded_uuid {
            debug!("Snapshot {} is already loaded", update.snapshot);
            return Ok(false);
        }

        state.upstream_uuid = update.snapshot.clone();
        state.save(self.ctx.settings().as_ref()).await?;

        info!("Update available: snapshot {}", update.snapshot);
        self.ctx
            .set_candidate(Some(UpdateCandidate {
                uuid: update.snapshot,
                download_url: update.url,
                compatible: update.compatible,
                available: update.available,
            }))
            .await;
        Ok(true)
    }

    /// Evaluate a raw JSON response handed over by the embedder.
    ///
    /// Unparseable text is treated as a malformed response.
    pub async fn parse_update(&self, raw: &str) -> Result<bool, DeployError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.evaluate(Some(&value)).await,
            Err(e) => {
                warn!("Update response is not JSON: {}", e);
                self.evaluate(None).await
            }
        }
    }

    /// Fetch the user metadata attached to a snapshot.
    pub async fn fetch_metadata(&self, uuid: &str) -> Result<Value, DeployError> {
        let session = self.ctx.session().await;
        let endpoint = format!(
            "{}/deploy/snapshots/{}?app_id={}",
            session.server_url.trim_end_matches('/'),
            uuid,
            session.app_id
        );

        let response = self.ctx.transport().get_json(&endpoint).await?;
        response
            .get("data")
            .and_then(|data| data.get("user_metadata"))
            .cloned()
            .ok_or(DeployError::MetadataUnavailable)
    }

    /// Never offer `uuid` again, until the marker is cleared.
    pub async fn ignore(&self, uuid: &str) -> Result<(), DeployError> {
        info!("Ignoring snapshot {}", uuid);
        self.ctx.settings().set(keys::IGNORE_VERSION, uuid).await
    }

    /// Reset the ignore marker.
    pub async fn clear_ignore(&self) -> Result<(), DeployError> {
        self.ctx
            .settings()
            .set(keys::IGNORE_VERSION, NOTHING_TO_IGNORE)
            .await
    }
}
