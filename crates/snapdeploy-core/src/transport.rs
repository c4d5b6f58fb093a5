//! HTTP access to the deploy server.
//!
//! The core only talks to the network through [`DeployTransport`]:
//! JSON requests for channel checks and metadata, and a streamed download
//! for snapshot archives.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::DeployError;

/// Result of a completed archive download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Bytes written
    pub size: u64,
    /// Hex SHA-256 of the written bytes
    pub sha256: String,
}

/// Request/response contract the deploy core needs from HTTP.
#[async_trait]
pub trait DeployTransport: Send + Sync {
    /// POST a JSON body and parse the JSON response.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, DeployError>;

    /// GET a JSON document.
    async fn get_json(&self, url: &str) -> Result<Value, DeployError>;

    /// Stream `url` into `dest`, replacing any existing file.
    ///
    /// `dest` must be fully written and flushed when this returns `Ok`.
    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadedFile, DeployError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(format!("snapdeploy/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, DeployError> {
        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        debug!("Received {} bytes", bytes.len());
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl DeployTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, DeployError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json; charset=utf-8")
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, DeployError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<DownloadedFile, DeployError> {
        info!("Starting download: {} -> {:?}", url, dest);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DeployError::Transfer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::Transfer(format!(
                "download failed with status {}",
                status.as_u16()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Download interrupted after {} bytes: {}", size, e);
                    return Err(DeployError::Transfer(e.to_string()));
                }
            };
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        let downloaded = DownloadedFile {
            size,
            sha256: hex::encode(hasher.finalize()),
        };
        info!("Download complete: {} bytes, sha256 {}", size, downloaded.sha256);
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_builds_with_defaults() {
        assert!(HttpTransport::new(&NetworkConfig::default()).is_ok());
    }
}
