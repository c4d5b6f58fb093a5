//! Fakes shared by the unit tests.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use crate::config::DeployConfig;
use crate::context::DeployContext;
use crate::error::DeployError;
use crate::settings::MemorySettings;
use crate::transport::{DeployTransport, DownloadedFile};

/// Canned transport. `None` responses behave like an unreachable server.
#[derive(Default)]
pub(crate) struct FakeTransport {
    pub check_response: Mutex<Option<Value>>,
    pub metadata_response: Mutex<Option<Value>>,
    pub archive: Mutex<Option<Vec<u8>>>,
    pub posts: Mutex<Vec<(String, Value)>>,
    pub gets: Mutex<Vec<String>>,
    pub downloads: AtomicUsize,
}

impl FakeTransport {
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeployTransport for FakeTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, DeployError> {
        self.posts.lock().unwrap().push((url.to_string(), body.clone()));
        self.check_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DeployError::Network("connection refused".into()))
    }

    async fn get_json(&self, url: &str) -> Result<Value, DeployError> {
        self.gets.lock().unwrap().push(url.to_string());
        self.metadata_response
            .lock()
            .unwrap()
            .clone()
            .ok_or(DeployError::HttpStatus { status: 404 })
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<DownloadedFile, DeployError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .archive
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DeployError::Transfer("connection reset".into()))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(DownloadedFile {
            size: bytes.len() as u64,
            sha256: String::new(),
        })
    }
}

pub(crate) fn check_body(uuid: &str, compatible: bool, available: bool) -> Value {
    json!({
        "data": {
            "compatible": compatible,
            "available": available,
            "snapshot": uuid,
            "url": format!("https://cdn.example.com/{}.zip", uuid),
        }
    })
}

pub(crate) fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub(crate) struct Harness {
    pub ctx: Arc<DeployContext>,
    pub settings: Arc<MemorySettings>,
    pub transport: Arc<FakeTransport>,
    pub temp: TempDir,
}

pub(crate) fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let config = DeployConfig {
        app_id: "app-1".to_string(),
        server_url: "https://deploy.example.com".to_string(),
        data_dir: Some(temp.path().to_path_buf()),
        ..DeployConfig::default()
    };
    let settings = Arc::new(MemorySettings::new());
    let transport = Arc::new(FakeTransport::default());
    let ctx = Arc::new(DeployContext::new(
        config,
        settings.clone(),
        transport.clone(),
    ));
    Harness {
        ctx,
        settings,
        transport,
        temp,
    }
}
