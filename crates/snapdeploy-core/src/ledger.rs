//! Installed snapshot bookkeeping.
//!
//! The ledger tracks which snapshot folders exist under the data directory,
//! each tagged with the install sequence number it received. Once more than
//! [`RETENTION_LIMIT`] snapshots are installed, the ones with the smallest
//! sequence numbers are deleted from disk.
//!
//! # Layout
//!
//! ```text
//! data_dir/
//! ├── www.zip          # staging archive, present between download and extract
//! ├── 6f1c.../         # one folder per retained snapshot, named by uuid
//! └── 9a2e.../
//! ```
//!
//! The record list is persisted under `my_versions` as `uuid|sequence`
//! pairs joined by `%`; the counter lives under `version_count`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::settings::SettingsStore;
use crate::state::{keys, DeployState};

/// Maximum number of snapshots kept on disk.
pub const RETENTION_LIMIT: usize = 3;

/// Separator between records in the persisted ledger.
pub const VERSION_SEPARATOR: char = '%';

/// Separator between uuid and sequence inside one record.
pub const FIELD_SEPARATOR: char = '|';

/// One installed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub uuid: String,
    pub sequence: u64,
}

impl VersionRecord {
    pub fn new(uuid: impl Into<String>, sequence: u64) -> Self {
        Self {
            uuid: uuid.into(),
            sequence,
        }
    }
}

/// Encode records as `uuid|sequence` joined by `%`.
pub fn encode_versions(records: &[VersionRecord]) -> String {
    records
        .iter()
        .map(|r| format!("{}{}{}", r.uuid, FIELD_SEPARATOR, r.sequence))
        .collect::<Vec<_>>()
        .join(&VERSION_SEPARATOR.to_string())
}

/// Decode the persisted ledger string.
///
/// Segments without a separator or a parseable sequence are dropped
/// with a warning.
pub fn decode_versions(encoded: &str) -> Vec<VersionRecord> {
    encoded
        .split(VERSION_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let parsed = segment
                .rsplit_once(FIELD_SEPARATOR)
                .and_then(|(uuid, sequence)| Some((uuid, sequence.parse::<u64>().ok()?)));
            match parsed {
                Some((uuid, sequence)) => Some(VersionRecord::new(uuid, sequence)),
                None => {
                    warn!("Dropping malformed ledger entry: {:?}", segment);
                    None
                }
            }
        })
        .collect()
}

/// Reject identifiers that cannot safely name a folder under the data dir.
pub(crate) fn check_snapshot_id(uuid: &str) -> Result<(), DeployError> {
    let bad = uuid.is_empty()
        || uuid == "."
        || uuid == ".."
        || uuid.contains(['/', '\\', VERSION_SEPARATOR, FIELD_SEPARATOR]);
    if bad {
        return Err(DeployError::InvalidArgument(format!(
            "invalid snapshot id {:?}",
            uuid
        )));
    }
    Ok(())
}

/// Bounded ledger of installed snapshots.
pub struct VersionLedger {
    settings: Arc<dyn SettingsStore>,
    data_dir: PathBuf,
    retention_limit: usize,
}

impl VersionLedger {
    pub fn new(settings: Arc<dyn SettingsStore>, data_dir: PathBuf) -> Self {
        Self::with_limit(settings, data_dir, RETENTION_LIMIT)
    }

    pub fn with_limit(
        settings: Arc<dyn SettingsStore>,
        data_dir: PathBuf,
        retention_limit: usize,
    ) -> Self {
        Self {
            settings,
            data_dir,
            retention_limit,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Folder a snapshot is extracted into.
    pub fn snapshot_dir(&self, uuid: &str) -> PathBuf {
        self.data_dir.join(uuid)
    }

    /// All retained records, in stored order.
    pub async fn records(&self) -> Result<Vec<VersionRecord>, DeployError> {
        let encoded = self.settings.get(keys::MY_VERSIONS, "").await?;
        Ok(decode_versions(&encoded))
    }

    async fn save(&self, records: &[VersionRecord]) -> Result<(), DeployError> {
        self.settings
            .set(keys::MY_VERSIONS, &encode_versions(records))
            .await
    }

    /// Retained snapshot uuids.
    pub async fn list(&self) -> Result<Vec<String>, DeployError> {
        Ok(self.records().await?.into_iter().map(|r| r.uuid).collect())
    }

    pub async fn has(&self, uuid: &str) -> Result<bool, DeployError> {
        Ok(self.records().await?.iter().any(|r| r.uuid == uuid))
    }

    /// Current value of the install sequence counter.
    pub async fn version_count(&self) -> Result<u64, DeployError> {
        let raw = self.settings.get(keys::VERSION_COUNT, "0").await?;
        raw.trim().parse().map_err(|_| {
            DeployError::Settings(format!("{} is not a number: {:?}", keys::VERSION_COUNT, raw))
        })
    }

    /// Make sure the sequence counter is persisted.
    pub async fn init_counter(&self) -> Result<(), DeployError> {
        let count = self.version_count().await?;
        self.settings
            .set(keys::VERSION_COUNT, &count.to_string())
            .await
    }

    /// Register a freshly extracted snapshot.
    ///
    /// Returns `false` without touching the counter when `uuid` is already
    /// recorded. Otherwise appends a record with the next sequence number
    /// and prunes down to the retention limit.
    pub async fn add(&self, uuid: &str) -> Result<bool, DeployError> {
        check_snapshot_id(uuid)?;

        let mut records = self.records().await?;
        if records.iter().any(|r| r.uuid == uuid) {
            debug!("Snapshot {} already recorded", uuid);
            return Ok(false);
        }

        let sequence = self.version_count().await? + 1;
        self.settings
            .set(keys::VERSION_COUNT, &sequence.to_string())
            .await?;

        records.push(VersionRecord::new(uuid, sequence));
        self.save(&records).await?;
        info!("Recorded snapshot {} with sequence {}", uuid, sequence);

        self.prune().await?;
        Ok(true)
    }

    /// Delete a snapshot folder and its record.
    ///
    /// A missing folder counts as already removed. Pointers naming the
    /// snapshot are cleared. Returns whether a folder was actually deleted.
    pub async fn remove(&self, uuid: &str) -> Result<bool, DeployError> {
        check_snapshot_id(uuid)?;

        let folder = self.snapshot_dir(uuid);
        let deleted = match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => {
                info!("Deleted snapshot folder {:?}", folder);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Snapshot folder {:?} already gone", folder);
                false
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = self.records().await?;
        let before = records.len();
        records.retain(|r| r.uuid != uuid);
        if records.len() != before {
            self.save(&records).await?;
        }

        let mut state = DeployState::load(self.settings.as_ref()).await?;
        if state.forget(uuid) {
            info!("Removed snapshot {} was current, clearing pointers", uuid);
            state.save(self.settings.as_ref()).await?;
        }

        Ok(deleted)
    }

    /// Evict the oldest records beyond the retention limit.
    ///
    /// Eviction is best-effort: a record whose removal fails is logged and
    /// skipped. Returns the uuids that were evicted.
    pub async fn prune(&self) -> Result<Vec<String>, DeployError> {
        let mut records = self.records().await?;
        if records.len() <= self.retention_limit {
            return Ok(Vec::new());
        }

        let excess = records.len() - self.retention_limit;
        records.sort_by_key(|r| r.sequence);

        let mut evicted = Vec::with_capacity(excess);
        for record in records.iter().take(excess) {
            info!(
                "Evicting snapshot {} (sequence {})",
                record.uuid, record.sequence
            );
            match self.remove(&record.uuid).await {
                Ok(_) => evicted.push(record.uuid.clone()),
                Err(e) => warn!("Failed to evict snapshot {}: {}", record.uuid, e),
            }
        }

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use tempfile::TempDir;

    fn create_test_ledger() -> (VersionLedger, Arc<MemorySettings>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::new());
        let ledger = VersionLedger::new(settings.clone(), temp_dir.path().to_path_buf());
        (ledger, settings, temp_dir)
    }

    async fn add_with_folder(ledger: &VersionLedger, uuid: &str) {
        std::fs::create_dir_all(ledger.snapshot_dir(uuid)).unwrap();
        ledger.add(uuid).await.unwrap();
    }

    #[test]
    fn test_encode_decode() {
        let records = vec![VersionRecord::new("a", 1), VersionRecord::new("b", 7)];
        let encoded = encode_versions(&records);
        assert_eq!(encoded, "a|1%b|7");
        assert_eq!(decode_versions(&encoded), records);
    }

    #[test]
    fn test_decode_empty_and_malformed() {
        assert!(decode_versions("").is_empty());
        assert_eq!(
            decode_versions("a|1%%junk%b|x%c|3"),
            vec![VersionRecord::new("a", 1), VersionRecord::new("c", 3)]
        );
    }

    #[test]
    fn test_check_snapshot_id() {
        assert!(check_snapshot_id("d9b6c1e4-1a").is_ok());
        assert!(check_snapshot_id("").is_err());
        assert!(check_snapshot_id("..").is_err());
        assert!(check_snapshot_id("a/b").is_err());
        assert!(check_snapshot_id("a|1").is_err());
        assert!(check_snapshot_id("a%b").is_err());
    }

    #[tokio::test]
    async fn test_add_assigns_increasing_sequence() {
        let (ledger, _settings, _temp) = create_test_ledger();

        assert!(ledger.add("v1").await.unwrap());
        assert!(ledger.add("v2").await.unwrap());

        let records = ledger.records().await.unwrap();
        assert_eq!(
            records,
            vec![VersionRecord::new("v1", 1), VersionRecord::new("v2", 2)]
        );
        assert_eq!(ledger.version_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_twice_is_noop() {
        let (ledger, _settings, _temp) = create_test_ledger();

        assert!(ledger.add("v1").await.unwrap());
        assert!(!ledger.add("v1").await.unwrap());

        assert_eq!(ledger.list().await.unwrap(), vec!["v1"]);
        assert_eq!(ledger.version_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oldest_evicted_past_limit() {
        let (ledger, _settings, _temp) = create_test_ledger();

        for uuid in ["v1", "v2", "v3", "v4"] {
            add_with_folder(&ledger, uuid).await;
        }

        let mut listed = ledger.list().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["v2", "v3", "v4"]);
        assert!(!ledger.snapshot_dir("v1").exists());
        assert!(ledger.snapshot_dir("v4").exists());
    }

    #[tokio::test]
    async fn test_eviction_ranks_by_sequence_not_position() {
        let (ledger, settings, _temp) = create_test_ledger();

        // Stored order disagrees with sequence order.
        settings
            .set(keys::MY_VERSIONS, "c|9%a|2%b|5%d|7")
            .await
            .unwrap();

        let evicted = ledger.prune().await.unwrap();
        assert_eq!(evicted, vec!["a"]);

        let mut listed = ledger.list().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_remove_clears_current_pointer() {
        let (ledger, settings, _temp) = create_test_ledger();
        add_with_folder(&ledger, "v2").await;
        settings.set(keys::CURRENT_UUID, "v2").await.unwrap();
        settings.set(keys::LOADED_UUID, "v2").await.unwrap();

        assert!(ledger.remove("v2").await.unwrap());

        assert_eq!(settings.get(keys::CURRENT_UUID, "x").await.unwrap(), "");
        assert_eq!(settings.get(keys::LOADED_UUID, "x").await.unwrap(), "");
        assert!(!ledger.has("v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_folder_is_not_error() {
        let (ledger, _settings, _temp) = create_test_ledger();
        add_with_folder(&ledger, "v1").await;

        assert!(!ledger.remove("ghost").await.unwrap());
        assert_eq!(ledger.list().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_remove_record_without_folder() {
        let (ledger, _settings, _temp) = create_test_ledger();
        ledger.add("orphan").await.unwrap();

        assert!(!ledger.remove("orphan").await.unwrap());
        assert!(ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_noop_under_limit() {
        let (ledger, _settings, _temp) = create_test_ledger();
        ledger.add("v1").await.unwrap();
        assert!(ledger.prune().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_counter_is_settings_error() {
        let (ledger, settings, _temp) = create_test_ledger();
        settings.set(keys::VERSION_COUNT, "NaN").await.unwrap();
        assert!(matches!(
            ledger.add("v1").await,
            Err(DeployError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn test_init_counter_persists_default() {
        let (ledger, settings, _temp) = create_test_ledger();
        ledger.init_counter().await.unwrap();
        assert_eq!(settings.get(keys::VERSION_COUNT, "").await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_prune_skips_failed_removal() {
        let (ledger, settings, _temp) = create_test_ledger();
        settings
            .set(keys::MY_VERSIONS, "c|9%a|2%b|5%d|7%e|8")
            .await
            .unwrap();
        std::fs::create_dir_all(ledger.snapshot_dir("b")).unwrap();
        // A plain file where a's folder should be cannot be removed as a tree.
        std::fs::write(ledger.snapshot_dir("a"), b"not a folder").unwrap();

        let evicted = ledger.prune().await.unwrap();
        assert_eq!(evicted, vec!["b"]);
        assert!(!ledger.snapshot_dir("b").exists());

        let mut listed = ledger.list().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a", "c", "d", "e"]);
    }

    #[test]
    fn test_decode_drops_segment_without_sequence() {
        assert_eq!(
            decode_versions("v1%v2|4%v3|"),
            vec![VersionRecord::new("v2", 4)]
        );
    }
}
