//! Property-based tests for snapdeploy-core.
//!
//! # Properties Tested
//!
//! - Retention: at most three snapshots survive, and they are the three
//!   most recently recorded
//! - Uniqueness: recording a snapshot twice keeps one record and one
//!   sequence number
//! - Ledger encoding: the persisted string decodes to the same records
//! - Ignore: an ignored snapshot is never offered, however often checked

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

use crate::checker::UpdateChecker;
use crate::ledger::{decode_versions, encode_versions, VersionLedger, VersionRecord};
use crate::settings::{MemorySettings, SettingsStore};
use crate::state::keys;
use crate::test_support::{check_body, harness};

// =============================================================================
// Generators
// =============================================================================

/// Snapshot identifiers as the channel hands them out.
fn arb_snapshot_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.-]{0,23}"
}

/// Distinct snapshot ids in install order.
fn arb_install_sequence() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(arb_snapshot_id(), 1..12).prop_map(|set| set.into_iter().collect::<Vec<_>>())
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn test_ledger() -> (VersionLedger, Arc<MemorySettings>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let settings = Arc::new(MemorySettings::new());
    let ledger = VersionLedger::new(settings.clone(), temp_dir.path().to_path_buf());
    (ledger, settings, temp_dir)
}

// =============================================================================
// Retention
//
// After any sequence of installs, the ledger holds min(n, 3) records and
// they carry the largest sequence numbers handed out.
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_retention_keeps_most_recent(ids in arb_install_sequence()) {
        let rt = runtime();
        let (ledger, _settings, temp_dir) = test_ledger();

        let records = rt.block_on(async {
            for id in &ids {
                std::fs::create_dir_all(temp_dir.path().join(id)).unwrap();
                ledger.add(id).await.unwrap();
            }
            ledger.records().await.unwrap()
        });

        let expected = ids.len().min(3);
        prop_assert_eq!(records.len(), expected);

        let kept: Vec<&String> = ids.iter().skip(ids.len() - expected).collect();
        for record in &records {
            prop_assert!(kept.contains(&&record.uuid));
        }

        // Folders follow the ledger.
        for (index, id) in ids.iter().enumerate() {
            let on_disk = temp_dir.path().join(id).exists();
            prop_assert_eq!(on_disk, index >= ids.len() - expected);
        }
    }

    #[test]
    fn prop_counter_counts_installs(ids in arb_install_sequence()) {
        let rt = runtime();
        let (ledger, _settings, _temp_dir) = test_ledger();

        let (count, max_sequence) = rt.block_on(async {
            for id in &ids {
                ledger.add(id).await.unwrap();
            }
            let records = ledger.records().await.unwrap();
            (
                ledger.version_count().await.unwrap(),
                records.iter().map(|r| r.sequence).max().unwrap(),
            )
        });

        prop_assert_eq!(count, ids.len() as u64);
        prop_assert_eq!(max_sequence, count);
    }
}

// =============================================================================
// Uniqueness
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_add_twice_is_noop(id in arb_snapshot_id()) {
        let rt = runtime();
        let (ledger, settings, _temp_dir) = test_ledger();

        let (first, second, records, count) = rt.block_on(async {
            let first = ledger.add(&id).await.unwrap();
            let second = ledger.add(&id).await.unwrap();
            let records = ledger.records().await.unwrap();
            let count = settings.get(keys::VERSION_COUNT, "").await.unwrap();
            (first, second, records, count)
        });

        prop_assert!(first);
        prop_assert!(!second);
        prop_assert_eq!(records, vec![VersionRecord::new(id.clone(), 1)]);
        prop_assert_eq!(count, "1");
    }

    #[test]
    fn prop_sequences_are_unique(ids in arb_install_sequence()) {
        let rt = runtime();
        let temp_dir = TempDir::new().unwrap();
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new());
        let ledger = VersionLedger::with_limit(settings, temp_dir.path().to_path_buf(), ids.len());

        let records = rt.block_on(async {
            for id in &ids {
                ledger.add(id).await.unwrap();
            }
            ledger.records().await.unwrap()
        });

        let sequences: HashSet<u64> = records.iter().map(|r| r.sequence).collect();
        prop_assert_eq!(sequences.len(), records.len());
    }
}

// =============================================================================
// Ledger encoding
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_encoding_preserves_records(
        entries in prop::collection::vec((arb_snapshot_id(), 1u64..1_000_000), 0..8)
    ) {
        let records: Vec<VersionRecord> = entries
            .into_iter()
            .map(|(uuid, sequence)| VersionRecord::new(uuid, sequence))
            .collect();

        let decoded = decode_versions(&encode_versions(&records));
        prop_assert_eq!(decoded, records);
    }
}

// =============================================================================
// Ignore
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ignored_snapshot_never_offered(
        id in arb_snapshot_id(),
        checks in 1usize..6,
        compatible in any::<bool>(),
    ) {
        let rt = runtime();
        let h = harness();
        let checker = UpdateChecker::new(h.ctx.clone());

        let offered = rt.block_on(async {
            checker.ignore(&id).await.unwrap();
            let body = check_body(&id, compatible, true);
            let mut offered = false;
            for _ in 0..checks {
                offered |= checker.evaluate(Some(&body)).await.unwrap();
            }
            offered
        });

        prop_assert!(!offered);
    }
}
