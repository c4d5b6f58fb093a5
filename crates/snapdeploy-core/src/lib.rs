//! # snapdeploy-core
//!
//! Over-the-air content updates for embedded web apps.
//!
//! This crate handles:
//! - Channel checks that decide whether a new snapshot should be offered
//! - Snapshot archive download into a fixed staging file
//! - Extraction into a per-snapshot folder
//! - A bounded ledger of retained snapshots with oldest-first eviction
//! - A persistent ignore marker for unwanted snapshots
//!
//! ## State
//!
//! All persistent state lives in a [`SettingsStore`] under a handful of
//! well-known keys (see [`state::keys`]). Snapshot folders live directly
//! under the configured data directory and are named by snapshot uuid.
//!
//! Lifecycle calls are expected to be serialised by the caller; the ledger
//! is a plain read-modify-write over the settings store.

pub mod archive;
pub mod checker;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod installer;
pub mod ledger;
#[cfg(test)]
mod proptests;
pub mod settings;
pub mod state;
#[cfg(test)]
mod test_support;
pub mod transport;

// Re-export main types for convenience
pub use archive::{ArchiveDecoder, ArchiveEntry, ZipDecoder};
pub use checker::{CheckRequest, DeviceDetails, UpdateChecker};
pub use command::{Action, CommandFailure, CommandProxy};
pub use config::{current_platform, DeployConfig, LoggingConfig, NetworkConfig};
pub use context::{DeployContext, Session, UpdateCandidate};
pub use error::DeployError;
pub use facade::{DeployFacade, DeployInfo};
pub use installer::{ArchiveInstaller, DownloadOutcome};
pub use ledger::{VersionLedger, VersionRecord, RETENTION_LIMIT};
pub use settings::{FileSettings, MemorySettings, SettingsStore};
pub use state::{DeployState, VersionLabel, NOTHING_TO_IGNORE, NO_DEPLOY_AVAILABLE};
pub use transport::{DeployTransport, DownloadedFile, HttpTransport};
