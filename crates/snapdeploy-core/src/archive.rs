//! Snapshot archive decoding and unpacking.
//!
//! Decoding turns the staged archive into a flat list of entries; unpacking
//! recreates each entry's directory path under the snapshot folder, one
//! segment at a time, and writes the bytes.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::DeployError;

/// One decoded archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `/`-separated path relative to the archive root
    pub path: String,
    /// Whether the entry only declares a directory
    pub is_dir: bool,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            data: data.into(),
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            data: Vec::new(),
        }
    }
}

/// Archive container format.
pub trait ArchiveDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, DeployError>;
}

/// Upper bound on the buffer reserved up front for one entry.
const MAX_ENTRY_PREALLOC: u64 = 1 << 20;

/// Initial buffer size for an entry whose header declares `declared` bytes.
///
/// The header is untrusted; larger entries grow the buffer while reading.
fn prealloc_len(declared: u64) -> usize {
    declared.min(MAX_ENTRY_PREALLOC) as usize
}

/// Zip archives, as published by the deploy server.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipDecoder;

impl ArchiveDecoder for ZipDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, DeployError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let path = file.name().to_string();

            if file.is_dir() {
                entries.push(ArchiveEntry::dir(path));
                continue;
            }

            let mut data = Vec::with_capacity(prealloc_len(file.size()));
            file.read_to_end(&mut data)
                .map_err(|e| DeployError::Extraction(format!("{}: {}", path, e)))?;
            entries.push(ArchiveEntry::file(path, data));
        }

        debug!("Decoded {} archive entries", entries.len());
        Ok(entries)
    }
}

/// Split an entry path into safe relative segments.
///
/// Empty and `.` segments are dropped. Absolute paths, drive prefixes and
/// `..` segments would land outside the snapshot folder and are rejected.
/// A `:` anywhere else is an ordinary file name character.
pub fn entry_segments(path: &str) -> Result<Vec<&str>, DeployError> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(DeployError::Extraction(format!(
            "entry path is not relative: {}",
            path
        )));
    }

    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(DeployError::Extraction(format!(
                    "entry path escapes snapshot folder: {}",
                    path
                )))
            }
            s if has_drive_prefix(s) => {
                return Err(DeployError::Extraction(format!(
                    "entry path is not relative: {}",
                    path
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// `C:` style drive prefix.
fn has_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Create (or reuse) each directory level of `segments` under `root`.
pub async fn create_folders(root: &Path, segments: &[&str]) -> Result<PathBuf, DeployError> {
    let mut folder = root.to_path_buf();
    for segment in segments {
        folder.push(segment);
        match tokio::fs::create_dir(&folder).await {
            Ok(()) => trace!("Created folder {:?}", folder),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && folder.is_dir() => {}
            Err(e) => {
                return Err(DeployError::Extraction(format!(
                    "cannot create folder {:?}: {}",
                    folder, e
                )))
            }
        }
    }
    Ok(folder)
}

/// Write every entry under `root`. Stops at the first failure.
///
/// Returns the number of files written.
pub async fn unpack_entries(root: &Path, entries: &[ArchiveEntry]) -> Result<usize, DeployError> {
    let mut written = 0;

    for entry in entries {
        let segments = entry_segments(&entry.path)?;
        let Some((name, parents)) = segments.split_last() else {
            continue;
        };

        if entry.is_dir {
            create_folders(root, &segments).await?;
            continue;
        }

        let folder = create_folders(root, parents).await?;
        let target = folder.join(name);
        tokio::fs::write(&target, &entry.data)
            .await
            .map_err(|e| DeployError::Extraction(format!("cannot write {:?}: {}", target, e)))?;
        written += 1;
    }

    Ok(written)
}
