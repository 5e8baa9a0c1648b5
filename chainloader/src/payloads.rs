//! Payload discovery.
//!
//! Each payload lives in its own directory under [`PAYLOAD_DIR`]; the first
//! file in that directory whose name ends in [`PAYLOAD_SUFFIX`] is the
//! payload, keyed by the directory name.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{PAYLOAD_DIR, PAYLOAD_SUFFIX};
use crate::error::StorageError;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Last path component
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

impl DirEntry {
    /// A regular file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    /// A directory entry.
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Directory listing on the payload medium.
pub trait DirectoryScan {
    /// Entries directly under `path`, in medium order.
    fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, StorageError>;
}

/// Payload name to payload path, ordered by name.
pub type PayloadCatalog = BTreeMap<String, String>;

/// Scan [`PAYLOAD_DIR`] for payloads.
pub fn discover_default<D: DirectoryScan>(scan: &mut D) -> PayloadCatalog {
    discover(scan, PAYLOAD_DIR)
}

/// Scan `base` for payload directories.
///
/// Directories without a payload file are skipped. An unreadable `base`
/// yields an empty catalog.
pub fn discover<D: DirectoryScan>(scan: &mut D, base: &str) -> PayloadCatalog {
    let mut catalog = PayloadCatalog::new();
    let base = base.trim_end_matches('/');

    let entries = match scan.list(base) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("[Loader] Cannot list {}: {}", base, e);
            return catalog;
        }
    };

    for dir in entries.iter().filter(|e| e.is_dir) {
        let dir_path = format!("{}/{}", base, dir.name);
        let files = match scan.list(&dir_path) {
            Ok(files) => files,
            Err(e) => {
                log::debug!("[Loader] Skipping {}: {}", dir_path, e);
                continue;
            }
        };

        let payload = files
            .iter()
            .find(|f| !f.is_dir && f.name.ends_with(PAYLOAD_SUFFIX));
        if let Some(file) = payload {
            catalog.insert(dir.name.clone(), format!("{}/{}", dir_path, file.name));
        }
    }

    log::debug!("[Loader] Found {} payloads under {}", catalog.len(), base);
    catalog
}
