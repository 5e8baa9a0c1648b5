//! Host filesystem as the payload medium.
//!
//! Paths are resolved relative to an SD card root directory.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use alloc::vec::Vec;

use crate::error::StorageError;
use crate::payloads::{DirEntry, DirectoryScan};
use crate::storage::{Storage, StorageFile};

/// A directory standing in for the SD card root.
#[derive(Debug, Clone)]
pub struct HostStorage {
    root: PathBuf,
}

impl HostStorage {
    /// Storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a medium path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn storage_error(e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        _ => StorageError::Unreadable,
    }
}

/// Open host file.
pub struct HostFile(File);

impl Storage for HostStorage {
    type File = HostFile;

    fn open(&mut self, path: &str) -> Result<HostFile, StorageError> {
        File::open(self.resolve(path))
            .map(HostFile)
            .map_err(storage_error)
    }
}

impl StorageFile for HostFile {
    fn seek_end(&mut self) -> Result<usize, StorageError> {
        let end = self.0.seek(SeekFrom::End(0)).map_err(storage_error)?;
        usize::try_from(end).map_err(|_| StorageError::Unreadable)
    }

    fn rewind(&mut self) -> Result<(), StorageError> {
        self.0.seek(SeekFrom::Start(0)).map_err(storage_error)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.0.read(buf).map_err(storage_error)
    }
}

impl DirectoryScan for HostStorage {
    fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)).map_err(storage_error)? {
            let entry = entry.map_err(storage_error)?;
            let is_dir = entry.file_type().map_err(storage_error)?.is_dir();
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        // read_dir order is unspecified.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
