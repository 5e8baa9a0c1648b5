use std::fmt;
use std::path::PathBuf;

use chainloader::host::HostStorage;
use chainloader::payloads::discover;
use serde::Serialize;

use super::require_sd_root;
use crate::config::ToolConfig;
use crate::error::ToolError;

/// One discovered payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PayloadEntry {
    pub name: String,
    pub path: String,
}

/// Result of `scan`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub sd_root: PathBuf,
    pub payload_dir: String,
    pub payloads: Vec<PayloadEntry>,
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} payload(s) under {}/{}",
            self.payloads.len(),
            self.sd_root.display(),
            self.payload_dir
        )?;
        let width = self.payloads.iter().map(|p| p.name.len()).max().unwrap_or(0);
        for payload in &self.payloads {
            writeln!(f, "  {:width$}  {}", payload.name, payload.path, width = width)?;
        }
        Ok(())
    }
}

/// List the payload catalog.
///
/// An empty catalog is an error: the boot menu would have nothing to show.
pub fn run(config: &ToolConfig) -> Result<ScanSummary, ToolError> {
    require_sd_root(&config.sd_root)?;

    let mut storage = HostStorage::new(&config.sd_root);
    let payloads: Vec<PayloadEntry> = discover(&mut storage, &config.payload_dir)
        .into_iter()
        .map(|(name, path)| PayloadEntry { name, path })
        .collect();
    if payloads.is_empty() {
        return Err(ToolError::NoPayloads {
            dir: config.payload_dir.clone(),
        });
    }

    Ok(ScanSummary {
        sd_root: config.sd_root.clone(),
        payload_dir: config.payload_dir.clone(),
        payloads,
    })
}
