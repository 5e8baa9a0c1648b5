use std::path::PathBuf;
use std::process::ExitCode;

use chainloader::error::{FormatError, LoadError};

/// All errors produced by chainload.
///
/// Variants are split into two categories:
/// - **Infrastructure errors** (exit code 2): bad config, I/O failures
/// - **Operational errors** (exit code 1): images or payloads the user can fix
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    // ── Infrastructure errors (exit code 2) ──────────────────────────

    #[error("Config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("SD root not found: {path}")]
    SdRootNotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Operational errors (exit code 1) ─────────────────────────────

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid image {path}: {source}")]
    InvalidImage {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("No payloads found under {dir}")]
    NoPayloads { dir: String },
}

impl ToolError {
    /// Map each error variant to its process exit code.
    ///
    /// - `2` — infrastructure error (bad config, I/O)
    /// - `1` — operational failure (rejected image, missing payload)
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_code_num())
    }

    /// Numeric form of [`ToolError::exit_code`].
    pub fn exit_code_num(&self) -> u8 {
        match self {
            // Infrastructure errors → 2
            Self::ConfigNotFound { .. }
            | Self::ConfigParse(_)
            | Self::SdRootNotFound { .. }
            | Self::Io(_)
            | Self::Json(_) => 2,

            // Operational errors → 1
            Self::FileNotFound { .. }
            | Self::InvalidImage { .. }
            | Self::Load(_)
            | Self::NoPayloads { .. } => 1,
        }
    }
}
