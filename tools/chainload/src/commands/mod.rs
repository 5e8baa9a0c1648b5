//! Subcommand handlers.
//!
//! Each handler returns a serializable summary that also implements
//! `Display` for human output.

pub mod inspect;
pub mod run;
pub mod scan;

use std::path::Path;

use crate::error::ToolError;

/// Fail unless the SD root directory exists.
pub(crate) fn require_sd_root(root: &Path) -> Result<(), ToolError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(ToolError::SdRootNotFound {
            path: root.to_path_buf(),
        })
    }
}
