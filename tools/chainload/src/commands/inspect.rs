use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chainloader::elf::{AddressWindow, ElfImage, SectionKind};
use chainloader::installer::{ImageInstaller, CANONICAL_SECTIONS};
use serde::Serialize;

use crate::error::ToolError;

/// One canonical section as seen in the image.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SectionReport {
    pub name: &'static str,
    pub required: bool,
    pub present: bool,
    /// `"bits"` or `"nobits"`, absent when the section is missing.
    pub kind: Option<&'static str>,
    pub address: u32,
    pub size: u32,
    pub in_window: bool,
}

/// Result of `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub entry: u32,
    pub section_count: usize,
    pub window_start: u32,
    pub window_end: u32,
    pub sections: Vec<SectionReport>,
    pub loadable: bool,
    /// Why the installer would refuse the image.
    pub rejection: Option<String>,
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path.display())?;
        writeln!(f, "  entry    {:#010x}", self.entry)?;
        writeln!(
            f,
            "  window   {:#010x}..{:#010x}",
            self.window_start, self.window_end
        )?;
        for section in &self.sections {
            if !section.present {
                writeln!(f, "  {:<8} absent", section.name)?;
                continue;
            }
            let verdict = if section.size == 0 {
                "empty"
            } else if section.in_window {
                "ok"
            } else {
                "OUTSIDE WINDOW"
            };
            writeln!(
                f,
                "  {:<8} {:#010x}..{:#010x} {:>6} {}",
                section.name,
                section.address,
                section.address as u64 + section.size as u64,
                section.kind.unwrap_or("-"),
                verdict
            )?;
        }
        match &self.rejection {
            None => writeln!(f, "  loadable"),
            Some(reason) => writeln!(f, "  rejected: {reason}"),
        }
    }
}

/// Build the report for an in-memory image.
pub fn inspect_bytes(path: &Path, data: &[u8]) -> Result<InspectReport, ToolError> {
    let image = ElfImage::parse(data).map_err(|source| ToolError::InvalidImage {
        path: path.to_path_buf(),
        source,
    })?;
    let window = AddressWindow::LOAD;

    let sections = CANONICAL_SECTIONS
        .iter()
        .map(|&(name, required)| match image.find_section(name) {
            Some(section) => SectionReport {
                name,
                required,
                present: true,
                kind: Some(match section.kind {
                    SectionKind::Bits => "bits",
                    SectionKind::NoBits => "nobits",
                }),
                address: section.address,
                size: section.size,
                in_window: window.contains(section.address, section.size),
            },
            None => SectionReport {
                name,
                required,
                present: false,
                kind: None,
                address: 0,
                size: 0,
                in_window: false,
            },
        })
        .collect();

    let rejection = ImageInstaller::new(window)
        .plan(&image)
        .err()
        .map(|e| e.to_string());

    Ok(InspectReport {
        path: path.to_path_buf(),
        entry: image.entry(),
        section_count: image.section_count(),
        window_start: window.start(),
        window_end: window.end(),
        sections,
        loadable: rejection.is_none(),
        rejection,
    })
}

/// Read and inspect the image at `path`.
pub fn run(path: &Path) -> Result<InspectReport, ToolError> {
    let data = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ToolError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ToolError::Io(e),
    })?;
    inspect_bytes(path, &data)
}
