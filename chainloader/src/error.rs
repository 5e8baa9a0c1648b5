//! Loader error types
//!
//! Every failure on the way from a path to an entry address falls into one
//! of four families. They collapse into the `0` entry sentinel at the
//! [`LoaderEntry`](crate::entry::LoaderEntry) boundary; the typed form is
//! kept for logging and tooling.

use core::fmt;

/// Loader error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// File missing, unreadable or truncated
    Storage(StorageError),
    /// Not a loadable image for this platform
    Format(FormatError),
    /// A section falls outside the load window
    Range(RangeError),
    /// The file buffer could not be allocated
    Allocation {
        /// Requested buffer size in bytes
        size: usize,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Storage(e) => write!(f, "storage error: {}", e),
            LoadError::Format(e) => write!(f, "format error: {}", e),
            LoadError::Range(e) => write!(f, "range error: {}", e),
            LoadError::Allocation { size } => {
                write!(f, "allocation error: could not allocate {} bytes", size)
            }
        }
    }
}

impl From<StorageError> for LoadError {
    fn from(e: StorageError) -> Self {
        LoadError::Storage(e)
    }
}

impl From<FormatError> for LoadError {
    fn from(e: FormatError) -> Self {
        LoadError::Format(e)
    }
}

impl From<RangeError> for LoadError {
    fn from(e: RangeError) -> Self {
        LoadError::Range(e)
    }
}

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// No file at the given path
    NotFound,
    /// The file exists but could not be opened, sized or read
    Unreadable,
    /// Fewer bytes were read than the file reported
    Truncated {
        /// Size reported by seek-to-end
        expected: usize,
        /// Bytes actually read
        read: usize,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "file not found"),
            StorageError::Unreadable => write!(f, "file unreadable"),
            StorageError::Truncated { expected, read } => {
                write!(f, "truncated read ({} of {} bytes)", read, expected)
            }
        }
    }
}

/// Image format error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Image too small to contain an ELF header
    TooSmall,
    /// Invalid ELF magic number
    InvalidMagic,
    /// Not a 32-bit image
    InvalidClass,
    /// Not big-endian
    InvalidEncoding,
    /// Not a static executable
    InvalidType,
    /// Not a PowerPC image
    InvalidMachine,
    /// Section header table extends beyond the image
    SectionTableOutOfBounds,
    /// Section name string table missing or out of bounds
    InvalidStringTable,
    /// Section contents extend beyond the image
    SectionOutOfBounds,
    /// A mandatory section is absent
    MissingSection {
        /// Name of the missing section
        name: &'static str,
    },
    /// The declared entry point is not inside `.text`
    EntryOutsideText {
        /// Declared entry point
        entry: u32,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::TooSmall => write!(f, "image too small"),
            FormatError::InvalidMagic => write!(f, "invalid ELF magic"),
            FormatError::InvalidClass => write!(f, "not an ELF32 image"),
            FormatError::InvalidEncoding => write!(f, "not a big-endian image"),
            FormatError::InvalidType => write!(f, "not a static executable"),
            FormatError::InvalidMachine => write!(f, "not a PowerPC image"),
            FormatError::SectionTableOutOfBounds => write!(f, "section table out of bounds"),
            FormatError::InvalidStringTable => write!(f, "invalid section name table"),
            FormatError::SectionOutOfBounds => write!(f, "section data out of bounds"),
            FormatError::MissingSection { name } => write!(f, "missing section {}", name),
            FormatError::EntryOutsideText { entry } => {
                write!(f, "entry point {:#010x} outside .text", entry)
            }
        }
    }
}

/// A section that would land outside the load window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeError {
    /// Offending section
    pub section: &'static str,
    /// Target address of the section
    pub address: u32,
    /// Size of the section
    pub size: u32,
    /// Window start
    pub window_start: u32,
    /// Window end (exclusive)
    pub window_end: u32,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {:#010x}..{:#010x} outside {:#010x}..{:#010x}",
            self.section,
            self.address,
            self.address as u64 + self.size as u64,
            self.window_start,
            self.window_end
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LoadError {}

#[cfg(feature = "std")]
impl std::error::Error for StorageError {}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}

#[cfg(feature = "std")]
impl std::error::Error for RangeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_range_error_display() {
        let e = RangeError {
            section: ".text",
            address: 0x0070_0000,
            size: 0x100,
            window_start: 0x0080_0000,
            window_end: 0x00FD_0000,
        };
        assert_eq!(
            e.to_string(),
            ".text at 0x00700000..0x00700100 outside 0x00800000..0x00fd0000"
        );
    }

    #[test]
    fn test_conversions_keep_family() {
        assert!(matches!(
            LoadError::from(StorageError::NotFound),
            LoadError::Storage(StorageError::NotFound)
        ));
        assert!(matches!(
            LoadError::from(FormatError::InvalidMagic),
            LoadError::Format(FormatError::InvalidMagic)
        ));
    }
}
