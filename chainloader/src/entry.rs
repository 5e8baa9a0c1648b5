//! Path to entry address.
//!
//! Reads a payload, validates it, places it and hands back the declared
//! entry point, which is only accepted when it lies inside the placed
//! `.text`. All failures collapse into the `0` sentinel; the typed error
//! is logged and available through [`LoaderEntry::try_load`].

use core::fmt;

use crate::elf::{AddressWindow, ElfImage};
use crate::error::LoadError;
use crate::installer::{ImageInstaller, InstallReport};
use crate::platform::MemoryBus;
use crate::storage::{read_file, Storage};

/// Entry point of a placed payload. Zero means "do not execute".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryAddress(u32);

impl EntryAddress {
    /// Sentinel for "nothing was loaded".
    pub const NONE: EntryAddress = EntryAddress(0);

    /// Wrap a raw address.
    pub const fn new(address: u32) -> Self {
        Self(address)
    }

    /// Raw address.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether control may be transferred here.
    pub const fn is_executable(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A successfully placed payload.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Declared entry point
    pub entry: EntryAddress,
    /// Size of the file that was read
    pub file_size: usize,
    /// Sections placed and skipped
    pub report: InstallReport,
}

/// Loads payloads from storage into memory.
pub struct LoaderEntry<'a, S: Storage, M: MemoryBus> {
    storage: &'a mut S,
    memory: &'a mut M,
    installer: ImageInstaller,
}

impl<'a, S: Storage, M: MemoryBus> LoaderEntry<'a, S, M> {
    /// Loader over `storage` placing into `memory` within the load window.
    pub fn new(storage: &'a mut S, memory: &'a mut M) -> Self {
        Self::with_window(storage, memory, AddressWindow::LOAD)
    }

    /// Loader with a custom window.
    pub fn with_window(storage: &'a mut S, memory: &'a mut M, window: AddressWindow) -> Self {
        Self {
            storage,
            memory,
            installer: ImageInstaller::new(window),
        }
    }

    /// Read, validate and place the payload at `path`.
    ///
    /// The file buffer is released before returning on every path.
    pub fn try_load(&mut self, path: &str) -> Result<LoadedImage, LoadError> {
        let buffer = read_file(self.storage, path)?;
        let image = ElfImage::parse(buffer.as_slice())?;
        let report = self.installer.install(&image, self.memory)?;

        Ok(LoadedImage {
            entry: EntryAddress::new(image.entry()),
            file_size: buffer.len(),
            report,
        })
    }

    /// Load `path` and return its entry point, or [`EntryAddress::NONE`].
    pub fn load_executable(&mut self, path: &str) -> EntryAddress {
        match self.try_load(path) {
            Ok(loaded) => {
                log::info!(
                    "[Loader] Loaded {} ({} bytes, {} sections), entry {}",
                    path,
                    loaded.file_size,
                    loaded.report.placed.len(),
                    loaded.entry
                );
                loaded.entry
            }
            Err(e) => {
                log::error!("[Loader] Failed to load {}: {}", path, e);
                EntryAddress::NONE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FormatError, RangeError, StorageError};
    use crate::sim::{ElfBuilder, MemStorage, SimMemory};
    use alloc::vec::Vec;

    const PATH: &str = "wiiu/payloads/default/payload.elf";

    fn text() -> Vec<u8> {
        (0..0x100u32).map(|i| i as u8).collect()
    }

    fn load(image: Vec<u8>, memory: &mut SimMemory) -> EntryAddress {
        let mut storage = MemStorage::new();
        storage.insert(PATH, image);
        LoaderEntry::new(&mut storage, memory).load_executable(PATH)
    }

    #[test]
    fn test_text_inside_window_loads() {
        let image = ElfBuilder::new(0x0090_0010)
            .section(".text", 0x0090_0000, &text())
            .build();
        let mut memory = SimMemory::new();

        let entry = load(image, &mut memory);

        assert_eq!(entry, EntryAddress::new(0x0090_0010));
        assert!(entry.is_executable());
        assert_eq!(memory.read(0x0090_0000, 0x100), text());
    }

    #[test]
    fn test_text_below_window_returns_zero() {
        let image = ElfBuilder::new(0x0070_0000)
            .section(".text", 0x0070_0000, &text())
            .build();
        let mut memory = SimMemory::new();

        assert_eq!(load(image, &mut memory), EntryAddress::NONE);
        assert_eq!(memory.writes(), 0);
    }

    #[test]
    fn test_optional_sections_keep_entry() {
        let minimal = ElfBuilder::new(0x0090_0040)
            .section(".text", 0x0090_0000, &text())
            .build();
        let full = ElfBuilder::new(0x0090_0040)
            .section(".text", 0x0090_0000, &text())
            .section(".rodata", 0x0091_0000, b"ro")
            .section(".data", 0x0092_0000, &[9u8; 8])
            .nobits(".bss", 0x0093_0000, 0x40)
            .build();

        let a = load(minimal, &mut SimMemory::new());
        let b = load(full, &mut SimMemory::new());
        assert_eq!(a, b);
        assert_eq!(a.get(), 0x0090_0040);
    }

    #[test]
    fn test_zero_length_bss_loads() {
        let image = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text())
            .nobits(".bss", 0x0094_0000, 0)
            .build();
        assert_eq!(load(image, &mut SimMemory::new()).get(), 0x0090_0000);
    }

    #[test]
    fn test_corrupted_header_writes_nothing() {
        let mut image = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text())
            .build();
        image[1] = b'X';

        let mut memory = SimMemory::new();
        let sentinel = [0x5Au8; 0x100];
        memory.poke(0x0090_0000, &sentinel);
        let writes_before = memory.writes();

        assert_eq!(load(image, &mut memory), EntryAddress::NONE);
        assert_eq!(memory.writes(), writes_before);
        assert_eq!(memory.read(0x0090_0000, 0x100), sentinel);
    }

    #[test]
    fn test_entry_outside_window_writes_nothing() {
        let image = ElfBuilder::new(0x0070_0000)
            .section(".text", 0x0090_0000, &text())
            .build();
        let mut memory = SimMemory::new();

        assert_eq!(load(image, &mut memory), EntryAddress::NONE);
        assert_eq!(memory.writes(), 0);
    }

    #[test]
    fn test_zero_entry_writes_nothing() {
        let image = ElfBuilder::new(0)
            .section(".text", 0x0090_0000, &text())
            .build();
        let mut storage = MemStorage::new();
        storage.insert(PATH, image);
        let mut memory = SimMemory::new();

        let err = LoaderEntry::new(&mut storage, &mut memory).try_load(PATH).unwrap_err();

        assert_eq!(err, LoadError::Format(FormatError::EntryOutsideText { entry: 0 }));
        assert_eq!(memory.writes(), 0);
    }

    #[test]
    fn test_try_load_reports_typed_errors() {
        let mut storage = MemStorage::new();
        let mut memory = SimMemory::new();
        storage.insert("bad.elf", alloc::vec![0u8; 64]);
        storage.insert(
            "low.elf",
            ElfBuilder::new(0x0070_0000)
                .section(".text", 0x0070_0000, &text())
                .build(),
        );

        let mut loader = LoaderEntry::new(&mut storage, &mut memory);
        assert_eq!(
            loader.try_load("missing.elf").unwrap_err(),
            LoadError::Storage(StorageError::NotFound)
        );
        assert_eq!(
            loader.try_load("bad.elf").unwrap_err(),
            LoadError::Format(FormatError::InvalidMagic)
        );
        assert!(matches!(
            loader.try_load("low.elf").unwrap_err(),
            LoadError::Range(RangeError { address: 0x0070_0000, .. })
        ));
    }

    #[test]
    fn test_entry_display() {
        assert_eq!(alloc::format!("{}", EntryAddress::new(0x0080_0100)), "0x00800100");
    }
}
