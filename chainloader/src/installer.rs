//! ELF Section Installer
//!
//! Connects the ELF parser (`elf.rs`) to physical memory: every canonical
//! section is copied to its link address and made coherent for both data
//! and instruction fetch.
//!
//! # Process
//!
//! 1. Locate `.text` (mandatory), `.rodata`, `.data` and `.bss` (optional)
//! 2. Check every present, non-empty section against the load window and
//!    the entry point against `.text`; a single violation aborts before any
//!    byte is placed
//! 3. For each section, in order:
//!    a. Copy the file bytes to the target address (`NOBITS` is zero-filled)
//!    b. Flush the data cache over the range
//!    c. Invalidate the instruction cache over the same range

use alloc::vec::Vec;

use crate::elf::{AddressWindow, ElfImage, SectionDescriptor, SectionKind};
use crate::error::{FormatError, LoadError};
use crate::platform::MemoryBus;

/// Sections placed by the installer, with whether each is mandatory.
pub const CANONICAL_SECTIONS: [(&str, bool); 4] = [
    (".text", true),
    (".rodata", false),
    (".data", false),
    (".bss", false),
];

/// One section written to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedSection {
    /// Section name
    pub name: &'static str,
    /// Target address
    pub address: u32,
    /// Bytes placed
    pub size: u32,
    /// Whether the bytes came from the file or were zero-filled
    pub kind: SectionKind,
}

/// Result of installing an image.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Sections written, in placement order
    pub placed: Vec<PlacedSection>,
    /// Optional sections that were absent or empty
    pub skipped: Vec<&'static str>,
}

impl InstallReport {
    /// Total bytes written.
    pub fn bytes_placed(&self) -> u64 {
        self.placed.iter().map(|s| s.size as u64).sum()
    }
}

/// Places an image's sections inside an address window.
pub struct ImageInstaller {
    window: AddressWindow,
}

impl ImageInstaller {
    /// Installer bound to `window`.
    pub fn new(window: AddressWindow) -> Self {
        Self { window }
    }

    /// Collect the canonical sections to place and validate all of them.
    ///
    /// Nothing is written. Fails on a missing `.text`, on section data that
    /// lies outside the file, on any window violation, or on an entry point
    /// that does not fall inside `.text`.
    pub fn plan<'a>(
        &self,
        image: &ElfImage<'a>,
    ) -> Result<(Vec<(&'static str, SectionDescriptor<'a>)>, Vec<&'static str>), LoadError> {
        let mut sections = Vec::with_capacity(CANONICAL_SECTIONS.len());
        let mut skipped = Vec::new();

        for (name, required) in CANONICAL_SECTIONS {
            let section = match image.find_section(name) {
                Some(section) => section,
                None if required => {
                    log::error!("[Loader] {} section not found", name);
                    return Err(FormatError::MissingSection { name }.into());
                }
                None => {
                    skipped.push(name);
                    continue;
                }
            };

            if section.is_empty() {
                if required {
                    log::error!("[Loader] {} section is empty", name);
                    return Err(FormatError::MissingSection { name }.into());
                }
                skipped.push(name);
                continue;
            }

            self.window.validate(name, section.address, section.size)?;
            image.section_data(&section)?;

            sections.push((name, section));
        }

        let entry = image.entry();
        let in_text = sections
            .iter()
            .any(|(name, section)| *name == ".text" && section.range().contains(&(entry as u64)));
        if !in_text {
            log::error!("[Loader] Entry point {:#010x} is outside .text", entry);
            return Err(FormatError::EntryOutsideText { entry }.into());
        }

        Ok((sections, skipped))
    }

    /// Validate, then copy every canonical section into memory.
    pub fn install<M: MemoryBus>(
        &self,
        image: &ElfImage<'_>,
        memory: &mut M,
    ) -> Result<InstallReport, LoadError> {
        let (sections, skipped) = self.plan(image)?;
        let mut report = InstallReport {
            placed: Vec::with_capacity(sections.len()),
            skipped,
        };

        for (name, section) in sections {
            let bytes = image.section_data(&section)?;

            log::debug!(
                "[Loader] Copy {} to {:#010x} (size: {:#x})",
                name,
                section.address,
                section.size
            );

            // SAFETY: `plan` proved the range lies inside the load window,
            // which belongs to the payload.
            unsafe {
                match section.kind {
                    SectionKind::Bits => memory.copy_to(section.address, bytes),
                    SectionKind::NoBits => memory.fill(section.address, section.size, 0),
                }
            }
            memory.flush_data_cache(section.address, section.size);
            memory.invalidate_instruction_cache(section.address, section.size);

            report.placed.push(PlacedSection {
                name,
                address: section.address,
                size: section.size,
                kind: section.kind,
            });
        }

        Ok(report)
    }
}

impl Default for ImageInstaller {
    fn default() -> Self {
        Self::new(AddressWindow::LOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RangeError;
    use crate::sim::{ElfBuilder, MemoryOp, SimMemory};

    fn text_bytes() -> Vec<u8> {
        (0..0x100u32).map(|i| (i * 7) as u8).collect()
    }

    #[test]
    fn test_text_only_round_trip() {
        let text = text_bytes();
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text)
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let report = ImageInstaller::default().install(&image, &mut memory).unwrap();

        assert_eq!(memory.read(0x0090_0000, text.len()), text);
        assert_eq!(report.placed.len(), 1);
        assert_eq!(report.skipped, [".rodata", ".data", ".bss"]);
    }

    #[test]
    fn test_all_sections_round_trip() {
        let text = text_bytes();
        let rodata = b"payload v1\0".to_vec();
        let data_bytes = [0xAAu8; 0x40];
        let bss = [0u8; 0x20];
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text)
            .section(".rodata", 0x0091_0000, &rodata)
            .section(".data", 0x0092_0000, &data_bytes)
            .section(".bss", 0x0093_0000, &bss)
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let report = ImageInstaller::default().install(&image, &mut memory).unwrap();

        assert_eq!(memory.read(0x0090_0000, text.len()), text);
        assert_eq!(memory.read(0x0091_0000, rodata.len()), rodata);
        assert_eq!(memory.read(0x0092_0000, data_bytes.len()), data_bytes);
        assert_eq!(memory.read(0x0093_0000, bss.len()), bss);
        assert_eq!(report.placed.len(), 4);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_flush_precedes_invalidate() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text_bytes())
            .section(".data", 0x0092_0000, &[1, 2, 3, 4])
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        ImageInstaller::default().install(&image, &mut memory).unwrap();

        assert_eq!(
            memory.ops(),
            &[
                MemoryOp::Copy { address: 0x0090_0000, len: 0x100 },
                MemoryOp::FlushData { address: 0x0090_0000, len: 0x100 },
                MemoryOp::InvalidateInstruction { address: 0x0090_0000, len: 0x100 },
                MemoryOp::Copy { address: 0x0092_0000, len: 4 },
                MemoryOp::FlushData { address: 0x0092_0000, len: 4 },
                MemoryOp::InvalidateInstruction { address: 0x0092_0000, len: 4 },
            ]
        );
    }

    #[test]
    fn test_text_below_window_places_nothing() {
        let data = ElfBuilder::new(0x0070_0000)
            .section(".text", 0x0070_0000, &text_bytes())
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let err = ImageInstaller::default().install(&image, &mut memory).unwrap_err();

        assert!(matches!(err, LoadError::Range(RangeError { section: ".text", .. })));
        assert!(memory.ops().is_empty());
    }

    #[test]
    fn test_optional_violation_aborts_whole_install() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text_bytes())
            .section(".data", 0x00FC_FFF0, &[0u8; 0x20])
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let err = ImageInstaller::default().install(&image, &mut memory).unwrap_err();

        assert!(matches!(err, LoadError::Range(RangeError { section: ".data", .. })));
        assert!(memory.ops().is_empty());
    }

    #[test]
    fn test_missing_text_is_fatal() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".data", 0x0092_0000, &[1, 2, 3, 4])
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let err = ImageInstaller::default().install(&image, &mut memory).unwrap_err();
        assert_eq!(err, LoadError::Format(FormatError::MissingSection { name: ".text" }));
    }

    #[test]
    fn test_entry_outside_text_places_nothing() {
        for entry in [0, 0x0070_0000, 0x0090_0100, 0x0092_0000] {
            let data = ElfBuilder::new(entry)
                .section(".text", 0x0090_0000, &text_bytes())
                .section(".data", 0x0092_0000, &[1, 2, 3, 4])
                .build();
            let image = ElfImage::parse(&data).unwrap();
            let mut memory = SimMemory::new();

            let err = ImageInstaller::default().install(&image, &mut memory).unwrap_err();

            assert_eq!(err, LoadError::Format(FormatError::EntryOutsideText { entry }));
            assert!(memory.ops().is_empty());
        }
    }

    #[test]
    fn test_entry_at_last_text_byte_accepted() {
        let data = ElfBuilder::new(0x0090_00FF)
            .section(".text", 0x0090_0000, &text_bytes())
            .build();
        let image = ElfImage::parse(&data).unwrap();

        assert!(ImageInstaller::default().plan(&image).is_ok());
    }

    #[test]
    fn test_zero_length_bss_skipped() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text_bytes())
            .nobits(".bss", 0x0010_0000, 0)
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();

        let report = ImageInstaller::default().install(&image, &mut memory).unwrap();
        assert!(report.skipped.contains(&".bss"));
        assert_eq!(report.placed.len(), 1);
    }

    #[test]
    fn test_nobits_bss_zero_filled() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &text_bytes())
            .nobits(".bss", 0x0093_0000, 0x80)
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut memory = SimMemory::new();
        memory.poke(0x0093_0000, &[0xFF; 0x80]);

        let report = ImageInstaller::default().install(&image, &mut memory).unwrap();

        assert_eq!(memory.read(0x0093_0000, 0x80), alloc::vec![0u8; 0x80]);
        assert_eq!(report.placed[1].kind, SectionKind::NoBits);
        assert_eq!(report.bytes_placed(), 0x180);
    }
}
