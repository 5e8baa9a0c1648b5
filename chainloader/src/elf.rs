//! ELF32 Section Loader
//!
//! Parses just enough of a big-endian PowerPC ELF32 executable to find its
//! entry point and named sections. Program headers, relocations and symbols
//! are ignored: payloads are statically linked for the load window.

use core::ops::Range;

use bitflags::bitflags;

use crate::config::{LOAD_WINDOW_END, LOAD_WINDOW_START};
use crate::error::{FormatError, RangeError};

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: big endian
pub const ELFDATA2MSB: u8 = 2;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: PowerPC
pub const EM_PPC: u16 = 20;

/// Section type: occupies no file space
pub const SHT_NOBITS: u32 = 8;

/// Size of the ELF32 file header
pub const EHDR_SIZE: usize = 52;

/// Size of one ELF32 section header
pub const SHDR_SIZE: usize = 40;

bitflags! {
    /// Section attribute flags (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// Writable at run time
        const WRITE = 0x1;
        /// Occupies memory at run time
        const ALLOC = 0x2;
        /// Contains executable instructions
        const EXECINSTR = 0x4;
    }
}

/// Parsed ELF32 file header fields the loader needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Elf32Header {
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Entry point address
    pub e_entry: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// How a section's bytes are backed in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Contents are stored in the file
    Bits,
    /// Contents are implicit zeros (`SHT_NOBITS`)
    NoBits,
}

/// One section as found in the section header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDescriptor<'a> {
    /// Section name
    pub name: &'a str,
    /// Offset of the contents in the file
    pub file_offset: u32,
    /// Target address
    pub address: u32,
    /// Size in bytes
    pub size: u32,
    /// File backing
    pub kind: SectionKind,
    /// Attribute flags
    pub flags: SectionFlags,
}

impl SectionDescriptor<'_> {
    /// Target range `[address, address + size)`.
    pub fn range(&self) -> Range<u64> {
        self.address as u64..self.address as u64 + self.size as u64
    }

    /// Check if the section occupies no bytes
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// A validated executable image borrowed from a file buffer.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: Elf32Header,
}

impl<'a> ElfImage<'a> {
    /// Parse and validate the header of an ELF32 PowerPC executable.
    ///
    /// The section header table and its name table are bounds-checked
    /// here, so later lookups cannot read outside `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, FormatError> {
        if data.len() < EHDR_SIZE {
            return Err(FormatError::TooSmall);
        }

        if data[0..4] != ELF_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        if data[4] != ELFCLASS32 {
            return Err(FormatError::InvalidClass);
        }
        if data[5] != ELFDATA2MSB {
            return Err(FormatError::InvalidEncoding);
        }

        let header = Elf32Header {
            e_type: be_u16(data, 16),
            e_machine: be_u16(data, 18),
            e_entry: be_u32(data, 24),
            e_shoff: be_u32(data, 32),
            e_shentsize: be_u16(data, 46),
            e_shnum: be_u16(data, 48),
            e_shstrndx: be_u16(data, 50),
        };

        if header.e_type != ET_EXEC {
            return Err(FormatError::InvalidType);
        }
        if header.e_machine != EM_PPC {
            return Err(FormatError::InvalidMachine);
        }

        let image = ElfImage { data, header };
        image.validate_section_table()?;
        Ok(image)
    }

    fn validate_section_table(&self) -> Result<(), FormatError> {
        let count = self.header.e_shnum as usize;
        if count == 0 {
            return Err(FormatError::MissingSection { name: ".text" });
        }
        if self.header.e_shentsize as usize != SHDR_SIZE {
            return Err(FormatError::SectionTableOutOfBounds);
        }

        let table_end = (self.header.e_shoff as usize)
            .checked_add(count * SHDR_SIZE)
            .ok_or(FormatError::SectionTableOutOfBounds)?;
        if table_end > self.data.len() {
            return Err(FormatError::SectionTableOutOfBounds);
        }

        if self.header.e_shstrndx as usize >= count {
            return Err(FormatError::InvalidStringTable);
        }
        let strtab = self.raw_section(self.header.e_shstrndx as usize);
        let end = (strtab.offset as u64) + (strtab.size as u64);
        if end > self.data.len() as u64 {
            return Err(FormatError::InvalidStringTable);
        }

        Ok(())
    }

    /// Declared entry point.
    pub fn entry(&self) -> u32 {
        self.header.e_entry
    }

    /// Number of section headers.
    pub fn section_count(&self) -> usize {
        self.header.e_shnum as usize
    }

    /// Look up a section by name.
    ///
    /// Returns `None` when no section carries that name. Callers decide
    /// whether absence is fatal.
    pub fn find_section(&self, name: &str) -> Option<SectionDescriptor<'a>> {
        self.sections().find(|section| section.name == name)
    }

    /// Iterate over every section in table order.
    pub fn sections(&self) -> impl Iterator<Item = SectionDescriptor<'a>> {
        let image = *self;
        (0..self.section_count()).map(move |index| image.section(index))
    }

    /// File bytes backing a section.
    ///
    /// `NOBITS` sections have no file bytes and yield an empty slice.
    pub fn section_data(&self, section: &SectionDescriptor<'_>) -> Result<&'a [u8], FormatError> {
        if section.kind == SectionKind::NoBits {
            return Ok(&[]);
        }

        let start = section.file_offset as usize;
        let end = start
            .checked_add(section.size as usize)
            .ok_or(FormatError::SectionOutOfBounds)?;
        self.data.get(start..end).ok_or(FormatError::SectionOutOfBounds)
    }

    fn section(&self, index: usize) -> SectionDescriptor<'a> {
        let raw = self.raw_section(index);
        SectionDescriptor {
            name: self.section_name(raw.name),
            file_offset: raw.offset,
            address: raw.addr,
            size: raw.size,
            kind: if raw.kind == SHT_NOBITS {
                SectionKind::NoBits
            } else {
                SectionKind::Bits
            },
            flags: SectionFlags::from_bits_truncate(raw.flags),
        }
    }

    fn raw_section(&self, index: usize) -> RawSection {
        let base = self.header.e_shoff as usize + index * SHDR_SIZE;
        RawSection {
            name: be_u32(self.data, base),
            kind: be_u32(self.data, base + 4),
            flags: be_u32(self.data, base + 8),
            addr: be_u32(self.data, base + 12),
            offset: be_u32(self.data, base + 16),
            size: be_u32(self.data, base + 20),
        }
    }

    /// Resolve a name from the section name table.
    ///
    /// Names that run off the table or are not UTF-8 resolve to `""`.
    fn section_name(&self, offset: u32) -> &'a str {
        let strtab = self.raw_section(self.header.e_shstrndx as usize);
        let table_start = strtab.offset as usize;
        let table_end = table_start + strtab.size as usize;
        let start = table_start.saturating_add(offset as usize);
        if start >= table_end {
            return "";
        }

        let bytes = &self.data[start..table_end];
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(&bytes[..len]).unwrap_or("")
    }
}

/// Section header fields as stored in the file.
#[derive(Debug, Clone, Copy)]
struct RawSection {
    name: u32,
    kind: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
}

/// The physical range payload sections may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    start: u32,
    end: u32,
}

impl AddressWindow {
    /// The platform load window.
    pub const LOAD: AddressWindow = AddressWindow {
        start: LOAD_WINDOW_START,
        end: LOAD_WINDOW_END,
    };

    /// Window covering `[start, end)`.
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// First address inside the window.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last address inside the window.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether `[address, address + size)` lies fully inside the window.
    ///
    /// Empty ranges always fit.
    pub fn contains(&self, address: u32, size: u32) -> bool {
        if size == 0 {
            return true;
        }
        let end = address as u64 + size as u64;
        address >= self.start && end <= self.end as u64
    }

    /// Reject a section that would land outside the window.
    pub fn validate(
        &self,
        section: &'static str,
        address: u32,
        size: u32,
    ) -> Result<(), RangeError> {
        if self.contains(address, size) {
            return Ok(());
        }

        log::error!(
            "[Loader] {} would be loaded at {:#010x}..{:#010x}, outside {:#010x}..{:#010x}",
            section,
            address,
            address as u64 + size as u64,
            self.start,
            self.end
        );
        Err(RangeError {
            section,
            address,
            size,
            window_start: self.start,
            window_end: self.end,
        })
    }
}

impl Default for AddressWindow {
    fn default() -> Self {
        Self::LOAD
    }
}

/// Big-endian u16 at `offset`. Callers bounds-check first.
fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Big-endian u32 at `offset`. Callers bounds-check first.
fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ElfBuilder;

    fn minimal_image() -> alloc::vec::Vec<u8> {
        ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &[0x60, 0x00, 0x00, 0x00])
            .build()
    }

    #[test]
    fn test_parse_minimal_elf() {
        let data = minimal_image();
        let image = ElfImage::parse(&data).unwrap();
        assert_eq!(image.entry(), 0x0090_0000);

        let text = image.find_section(".text").unwrap();
        assert_eq!(text.address, 0x0090_0000);
        assert_eq!(text.size, 4);
        assert_eq!(text.kind, SectionKind::Bits);
        assert!(text.flags.contains(SectionFlags::EXECINSTR));
        assert_eq!(image.section_data(&text).unwrap(), &[0x60, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_absent_section() {
        let data = minimal_image();
        let image = ElfImage::parse(&data).unwrap();
        assert!(image.find_section(".rodata").is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut data = minimal_image();
        data[0] = 0x00;
        assert_eq!(ElfImage::parse(&data).unwrap_err(), FormatError::InvalidMagic);
    }

    #[test]
    fn test_too_small() {
        let data = [0x7F, b'E', b'L', b'F'];
        assert_eq!(ElfImage::parse(&data).unwrap_err(), FormatError::TooSmall);
    }

    #[test]
    fn test_wrong_machine() {
        let mut data = minimal_image();
        data[18..20].copy_from_slice(&62u16.to_be_bytes());
        assert_eq!(ElfImage::parse(&data).unwrap_err(), FormatError::InvalidMachine);
    }

    #[test]
    fn test_little_endian_rejected() {
        let mut data = minimal_image();
        data[5] = 1;
        assert_eq!(ElfImage::parse(&data).unwrap_err(), FormatError::InvalidEncoding);
    }

    #[test]
    fn test_shared_object_rejected() {
        let mut data = minimal_image();
        data[16..18].copy_from_slice(&3u16.to_be_bytes());
        assert_eq!(ElfImage::parse(&data).unwrap_err(), FormatError::InvalidType);
    }

    #[test]
    fn test_section_table_out_of_bounds() {
        let mut data = minimal_image();
        let len = data.len() as u32;
        data[32..36].copy_from_slice(&len.to_be_bytes());
        assert_eq!(
            ElfImage::parse(&data).unwrap_err(),
            FormatError::SectionTableOutOfBounds
        );
    }

    #[test]
    fn test_section_data_out_of_bounds() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &[0u8; 16])
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let mut text = image.find_section(".text").unwrap();
        text.size = data.len() as u32;
        assert_eq!(image.section_data(&text), Err(FormatError::SectionOutOfBounds));
    }

    #[test]
    fn test_nobits_has_no_file_data() {
        let data = ElfBuilder::new(0x0090_0000)
            .section(".text", 0x0090_0000, &[0u8; 4])
            .nobits(".bss", 0x0091_0000, 0x200)
            .build();
        let image = ElfImage::parse(&data).unwrap();
        let bss = image.find_section(".bss").unwrap();
        assert_eq!(bss.kind, SectionKind::NoBits);
        assert_eq!(bss.size, 0x200);
        assert!(image.section_data(&bss).unwrap().is_empty());
    }

    #[test]
    fn test_window_boundaries() {
        let window = AddressWindow::LOAD;
        // Exactly at the start.
        assert!(window.contains(LOAD_WINDOW_START, 0x100));
        // Ending exactly at the end.
        assert!(window.contains(LOAD_WINDOW_END - 0x100, 0x100));
        // The whole window.
        assert!(window.contains(LOAD_WINDOW_START, LOAD_WINDOW_END - LOAD_WINDOW_START));
        // One byte below the start.
        assert!(!window.contains(LOAD_WINDOW_START - 1, 0x10));
        // One byte past the end.
        assert!(!window.contains(LOAD_WINDOW_END - 0x100, 0x101));
        // Starting at the end.
        assert!(!window.contains(LOAD_WINDOW_END, 1));
    }

    #[test]
    fn test_window_zero_size_always_fits() {
        let window = AddressWindow::LOAD;
        assert!(window.contains(0, 0));
        assert!(window.contains(u32::MAX, 0));
        assert!(window.validate(".bss", 0x0010_0000, 0).is_ok());
    }

    #[test]
    fn test_window_no_wraparound() {
        let window = AddressWindow::new(0x0080_0000, u32::MAX);
        assert!(!window.contains(0xFFFF_FF00, 0x200));
    }

    #[test]
    fn test_validate_reports_range() {
        let err = AddressWindow::LOAD
            .validate(".text", 0x0070_0000, 0x100)
            .unwrap_err();
        assert_eq!(err.section, ".text");
        assert_eq!(err.address, 0x0070_0000);
        assert_eq!(err.window_start, LOAD_WINDOW_START);
    }
}
