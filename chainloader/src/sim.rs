//! Simulated platform.
//!
//! Host-side stand-ins for the kernel, physical memory, the SD card and the
//! heap arena, plus a builder for small ELF images. Used by the unit tests
//! and by the host tool's dry run.

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use hashbrown::HashMap;

use crate::config::{dispatch_slot, DISPATCH_TABLES, RESERVED_SYSCALL};
use crate::elf::{SectionFlags, EHDR_SIZE, EM_PPC, ET_EXEC, SHDR_SIZE, SHT_NOBITS};
use crate::error::StorageError;
use crate::heap::{TrackedHeap, TrackingHeap};
use crate::payloads::{DirEntry, DirectoryScan};
use crate::platform::{KernelGate, MemoryBus};
use crate::storage::{Storage, StorageFile};

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Handler address the simulated kernel treats as the write trampoline.
pub const SIM_TRAMPOLINE: u32 = 0x0100_0C00;

/// Handler the simulated kernel keeps in the reserved slot.
pub const SIM_PLATFORM_DEFAULT: u32 = 0xFFF0_9A40;

/// Number of slots per table captured by [`SimKernel::table_snapshot`].
const SNAPSHOT_SLOTS: u16 = 0x80;

/// Kernel with five dispatch tables held in a word map.
///
/// Calls are dispatched through the first table. The trampoline stores
/// its second argument at its first; the platform default counts a flush.
pub struct SimKernel {
    tables: Vec<u32>,
    words: HashMap<u32, u32>,
    foothold_writes: usize,
    activations: usize,
    flushes: usize,
}

impl SimKernel {
    /// Kernel with the platform's table layout and default handlers.
    pub fn new() -> Self {
        let tables = DISPATCH_TABLES.to_vec();
        let mut words = HashMap::new();
        for &table in &tables {
            for slot in 0..SNAPSHOT_SLOTS {
                let handler = if slot == RESERVED_SYSCALL {
                    SIM_PLATFORM_DEFAULT
                } else {
                    0xFFF0_0000 + slot as u32 * 0x20
                };
                words.insert(dispatch_slot(table, slot), handler);
            }
        }

        Self {
            tables,
            words,
            foothold_writes: 0,
            activations: 0,
            flushes: 0,
        }
    }

    /// Word stored at `address`; unwritten words read as zero.
    pub fn word(&self, address: u32) -> u32 {
        self.words.get(&address).copied().unwrap_or(0)
    }

    /// Every captured slot of every table, in table order.
    pub fn table_snapshot(&self) -> Vec<u32> {
        self.tables
            .iter()
            .flat_map(|&table| (0..SNAPSHOT_SLOTS).map(move |slot| dispatch_slot(table, slot)))
            .map(|address| self.word(address))
            .collect()
    }

    /// Writes issued through the exploit foothold.
    pub fn foothold_writes(&self) -> usize {
        self.foothold_writes
    }

    /// Trampoline calls with a null target.
    pub fn activations(&self) -> usize {
        self.activations
    }

    /// Platform default handler invocations.
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelGate for SimKernel {
    fn dispatch_tables(&self) -> &[u32] {
        &self.tables
    }

    fn trampoline(&self) -> u32 {
        SIM_TRAMPOLINE
    }

    fn platform_default(&self) -> u32 {
        SIM_PLATFORM_DEFAULT
    }

    unsafe fn foothold_write(&mut self, address: u32, value: u32) {
        self.words.insert(address, value);
        self.foothold_writes += 1;
    }

    unsafe fn syscall(&mut self, slot: u16, arg0: u32, arg1: u32) {
        let handler = self.word(dispatch_slot(self.tables[0], slot));
        match handler {
            SIM_TRAMPOLINE if arg0 == 0 => self.activations += 1,
            SIM_TRAMPOLINE => {
                self.words.insert(arg0, arg1);
            }
            SIM_PLATFORM_DEFAULT => self.flushes += 1,
            _ => log::trace!("[Sim] syscall {:#x} -> {:#010x} ignored", slot, handler),
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

const PAGE_SIZE: u32 = 0x1000;

/// One observable memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    /// Bytes copied in
    Copy { address: u32, len: u32 },
    /// Range filled with a constant
    Fill { address: u32, len: u32 },
    /// Data cache written back
    FlushData { address: u32, len: u32 },
    /// Instruction cache discarded
    InvalidateInstruction { address: u32, len: u32 },
}

/// Sparse physical memory that records every operation.
#[derive(Default)]
pub struct SimMemory {
    pages: HashMap<u32, Box<[u8]>>,
    ops: Vec<MemoryOp>,
}

impl SimMemory {
    /// Empty memory; every byte reads as zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `len` bytes at `address`.
    pub fn read(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| {
                let at = address.wrapping_add(i);
                self.pages
                    .get(&(at / PAGE_SIZE))
                    .map_or(0, |page| page[(at % PAGE_SIZE) as usize])
            })
            .collect()
    }

    /// Store bytes without recording an operation.
    pub fn poke(&mut self, address: u32, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.store(address.wrapping_add(i as u32), byte);
        }
    }

    /// Every recorded operation, oldest first.
    pub fn ops(&self) -> &[MemoryOp] {
        &self.ops
    }

    /// Number of copy and fill operations.
    pub fn writes(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, MemoryOp::Copy { .. } | MemoryOp::Fill { .. }))
            .count()
    }

    fn store(&mut self, address: u32, byte: u8) {
        let page = self
            .pages
            .entry(address / PAGE_SIZE)
            .or_insert_with(|| alloc::vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        page[(address % PAGE_SIZE) as usize] = byte;
    }
}

impl MemoryBus for SimMemory {
    unsafe fn copy_to(&mut self, address: u32, bytes: &[u8]) {
        self.poke(address, bytes);
        self.ops.push(MemoryOp::Copy {
            address,
            len: bytes.len() as u32,
        });
    }

    unsafe fn fill(&mut self, address: u32, len: u32, value: u8) {
        for i in 0..len {
            self.store(address.wrapping_add(i), value);
        }
        self.ops.push(MemoryOp::Fill { address, len });
    }

    fn flush_data_cache(&mut self, address: u32, len: u32) {
        self.ops.push(MemoryOp::FlushData { address, len });
    }

    fn invalidate_instruction_cache(&mut self, address: u32, len: u32) {
        self.ops.push(MemoryOp::InvalidateInstruction { address, len });
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

struct StoredFile {
    data: Rc<[u8]>,
    /// Bytes actually delivered before reads dry up.
    readable: usize,
}

/// In-memory SD card.
#[derive(Default)]
pub struct MemStorage {
    files: HashMap<String, StoredFile>,
    reads: Rc<Cell<usize>>,
}

impl MemStorage {
    /// Empty card.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: &str, data: Vec<u8>) {
        let readable = data.len();
        self.insert_truncated(path, data, readable);
    }

    /// Add a file that reports its full size but only yields `readable`
    /// bytes before reads return nothing.
    pub fn insert_truncated(&mut self, path: &str, data: Vec<u8>, readable: usize) {
        let path = path.trim_start_matches('/').to_string();
        self.files.insert(
            path,
            StoredFile {
                data: data.into(),
                readable,
            },
        );
    }

    /// Read calls issued across every file opened so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

/// Open handle into a [`MemStorage`] file.
pub struct MemFile {
    data: Rc<[u8]>,
    readable: usize,
    pos: usize,
    reads: Rc<Cell<usize>>,
}

impl Storage for MemStorage {
    type File = MemFile;

    fn open(&mut self, path: &str) -> Result<MemFile, StorageError> {
        let file = self
            .files
            .get(path.trim_start_matches('/'))
            .ok_or(StorageError::NotFound)?;
        Ok(MemFile {
            data: file.data.clone(),
            readable: file.readable.min(file.data.len()),
            pos: 0,
            reads: self.reads.clone(),
        })
    }
}

impl StorageFile for MemFile {
    fn seek_end(&mut self) -> Result<usize, StorageError> {
        self.pos = self.data.len();
        Ok(self.pos)
    }

    fn rewind(&mut self) -> Result<(), StorageError> {
        self.pos = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.reads.set(self.reads.get() + 1);
        let end = (self.pos + buf.len()).min(self.readable);
        if end <= self.pos {
            return Ok(0);
        }
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

impl DirectoryScan for MemStorage {
    fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let prefix = alloc::format!("{}/", path.trim_matches('/'));
        let mut entries: Vec<DirEntry> = Vec::new();

        for file in self.files.keys() {
            let Some(rest) = file.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => DirEntry::dir(dir),
                None => DirEntry::file(rest),
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        if entries.is_empty() {
            return Err(StorageError::NotFound);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

/// A [`TrackingHeap`] over its own backing region.
pub struct SimHeap {
    heap: TrackingHeap,
    region: NonNull<u8>,
    layout: Layout,
}

impl SimHeap {
    /// Heap over a fresh zeroed region of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the host cannot provide the region.
    pub fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size.max(0x1000), 0x1000)
            .unwrap_or_else(|_| panic!("bad sim heap size {:#x}", size));
        // SAFETY: non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let region = NonNull::new(raw).unwrap_or_else(|| panic!("sim heap region unavailable"));

        let heap = TrackingHeap::empty();
        // SAFETY: the region is fresh, exclusively ours and freed only on drop.
        unsafe { heap.init(region.as_ptr(), layout.size()) };

        Self {
            heap,
            region,
            layout,
        }
    }

    /// The allocator.
    pub fn heap(&self) -> &TrackingHeap {
        &self.heap
    }
}

impl TrackedHeap for SimHeap {
    fn tail_serial(&self) -> Option<u64> {
        self.heap.tail_serial()
    }

    unsafe fn release_tail(&self) -> bool {
        // SAFETY: forwarded contract.
        unsafe { self.heap.release_tail() }
    }
}

impl Drop for SimHeap {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { dealloc(self.region.as_ptr(), self.layout) };
    }
}

// ---------------------------------------------------------------------------
// ELF images
// ---------------------------------------------------------------------------

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

struct BuilderSection {
    name: String,
    address: u32,
    kind: u32,
    flags: SectionFlags,
    bytes: Vec<u8>,
    size: u32,
}

/// Builds big-endian PowerPC `ET_EXEC` images with a section table.
///
/// Layout: file header, section contents, `.shstrtab`, section headers.
pub struct ElfBuilder {
    entry: u32,
    sections: Vec<BuilderSection>,
}

impl ElfBuilder {
    /// Image with entry point `entry` and no sections yet.
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            sections: Vec::new(),
        }
    }

    /// Add a section whose bytes are stored in the file.
    pub fn section(mut self, name: &str, address: u32, bytes: &[u8]) -> Self {
        self.sections.push(BuilderSection {
            name: name.to_string(),
            address,
            kind: SHT_PROGBITS,
            flags: flags_for(name),
            bytes: bytes.to_vec(),
            size: bytes.len() as u32,
        });
        self
    }

    /// Add a `NOBITS` section of `size` bytes.
    pub fn nobits(mut self, name: &str, address: u32, size: u32) -> Self {
        self.sections.push(BuilderSection {
            name: name.to_string(),
            address,
            kind: SHT_NOBITS,
            flags: flags_for(name),
            bytes: Vec::new(),
            size,
        });
        self
    }

    /// Serialize the image.
    pub fn build(self) -> Vec<u8> {
        let mut out = alloc::vec![0u8; EHDR_SIZE];

        // Section contents.
        let mut offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            align4(&mut out);
            offsets.push(out.len() as u32);
            out.extend_from_slice(&section.bytes);
        }

        // Name table: index 0 is the empty name.
        let mut names = alloc::vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(section.name.as_bytes());
            names.push(0);
        }
        let shstrtab_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");

        align4(&mut out);
        let shstrtab_offset = out.len() as u32;
        out.extend_from_slice(&names);

        align4(&mut out);
        let shoff = out.len() as u32;

        // Null section header.
        out.extend_from_slice(&[0u8; SHDR_SIZE]);
        for (i, section) in self.sections.iter().enumerate() {
            push_shdr(
                &mut out,
                [
                    name_offsets[i],
                    section.kind,
                    section.flags.bits(),
                    section.address,
                    offsets[i],
                    section.size,
                    0,
                    0,
                    4,
                    0,
                ],
            );
        }
        push_shdr(
            &mut out,
            [
                shstrtab_name,
                SHT_STRTAB,
                0,
                0,
                shstrtab_offset,
                names.len() as u32,
                0,
                0,
                1,
                0,
            ],
        );

        let shnum = self.sections.len() as u16 + 2;
        let shstrndx = shnum - 1;

        out[0..4].copy_from_slice(&crate::elf::ELF_MAGIC);
        out[4] = crate::elf::ELFCLASS32;
        out[5] = crate::elf::ELFDATA2MSB;
        out[6] = 1;
        out[16..18].copy_from_slice(&ET_EXEC.to_be_bytes());
        out[18..20].copy_from_slice(&EM_PPC.to_be_bytes());
        out[20..24].copy_from_slice(&1u32.to_be_bytes());
        out[24..28].copy_from_slice(&self.entry.to_be_bytes());
        out[32..36].copy_from_slice(&shoff.to_be_bytes());
        out[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_be_bytes());
        out[46..48].copy_from_slice(&(SHDR_SIZE as u16).to_be_bytes());
        out[48..50].copy_from_slice(&shnum.to_be_bytes());
        out[50..52].copy_from_slice(&shstrndx.to_be_bytes());

        out
    }
}

fn flags_for(name: &str) -> SectionFlags {
    match name {
        ".text" => SectionFlags::ALLOC | SectionFlags::EXECINSTR,
        ".data" | ".bss" => SectionFlags::WRITE | SectionFlags::ALLOC,
        _ => SectionFlags::ALLOC,
    }
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn push_shdr(out: &mut Vec<u8>, fields: [u32; 10]) {
    for field in fields {
        out.extend_from_slice(&field.to_be_bytes());
    }
}
