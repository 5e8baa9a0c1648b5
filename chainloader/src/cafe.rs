//! Console platform.
//!
//! Real implementations of the platform seams for the PowerPC target:
//! kernel writes through the exploit foothold, direct physical stores with
//! the OS cache primitives, and the newlib file layer over the SD card.
//! [`_start`] is the process entry: it reads the pad, draws the payload menu
//! on both screens when B is held and runs the chain.
//!
//! The trampoline (`KernelPatches`) and the restore handler
//! (`KernelPatchesRevertHook`) are assembly routines linked in by the
//! device build.

use alloc::ffi::CString;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::arch::asm;
use core::cell::UnsafeCell;
use core::ffi::{c_char, c_int, c_long, c_void, CStr};

use crate::chain::{ChainExecutor, NativeLauncher, ProcessArgs};
use crate::config::{DEFAULT_PAYLOAD, DISPATCH_TABLES, FOOTHOLD_SYSCALL, NOTHING_EXECUTED};
use crate::error::StorageError;
use crate::heap::TrackingHeap;
use crate::menu::{select_payload_with, MenuInput, PayloadMenu};
use crate::payloads::{discover_default, DirEntry, DirectoryScan, PayloadCatalog};
use crate::platform::{KernelGate, MemoryBus};
use crate::storage::{Storage, StorageFile};

/// Mount point of the SD card in the newlib device table.
pub const SD_ROOT: &str = "fs:/vol/external01/";

/// Size of the heap arena shared with payloads.
const HEAP_SIZE: usize = 0x10_0000;

const O_RDONLY: c_int = 0;
const SEEK_SET: c_int = 0;
const SEEK_END: c_int = 2;
const DT_DIR: u8 = 4;

/// Directory entry as laid out by the toolchain's newlib.
#[repr(C)]
struct Dirent {
    d_ino: u32,
    d_type: u8,
    d_name: [c_char; 256],
}

extern "C" {
    fn KernelPatches();
    fn KernelPatchesRevertHook();

    fn DCFlushRange(addr: *mut c_void, size: u32);
    fn ICInvalidateRange(addr: *mut c_void, size: u32);

    fn open(path: *const c_char, flags: c_int, ...) -> c_int;
    fn lseek(fd: c_int, offset: c_long, whence: c_int) -> c_long;
    fn read(fd: c_int, buf: *mut c_void, count: usize) -> isize;
    fn close(fd: c_int) -> c_int;

    fn opendir(path: *const c_char) -> *mut c_void;
    fn readdir(dir: *mut c_void) -> *mut Dirent;
    fn closedir(dir: *mut c_void) -> c_int;

    fn VPADRead(chan: c_int, buffers: *mut VpadStatus, count: u32, error: *mut c_int) -> c_int;

    fn OSScreenInit();
    fn OSScreenGetBufferSizeEx(screen: u32) -> u32;
    fn OSScreenSetBufferEx(screen: u32, addr: *mut c_void);
    fn OSScreenEnableEx(screen: u32, enable: c_int);
    fn OSScreenClearBufferEx(screen: u32, color: u32);
    fn OSScreenPutFontEx(screen: u32, column: u32, row: u32, text: *const c_char);
    fn OSScreenFlipBuffersEx(screen: u32);

    fn OSSleepTicks(ticks: i64);
}

/// Heap shared by the loader and the payloads it runs.
#[global_allocator]
static HEAP: TrackingHeap = TrackingHeap::empty();

#[repr(C, align(64))]
struct Arena(UnsafeCell<[u8; HEAP_SIZE]>);

// SAFETY: handed to the heap once in `_start`, never touched directly.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; HEAP_SIZE]));

#[cfg(not(feature = "std"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("[Chain] panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}

/// Hand the shared heap its region.
///
/// # Safety
///
/// Must be called once, before any allocation, with a region nothing
/// else uses.
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    unsafe { HEAP.init(start, size) };
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// The console kernel, reached through the foothold slot.
pub struct CafeKernel;

impl KernelGate for CafeKernel {
    fn dispatch_tables(&self) -> &[u32] {
        &DISPATCH_TABLES
    }

    fn trampoline(&self) -> u32 {
        KernelPatches as usize as u32
    }

    fn platform_default(&self) -> u32 {
        KernelPatchesRevertHook as usize as u32
    }

    unsafe fn foothold_write(&mut self, address: u32, value: u32) {
        // The foothold handler clobbers r1 as well as r0 and r3..r12; r1 is
        // parked in a callee-saved register around the call, the rest are
        // declared as consumed.
        unsafe {
            asm!(
                "mr {saved}, 1",
                "sc",
                "nop",
                "mr 1, {saved}",
                saved = out(reg) _,
                inout("r0") (FOOTHOLD_SYSCALL as u32) << 8 => _,
                inout("r3") 1u32 => _,
                inout("r4") 0u32 => _,
                inout("r5") value => _,
                inout("r6") 0u32 => _,
                inout("r7") 0u32 => _,
                inout("r8") 0x1_0000u32 => _,
                inout("r9") address => _,
                lateout("r10") _,
                lateout("r11") _,
                lateout("r12") _,
                out("ctr") _,
                out("lr") _,
            );
        }
    }

    unsafe fn syscall(&mut self, slot: u16, arg0: u32, arg1: u32) {
        unsafe {
            asm!(
                "sc",
                inout("r0") (slot as u32) << 8 => _,
                inout("r3") arg0 => _,
                inout("r4") arg1 => _,
                lateout("r5") _,
                lateout("r6") _,
                lateout("r7") _,
                lateout("r8") _,
                lateout("r9") _,
                lateout("r10") _,
                lateout("r11") _,
                lateout("r12") _,
                out("ctr") _,
                out("lr") _,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Physical memory inside the load window, identity mapped.
pub struct CafeMemory;

impl MemoryBus for CafeMemory {
    unsafe fn copy_to(&mut self, address: u32, bytes: &[u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                address as usize as *mut u8,
                bytes.len(),
            );
        }
    }

    unsafe fn fill(&mut self, address: u32, len: u32, value: u8) {
        unsafe { core::ptr::write_bytes(address as usize as *mut u8, value, len as usize) };
    }

    fn flush_data_cache(&mut self, address: u32, len: u32) {
        // SAFETY: cache maintenance has no effect on memory contents.
        unsafe { DCFlushRange(address as usize as *mut c_void, len) };
    }

    fn invalidate_instruction_cache(&mut self, address: u32, len: u32) {
        // SAFETY: as above.
        unsafe { ICInvalidateRange(address as usize as *mut c_void, len) };
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// The SD card through newlib.
pub struct CafeStorage {
    root: &'static str,
}

impl CafeStorage {
    /// Storage rooted at the SD card mount.
    pub const fn sd() -> Self {
        Self { root: SD_ROOT }
    }

    fn c_path(&self, path: &str) -> Result<CString, StorageError> {
        CString::new(format!("{}{}", self.root, path.trim_start_matches('/')))
            .map_err(|_| StorageError::NotFound)
    }
}

/// Open newlib file descriptor.
pub struct CafeFile(c_int);

impl Storage for CafeStorage {
    type File = CafeFile;

    fn open(&mut self, path: &str) -> Result<CafeFile, StorageError> {
        let c_path = self.c_path(path)?;
        // SAFETY: `c_path` is NUL terminated.
        let fd = unsafe { open(c_path.as_ptr(), O_RDONLY) };
        if fd < 0 {
            return Err(StorageError::NotFound);
        }
        Ok(CafeFile(fd))
    }
}

impl StorageFile for CafeFile {
    fn seek_end(&mut self) -> Result<usize, StorageError> {
        // SAFETY: `self.0` is an open descriptor.
        let end = unsafe { lseek(self.0, 0, SEEK_END) };
        usize::try_from(end).map_err(|_| StorageError::Unreadable)
    }

    fn rewind(&mut self) -> Result<(), StorageError> {
        // SAFETY: as above.
        match unsafe { lseek(self.0, 0, SEEK_SET) } {
            0 => Ok(()),
            _ => Err(StorageError::Unreadable),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let n = unsafe { read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
        usize::try_from(n).map_err(|_| StorageError::Unreadable)
    }
}

impl Drop for CafeFile {
    fn drop(&mut self) {
        // SAFETY: closed exactly once.
        unsafe { close(self.0) };
    }
}

impl DirectoryScan for CafeStorage {
    fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let c_path = self.c_path(path)?;
        // SAFETY: `c_path` is NUL terminated.
        let dir = unsafe { opendir(c_path.as_ptr()) };
        if dir.is_null() {
            return Err(StorageError::NotFound);
        }

        let mut entries = Vec::new();
        loop {
            // SAFETY: `dir` is open; the entry stays valid until the next call.
            let entry = unsafe { readdir(dir) };
            if entry.is_null() {
                break;
            }
            let (name, kind) = unsafe {
                let entry = &*entry;
                (CStr::from_ptr(entry.d_name.as_ptr()), entry.d_type)
            };
            let name = String::from(name.to_str().unwrap_or(""));
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            entries.push(DirEntry {
                name,
                is_dir: kind == DT_DIR,
            });
        }

        // SAFETY: opened above.
        unsafe { closedir(dir) };
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Pad and screen
// ---------------------------------------------------------------------------

const VPAD_CHAN_0: c_int = 0;
const VPAD_BUTTON_A: u32 = 0x8000;
const VPAD_BUTTON_B: u32 = 0x4000;
const VPAD_BUTTON_UP: u32 = 0x0200;
const VPAD_BUTTON_DOWN: u32 = 0x0100;

const SCREEN_TV: u32 = 0;
const SCREEN_DRC: u32 = 1;
/// Screen buffers live at the bottom of MEM1.
const SCREEN_BUFFERS: u32 = 0xF400_0000;

/// One 60 Hz frame of the 62.15625 MHz OS timer.
const FRAME_TICKS: i64 = 62_156_250 / 1000 * 16;

/// Gamepad state; only the button words are read.
#[repr(C)]
struct VpadStatus {
    hold: u32,
    trigger: u32,
    release: u32,
    rest: [u8; 0xAC - 12],
}

/// The GamePad on channel 0.
pub struct Pad;

impl Pad {
    fn read(&mut self) -> (u32, u32) {
        let mut status = VpadStatus {
            hold: 0,
            trigger: 0,
            release: 0,
            rest: [0; 0xAC - 12],
        };
        let mut error: c_int = 0;
        // SAFETY: `status` is one writable buffer.
        let read = unsafe { VPADRead(VPAD_CHAN_0, &mut status, 1, &mut error) };
        if read < 1 {
            return (0, 0);
        }
        (status.hold, status.trigger)
    }

    /// Whether B is held or just pressed.
    pub fn menu_requested(&mut self) -> bool {
        let (hold, trigger) = self.read();
        (hold | trigger) & VPAD_BUTTON_B != 0
    }
}

impl Iterator for Pad {
    type Item = MenuInput;

    /// The button pressed this frame. Never ends.
    fn next(&mut self) -> Option<MenuInput> {
        let (_, trigger) = self.read();
        Some(match trigger {
            VPAD_BUTTON_A => MenuInput::Confirm,
            VPAD_BUTTON_UP => MenuInput::Up,
            VPAD_BUTTON_DOWN => MenuInput::Down,
            _ => MenuInput::Idle,
        })
    }
}

/// TV and GamePad text consoles.
pub struct Screen;

impl Screen {
    /// Set up both buffers and blank them.
    pub fn open() -> Self {
        // SAFETY: the buffers are reserved for OSScreen by the system.
        unsafe {
            OSScreenInit();
            let tv_size = OSScreenGetBufferSizeEx(SCREEN_TV);
            OSScreenSetBufferEx(SCREEN_TV, SCREEN_BUFFERS as usize as *mut c_void);
            OSScreenSetBufferEx(SCREEN_DRC, (SCREEN_BUFFERS + tv_size) as usize as *mut c_void);
            OSScreenEnableEx(SCREEN_TV, 1);
            OSScreenEnableEx(SCREEN_DRC, 1);
        }
        let mut screen = Screen;
        screen.show(&[]);
        screen
    }

    fn show(&mut self, lines: &[&str]) {
        // SAFETY: the buffers were set up in `open`.
        unsafe {
            OSScreenClearBufferEx(SCREEN_TV, 0);
            OSScreenClearBufferEx(SCREEN_DRC, 0);
        }
        for (row, line) in lines.iter().enumerate() {
            let Ok(text) = CString::new(*line) else {
                continue;
            };
            // SAFETY: `text` is NUL terminated.
            unsafe {
                OSScreenPutFontEx(SCREEN_TV, 0, row as u32, text.as_ptr());
                OSScreenPutFontEx(SCREEN_DRC, 0, row as u32, text.as_ptr());
            }
        }
        // SAFETY: as above.
        unsafe {
            OSScreenFlipBuffersEx(SCREEN_TV);
            OSScreenFlipBuffersEx(SCREEN_DRC);
        }
    }

    /// Draw one frame of the menu and wait for the next.
    pub fn frame(&mut self, menu: &PayloadMenu<'_>) {
        let mut text = String::new();
        if menu.render(&mut text).is_ok() {
            let lines: Vec<&str> = text.lines().collect();
            self.show(&lines);
        }
        // SAFETY: plain sleep.
        unsafe { OSSleepTicks(FRAME_TICKS) };
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Pick a payload, run the chain and return the process result.
///
/// `inputs` feeds the selection menu when `menu_requested` is set; `frame`
/// is shown the menu before each input.
///
/// # Safety
///
/// Must run on the console after the exploit foothold is in place and
/// [`init_heap`] has been called.
pub unsafe fn chainload<I, F>(
    args: ProcessArgs,
    menu_requested: bool,
    inputs: I,
    frame: F,
) -> i32
where
    I: IntoIterator<Item = MenuInput>,
    F: FnMut(&PayloadMenu<'_>),
{
    let mut storage = CafeStorage::sd();
    let catalog = if menu_requested {
        discover_default(&mut storage)
    } else {
        PayloadCatalog::new()
    };
    let path = select_payload_with(menu_requested, &catalog, DEFAULT_PAYLOAD, inputs, frame);

    let report = ChainExecutor::new(CafeKernel, storage, CafeMemory, &HEAP, NativeLauncher)
        .run(&path, &args);

    if report.executed() {
        report.exit_code
    } else {
        NOTHING_EXECUTED
    }
}

/// Process entry.
///
/// # Safety
///
/// Called once by the system loader with the process arguments.
#[no_mangle]
pub unsafe extern "C" fn _start(argc: c_int, argv: *const *const c_char) -> c_int {
    // SAFETY: first thing the process does; the arena is reserved for it.
    unsafe { init_heap(ARENA.0.get().cast::<u8>(), HEAP_SIZE) };

    let mut pad = Pad;
    let menu_requested = pad.menu_requested();
    let mut screen = menu_requested.then(Screen::open);

    let args = ProcessArgs::new(argc, argv);
    // SAFETY: the foothold is in place before this payload is started and
    // the heap was initialised above.
    unsafe {
        chainload(args, menu_requested, pad, |menu: &PayloadMenu<'_>| {
            if let Some(screen) = screen.as_mut() {
                screen.frame(menu);
            }
        })
    }
}
