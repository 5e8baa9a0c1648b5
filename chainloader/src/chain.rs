//! Chainload handoff.
//!
//! Sequences privilege install, payload placement, the control transfer and
//! the cleanup that follows it.
//!
//! # State Machine
//!
//! ```text
//! Idle ─► PrivilegeInstalled ─► ImageLoaded ─► Executing ─► Returned
//!                 │                                            │
//!                 └──── load failed ───► PrivilegeReverted ◄───┘
//!                                               │
//!                                               ▼
//!                                            Terminal
//! ```
//!
//! Revert is reached on every path. The payload runs with the privilege
//! bridge still installed and may never return.

use alloc::vec::Vec;
use core::ffi::{c_char, c_int};
use core::fmt;

use crate::config::NOTHING_EXECUTED;
use crate::elf::AddressWindow;
use crate::entry::{EntryAddress, LoaderEntry};
use crate::heap::{HeapWatcher, TrackedHeap};
use crate::platform::{KernelGate, MemoryBus};
use crate::privilege::PrivilegeBridge;
use crate::storage::Storage;

/// Handoff progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    PrivilegeInstalled,
    ImageLoaded,
    Executing,
    Returned,
    PrivilegeReverted,
    Terminal,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainState::Idle => "idle",
            ChainState::PrivilegeInstalled => "privilege-installed",
            ChainState::ImageLoaded => "image-loaded",
            ChainState::Executing => "executing",
            ChainState::Returned => "returned",
            ChainState::PrivilegeReverted => "privilege-reverted",
            ChainState::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// The loader's own process arguments, passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct ProcessArgs {
    pub argc: c_int,
    pub argv: *const *const c_char,
}

impl ProcessArgs {
    /// Wrap the arguments the loader itself was started with.
    pub const fn new(argc: c_int, argv: *const *const c_char) -> Self {
        Self { argc, argv }
    }

    /// No arguments.
    pub const fn empty() -> Self {
        Self {
            argc: 0,
            argv: core::ptr::null(),
        }
    }
}

/// Transfers control to a placed payload.
pub trait Launcher {
    /// Run the payload at `entry` and return its result.
    ///
    /// # Safety
    ///
    /// `entry` must point at code that was placed and made coherent.
    unsafe fn launch(&mut self, entry: EntryAddress, args: &ProcessArgs) -> i32;
}

impl<F> Launcher for F
where
    F: FnMut(EntryAddress, &ProcessArgs) -> i32,
{
    unsafe fn launch(&mut self, entry: EntryAddress, args: &ProcessArgs) -> i32 {
        self(entry, args)
    }
}

/// Payload entry signature.
type PayloadMain = extern "C" fn(c_int, *const *const c_char) -> c_int;

/// Jumps to the entry address as a C `main`.
pub struct NativeLauncher;

impl Launcher for NativeLauncher {
    unsafe fn launch(&mut self, entry: EntryAddress, args: &ProcessArgs) -> i32 {
        // SAFETY: the only place a raw address becomes callable. The caller
        // guarantees `entry` is the entry point of code placed in the load
        // window with caches synchronized; payloads follow the C ABI.
        let main: PayloadMain = unsafe { core::mem::transmute(entry.get() as usize) };
        main(args.argc, args.argv)
    }
}

/// Outcome of one chainload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Payload result, or [`NOTHING_EXECUTED`]
    pub exit_code: i32,
    /// Entry point that was launched, [`EntryAddress::NONE`] if none
    pub entry: EntryAddress,
    /// Allocations reclaimed after the payload returned
    pub reclaimed: usize,
    /// States visited, in order
    pub trail: Vec<ChainState>,
}

impl ChainReport {
    /// Whether a payload ran.
    pub fn executed(&self) -> bool {
        self.trail.contains(&ChainState::Executing)
    }
}

/// Runs the handoff against a platform.
pub struct ChainExecutor<G, S, M, H, L> {
    gate: G,
    storage: S,
    memory: M,
    heap: H,
    launcher: L,
    window: AddressWindow,
}

impl<G, S, M, H, L> ChainExecutor<G, S, M, H, L>
where
    G: KernelGate,
    S: Storage,
    M: MemoryBus,
    H: TrackedHeap,
    L: Launcher,
{
    /// Executor over the given platform pieces.
    pub fn new(gate: G, storage: S, memory: M, heap: H, launcher: L) -> Self {
        Self {
            gate,
            storage,
            memory,
            heap,
            launcher,
            window: AddressWindow::LOAD,
        }
    }

    /// Use a custom load window.
    pub fn with_window(mut self, window: AddressWindow) -> Self {
        self.window = window;
        self
    }

    /// Install, load `path`, launch, sweep, revert.
    pub fn run(&mut self, path: &str, args: &ProcessArgs) -> ChainReport {
        let mut trail = Vec::with_capacity(7);
        trail.push(ChainState::Idle);

        let token = PrivilegeBridge::install(&mut self.gate);
        trail.push(ChainState::PrivilegeInstalled);

        let entry = LoaderEntry::with_window(&mut self.storage, &mut self.memory, self.window)
            .load_executable(path);

        let mut exit_code = NOTHING_EXECUTED;
        let mut reclaimed = 0;

        if entry.is_executable() {
            trail.push(ChainState::ImageLoaded);

            let frontier = HeapWatcher::mark(&self.heap);
            trail.push(ChainState::Executing);
            log::info!("[Chain] Jumping to {} with {} args", entry, args.argc);

            // SAFETY: `entry` comes from a successful install.
            exit_code = unsafe { self.launcher.launch(entry, args) };
            trail.push(ChainState::Returned);
            log::info!("[Chain] Payload returned {}", exit_code);

            // SAFETY: the payload has returned; nothing it allocated is
            // reachable from the loader.
            reclaimed = unsafe { HeapWatcher::sweep(&self.heap, frontier) };
        } else {
            log::warn!("[Chain] Nothing to execute for {}", path);
        }

        token.revert();
        trail.push(ChainState::PrivilegeReverted);
        trail.push(ChainState::Terminal);

        ChainReport {
            exit_code,
            entry,
            reclaimed,
            trail,
        }
    }
}
