//! Second-stage payload chainloader.
//!
//! Runs after an external exploit has given userland a single kernel write.
//! From that foothold it installs a reversible privileged-write primitive,
//! places a statically linked PowerPC executable into the fixed load window,
//! hands control to it and cleans up once (if) it returns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ChainExecutor                 │
//! │  Idle → Installed → Loaded → Executing → ... │
//! ├──────────┬──────────────┬────────────────────┤
//! │ privilege│  entry       │  heap              │
//! │ (token)  │  ├ storage   │  (mark / sweep)    │
//! │          │  ├ elf       │                    │
//! │          │  └ installer │                    │
//! └────┬─────┴──────┬───────┴─────────┬──────────┘
//!      │            │                 │
//!  KernelGate   MemoryBus        TrackedHeap
//! ```
//!
//! # Modules
//!
//! - `privilege`: dispatch-slot hijack and the capability token
//! - `elf`: header parsing, section lookup, address window
//! - `installer`: section placement and cache maintenance
//! - `storage`: aligned file buffers read in fixed blocks
//! - `entry`: path → entry address
//! - `heap`: tracking arena plus the frontier mark/sweep pair
//! - `chain`: the handoff state machine
//! - `payloads` / `menu`: payload discovery and selection
//! - `cafe`: the real platform (PowerPC only)
//! - `sim`: a simulated platform for host tooling and tests

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(target_arch = "powerpc", feature(asm_experimental_arch))]

extern crate alloc;

pub mod chain;
pub mod config;
pub mod elf;
pub mod entry;
pub mod error;
pub mod heap;
pub mod installer;
pub mod menu;
pub mod payloads;
pub mod platform;
pub mod privilege;
pub mod storage;

#[cfg(target_arch = "powerpc")]
pub mod cafe;

#[cfg(feature = "std")]
pub mod host;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-exports for convenience
pub use chain::{ChainExecutor, ChainReport, ChainState, Launcher, ProcessArgs};
pub use elf::{AddressWindow, ElfImage, SectionDescriptor};
pub use entry::{EntryAddress, LoaderEntry};
pub use error::{FormatError, LoadError, RangeError, StorageError};
pub use heap::{HeapFrontier, HeapWatcher, TrackedHeap, TrackingHeap};
pub use installer::{ImageInstaller, InstallReport};
pub use platform::{KernelGate, MemoryBus};
pub use privilege::{PrivilegeBridge, PrivilegeToken};
