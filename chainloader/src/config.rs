//! Chainloader configuration constants.
//!
//! Compile-time layout of the target platform. Values here affect where
//! payloads may land, which dispatch slot is borrowed and how files are read.

/// First byte of the payload load window.
pub const LOAD_WINDOW_START: u32 = 0x0080_0000;

/// One past the last byte of the payload load window.
pub const LOAD_WINDOW_END: u32 = 0x00FD_0000;

/// Dispatch slot borrowed for the privileged-write trampoline.
pub const RESERVED_SYSCALL: u16 = 0x36;

/// Dispatch slot the external exploit left hooked with a kernel write.
pub const FOOTHOLD_SYSCALL: u16 = 0x35;

/// Size of one dispatch table entry in bytes.
pub const DISPATCH_ENTRY_SIZE: u32 = 4;

/// Per-core copies of the kernel dispatch table.
///
/// Order: unknown, games, loader, home menu, browser.
pub const DISPATCH_TABLES: [u32; 5] = [
    0xFFE8_4C70,
    0xFFE8_5070,
    0xFFE8_5470,
    0xFFEA_AA60,
    0xFFEA_AE60,
];

/// Block size used when reading a payload from storage (128 KB).
pub const READ_BLOCK_SIZE: usize = 0x2_0000;

/// Alignment (and size granularity) of the payload file buffer.
pub const BUFFER_ALIGN: usize = 0x40;

/// Data/instruction cache line size of the target core.
pub const CACHE_LINE_SIZE: u32 = 32;

/// Directory scanned for selectable payloads.
pub const PAYLOAD_DIR: &str = "wiiu/payloads";

/// File name suffix identifying a payload inside its directory.
pub const PAYLOAD_SUFFIX: &str = "payload.elf";

/// Payload loaded when the selection menu is not requested.
pub const DEFAULT_PAYLOAD: &str = "wiiu/payloads/default/payload.elf";

/// Process result reported when nothing was executed.
pub const NOTHING_EXECUTED: i32 = -1;

/// Address of slot `slot` inside the dispatch table at `table`.
pub const fn dispatch_slot(table: u32, slot: u16) -> u32 {
    table + slot as u32 * DISPATCH_ENTRY_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_ordered() {
        assert!(LOAD_WINDOW_START < LOAD_WINDOW_END);
    }

    #[test]
    fn test_dispatch_slot_address() {
        assert_eq!(dispatch_slot(0xFFE8_4C70, RESERVED_SYSCALL), 0xFFE8_4D48);
    }

    #[test]
    fn test_default_payload_lives_in_payload_dir() {
        assert!(DEFAULT_PAYLOAD.starts_with(PAYLOAD_DIR));
        assert!(DEFAULT_PAYLOAD.ends_with(PAYLOAD_SUFFIX));
    }
}
