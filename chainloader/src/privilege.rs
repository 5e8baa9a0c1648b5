//! Privileged-Write Bridge
//!
//! Borrows one reserved slot of the kernel dispatch table and points it at
//! a trampoline that enters supervisor mode, performs a single word store
//! and returns. Every core keeps its own copy of the table, so the slot is
//! patched in all of them before the hijack becomes observable.
//!
//! # Slot Layout
//!
//! | Table        | Reserved slot address         |
//! |--------------|-------------------------------|
//! | each copy    | `base + RESERVED_SYSCALL * 4` |
//!
//! # Lifetime
//!
//! [`PrivilegeBridge::install`] returns a move-only [`PrivilegeToken`]. The
//! token is the only way to issue a privileged write and is consumed by
//! [`PrivilegeToken::revert`]. Dropping it without reverting still restores
//! every slot.
//!
//! Revert writes the platform's default handler into the slot, not whatever
//! the slot held before install. The slot is reserved, so the two only
//! differ when something else has already tampered with it.

use crate::config::{dispatch_slot, RESERVED_SYSCALL};
use crate::platform::KernelGate;

/// Installs the dispatch-slot hijack.
pub struct PrivilegeBridge;

impl PrivilegeBridge {
    /// Patch the reserved slot of every dispatch table copy and activate it.
    ///
    /// Not reentrant: the returned token holds the gate for as long as the
    /// hijack is live.
    pub fn install<G: KernelGate>(mut gate: G) -> PrivilegeToken<G> {
        let trampoline = gate.trampoline();
        let restore = gate.platform_default();

        patch_reserved_slot(&mut gate, trampoline);

        // SAFETY: the slot now holds the trampoline in every copy; a null
        // target only activates it.
        unsafe { gate.syscall(RESERVED_SYSCALL, 0, 0) };

        log::info!(
            "[Privilege] Trampoline {:#010x} installed in {} dispatch tables",
            trampoline,
            gate.dispatch_tables().len()
        );

        PrivilegeToken {
            gate,
            restore,
            writes: 0,
            reverted: false,
        }
    }
}

/// Live dispatch-slot hijack.
pub struct PrivilegeToken<G: KernelGate> {
    gate: G,
    /// Handler written back on revert.
    restore: u32,
    writes: usize,
    reverted: bool,
}

impl<G: KernelGate> PrivilegeToken<G> {
    /// Store `value` at `address` with supervisor rights.
    ///
    /// No validation and no status: bounds belong to the caller.
    ///
    /// # Safety
    ///
    /// `address` must be a word the caller has independently proven safe
    /// to overwrite.
    pub unsafe fn write_word(&mut self, address: u32, value: u32) {
        // SAFETY: the reserved slot holds the trampoline until revert; the
        // caller vouches for the target.
        unsafe { self.gate.syscall(RESERVED_SYSCALL, address, value) };
        self.writes += 1;
    }

    #[cfg(test)]
    fn gate(&self) -> &G {
        &self.gate
    }

    #[cfg(test)]
    fn writes(&self) -> usize {
        self.writes
    }

    /// Write the platform default handler into every table copy and flush.
    pub fn revert(mut self) {
        self.restore_slots();
    }

    fn restore_slots(&mut self) {
        if self.reverted {
            return;
        }

        patch_reserved_slot(&mut self.gate, self.restore);

        // SAFETY: the slot holds the platform handler again; invoking it
        // lets the platform drop any state the trampoline left behind.
        unsafe { self.gate.syscall(RESERVED_SYSCALL, 0, 0) };

        self.reverted = true;
        log::info!(
            "[Privilege] Reverted after {} privileged writes",
            self.writes
        );
    }
}

impl<G: KernelGate> Drop for PrivilegeToken<G> {
    fn drop(&mut self) {
        if !self.reverted {
            log::warn!("[Privilege] Token dropped while installed, reverting");
            self.restore_slots();
        }
    }
}

/// Point the reserved slot of every table copy at `handler`.
fn patch_reserved_slot<G: KernelGate>(gate: &mut G, handler: u32) {
    let copies = gate.dispatch_tables().len();
    for index in 0..copies {
        let table = gate.dispatch_tables()[index];
        // SAFETY: only the reserved slot is touched and it is always
        // written back by revert.
        unsafe { gate.foothold_write(dispatch_slot(table, RESERVED_SYSCALL), handler) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimKernel;

    #[test]
    fn test_install_patches_every_copy() {
        let mut kernel = SimKernel::new();
        let token = PrivilegeBridge::install(&mut kernel);
        drop(token);

        // One foothold write per table on install, another on revert.
        assert_eq!(kernel.foothold_writes(), 2 * kernel.dispatch_tables().len());
        assert_eq!(kernel.activations(), 1);
    }

    #[test]
    fn test_slots_hold_trampoline_while_installed() {
        let mut kernel = SimKernel::new();
        let trampoline = kernel.trampoline();

        let token = PrivilegeBridge::install(&mut kernel);
        for &table in token.gate().dispatch_tables() {
            assert_eq!(token.gate().word(dispatch_slot(table, RESERVED_SYSCALL)), trampoline);
        }
        token.revert();
    }

    #[test]
    fn test_install_revert_round_trip() {
        let mut kernel = SimKernel::new();
        let before = kernel.table_snapshot();

        let token = PrivilegeBridge::install(&mut kernel);
        token.revert();

        assert_eq!(kernel.table_snapshot(), before);
        assert_eq!(kernel.flushes(), 1);
    }

    #[test]
    fn test_revert_writes_platform_default_not_prior_slot() {
        let mut kernel = SimKernel::new();
        let tables = kernel.dispatch_tables().to_vec();
        for &table in &tables {
            unsafe { kernel.foothold_write(dispatch_slot(table, RESERVED_SYSCALL), 0xDEAD_BEEF) };
        }

        let token = PrivilegeBridge::install(&mut kernel);
        token.revert();

        for &table in &tables {
            assert_eq!(
                kernel.word(dispatch_slot(table, RESERVED_SYSCALL)),
                kernel.platform_default()
            );
        }
    }

    #[test]
    fn test_five_writes_then_revert() {
        let mut kernel = SimKernel::new();
        let before = kernel.table_snapshot();
        let targets = [0x1000_0000u32, 0x1000_0004, 0x1000_0100, 0x1000_2000, 0x1FFF_FFFC];

        let mut token = PrivilegeBridge::install(&mut kernel);
        for (i, &address) in targets.iter().enumerate() {
            unsafe { token.write_word(address, 0xC0DE_0000 + i as u32) };
        }
        assert_eq!(token.writes(), 5);
        token.revert();

        for (i, &address) in targets.iter().enumerate() {
            assert_eq!(kernel.word(address), 0xC0DE_0000 + i as u32);
        }
        assert_eq!(kernel.table_snapshot(), before);
    }

    #[test]
    fn test_drop_reverts() {
        let mut kernel = SimKernel::new();
        let before = kernel.table_snapshot();
        {
            let _token = PrivilegeBridge::install(&mut kernel);
        }
        assert_eq!(kernel.table_snapshot(), before);
        assert_eq!(kernel.flushes(), 1);
    }

    #[test]
    fn test_revert_runs_once() {
        let mut kernel = SimKernel::new();
        let token = PrivilegeBridge::install(&mut kernel);
        token.revert();
        assert_eq!(kernel.flushes(), 1);
        assert_eq!(kernel.foothold_writes(), 2 * kernel.dispatch_tables().len());
    }
}
