//! Platform seams.
//!
//! The loader core never touches hardware directly. Everything that needs
//! supervisor help, raw physical stores or cache maintenance goes through
//! one of these traits; `cafe` implements them for the console and `sim`
//! for the host.

/// Kernel-side hooks reachable from the exploit foothold.
pub trait KernelGate {
    /// Base addresses of every per-core copy of the dispatch table.
    fn dispatch_tables(&self) -> &[u32];

    /// Handler address of the supervisor-mode write trampoline.
    ///
    /// Invoked with a null target the trampoline only activates itself;
    /// otherwise it stores its second argument at its first and returns.
    fn trampoline(&self) -> u32;

    /// Handler the platform normally keeps in the reserved slot.
    fn platform_default(&self) -> u32;

    /// Store `value` at kernel `address` through the exploit foothold.
    ///
    /// # Safety
    ///
    /// `address` must be a kernel word the caller knows how to restore.
    unsafe fn foothold_write(&mut self, address: u32, value: u32);

    /// Issue dispatch call `slot` with two argument registers.
    ///
    /// # Safety
    ///
    /// Whatever handler currently sits in `slot` runs in supervisor mode.
    unsafe fn syscall(&mut self, slot: u16, arg0: u32, arg1: u32);
}

impl<K: KernelGate + ?Sized> KernelGate for &mut K {
    fn dispatch_tables(&self) -> &[u32] {
        (**self).dispatch_tables()
    }

    fn trampoline(&self) -> u32 {
        (**self).trampoline()
    }

    fn platform_default(&self) -> u32 {
        (**self).platform_default()
    }

    unsafe fn foothold_write(&mut self, address: u32, value: u32) {
        // SAFETY: forwarded contract.
        unsafe { (**self).foothold_write(address, value) }
    }

    unsafe fn syscall(&mut self, slot: u16, arg0: u32, arg1: u32) {
        // SAFETY: forwarded contract.
        unsafe { (**self).syscall(slot, arg0, arg1) }
    }
}

/// Physical memory inside the load window plus cache maintenance.
pub trait MemoryBus {
    /// Copy `bytes` to physical `address`.
    ///
    /// # Safety
    ///
    /// `[address, address + bytes.len())` must be writable and unused.
    unsafe fn copy_to(&mut self, address: u32, bytes: &[u8]);

    /// Fill `len` bytes at `address` with `value`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBus::copy_to`].
    unsafe fn fill(&mut self, address: u32, len: u32, value: u8);

    /// Write back data cache lines covering the range.
    fn flush_data_cache(&mut self, address: u32, len: u32);

    /// Discard instruction cache lines covering the range.
    fn invalidate_instruction_cache(&mut self, address: u32, len: u32);
}

impl<M: MemoryBus + ?Sized> MemoryBus for &mut M {
    unsafe fn copy_to(&mut self, address: u32, bytes: &[u8]) {
        // SAFETY: forwarded contract.
        unsafe { (**self).copy_to(address, bytes) }
    }

    unsafe fn fill(&mut self, address: u32, len: u32, value: u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).fill(address, len, value) }
    }

    fn flush_data_cache(&mut self, address: u32, len: u32) {
        (**self).flush_data_cache(address, len)
    }

    fn invalidate_instruction_cache(&mut self, address: u32, len: u32) {
        (**self).invalidate_instruction_cache(address, len)
    }
}
