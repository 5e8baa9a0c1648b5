//! Tracking heap and allocation frontier.
//!
//! Provides a linked list allocator that threads every live allocation onto
//! an intrusive list in allocation order. A [`HeapFrontier`] remembers the
//! newest record before control leaves the loader; [`HeapWatcher::sweep`]
//! later frees everything newer than it, whoever allocated it.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use spin::Mutex;

/// A heap that can report and release its newest live allocation.
pub trait TrackedHeap {
    /// Serial number of the newest live allocation, if any.
    fn tail_serial(&self) -> Option<u64>;

    /// Free the newest live allocation. Returns `false` if there was none.
    ///
    /// # Safety
    ///
    /// Nothing may use the released allocation afterwards.
    unsafe fn release_tail(&self) -> bool;
}

impl<H: TrackedHeap + ?Sized> TrackedHeap for &H {
    fn tail_serial(&self) -> Option<u64> {
        (**self).tail_serial()
    }

    unsafe fn release_tail(&self) -> bool {
        // SAFETY: forwarded contract.
        unsafe { (**self).release_tail() }
    }
}

/// Header placed in front of every tracked allocation.
#[repr(C)]
struct Record {
    prev: Option<NonNull<Record>>,
    next: Option<NonNull<Record>>,
    serial: u64,
    /// Layout the caller asked for.
    layout: Layout,
}

/// Full block layout for a caller layout, and the offset of the caller's
/// bytes inside it.
fn block_layout(layout: Layout) -> Option<(Layout, usize)> {
    let (block, offset) = Layout::new::<Record>().extend(layout).ok()?;
    Some((block.pad_to_align(), offset))
}

struct Arena {
    heap: Heap,
    tail: Option<NonNull<Record>>,
    next_serial: u64,
    live: usize,
}

// SAFETY: records are only reached through the arena, which sits behind
// the mutex.
unsafe impl Send for Arena {}

impl Arena {
    /// Unlink `record` and hand its block back to the heap.
    ///
    /// # Safety
    ///
    /// `record` must be a live record of this arena.
    unsafe fn free(&mut self, record: NonNull<Record>) {
        // SAFETY: live records are valid and only mutated under the lock.
        unsafe {
            let Record {
                prev, next, layout, ..
            } = *record.as_ptr();

            if let Some(prev) = prev {
                (*prev.as_ptr()).next = next;
            }
            match next {
                Some(next) => (*next.as_ptr()).prev = prev,
                None => self.tail = prev,
            }

            if let Some((block, _)) = block_layout(layout) {
                self.heap.deallocate(record.cast(), block);
            }
        }
        self.live -= 1;
    }
}

/// Linked list allocator with allocation-ordered tracking.
pub struct TrackingHeap {
    arena: Mutex<Arena>,
}

impl TrackingHeap {
    /// Create an empty heap.
    pub const fn empty() -> Self {
        Self {
            arena: Mutex::new(Arena {
                heap: Heap::empty(),
                tail: None,
                next_serial: 1,
                live: 0,
            }),
        }
    }

    /// Initialize the heap with a memory region.
    ///
    /// # Safety
    ///
    /// The memory region must be valid, unused, and outlive the heap.
    pub unsafe fn init(&self, heap_start: *mut u8, heap_size: usize) {
        unsafe {
            self.arena.lock().heap.init(heap_start, heap_size);
        }
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.arena.lock().live
    }

    /// Bytes in use (including record headers) and total heap size.
    pub fn stats(&self) -> (usize, usize) {
        let arena = self.arena.lock();
        (arena.heap.used(), arena.heap.size())
    }
}

unsafe impl GlobalAlloc for TrackingHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some((block, offset)) = block_layout(layout) else {
            return core::ptr::null_mut();
        };

        let mut arena = self.arena.lock();
        let Ok(raw) = arena.heap.allocate_first_fit(block) else {
            return core::ptr::null_mut();
        };

        let record = raw.cast::<Record>();
        let prev = arena.tail;
        // SAFETY: `raw` is a fresh block sized and aligned for the header.
        unsafe {
            record.as_ptr().write(Record {
                prev,
                next: None,
                serial: arena.next_serial,
                layout,
            });
            if let Some(prev) = prev {
                (*prev.as_ptr()).next = Some(record);
            }
        }

        arena.tail = Some(record);
        arena.next_serial += 1;
        arena.live += 1;

        // SAFETY: `offset` lies inside the block.
        unsafe { raw.as_ptr().add(offset) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some((_, offset)) = block_layout(layout) else {
            return;
        };
        // SAFETY: `ptr` came from `alloc` with the same layout, so the
        // record sits `offset` bytes before it.
        let record = unsafe { NonNull::new(ptr.sub(offset).cast::<Record>()) };
        if let Some(record) = record {
            // SAFETY: the record is live until this call.
            unsafe { self.arena.lock().free(record) };
        }
    }
}

impl TrackedHeap for TrackingHeap {
    fn tail_serial(&self) -> Option<u64> {
        let arena = self.arena.lock();
        // SAFETY: the tail is a live record.
        arena.tail.map(|tail| unsafe { (*tail.as_ptr()).serial })
    }

    unsafe fn release_tail(&self) -> bool {
        let mut arena = self.arena.lock();
        match arena.tail {
            Some(tail) => {
                // SAFETY: the tail is live; the caller gave up its contents.
                unsafe { arena.free(tail) };
                true
            }
            None => false,
        }
    }
}

/// Opaque boundary between allocations made before and after a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapFrontier {
    serial: Option<u64>,
}

impl HeapFrontier {
    /// Whether an allocation with `serial` was made after this mark.
    fn is_behind(&self, serial: u64) -> bool {
        self.serial.map_or(true, |mark| serial > mark)
    }
}

/// Mark/sweep pair over a [`TrackedHeap`].
pub struct HeapWatcher;

impl HeapWatcher {
    /// Remember the newest live allocation.
    pub fn mark<H: TrackedHeap + ?Sized>(heap: &H) -> HeapFrontier {
        let frontier = HeapFrontier {
            serial: heap.tail_serial(),
        };
        log::debug!("[Heap] Frontier marked at {:?}", frontier.serial);
        frontier
    }

    /// Free every live allocation newer than `frontier`, newest first.
    ///
    /// Returns the number of allocations freed.
    ///
    /// # Safety
    ///
    /// No one may use an allocation made after the mark once this returns.
    pub unsafe fn sweep<H: TrackedHeap + ?Sized>(heap: &H, frontier: HeapFrontier) -> usize {
        let mut reclaimed = 0;
        while let Some(serial) = heap.tail_serial() {
            if !frontier.is_behind(serial) {
                break;
            }
            // SAFETY: the caller gave up every post-mark allocation.
            if !unsafe { heap.release_tail() } {
                break;
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            log::info!("[Heap] Reclaimed {} leaked allocations", reclaimed);
        }
        reclaimed
    }
}
