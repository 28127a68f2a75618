//! The dispatch facade: the entry points an interposition layer (or
//! `#[global_allocator]`) calls, routing to the bootstrap region until the
//! heap reports ready, and to the heap singleton after.
//!
//! Failure policy: there isn't one. If memory can't be produced the process
//! is taken down through [`fatal()`], nothing here returns null for a valid
//! request.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{
    alloc::{
        bootstrap::BootstrapRegion,
        fault::{fatal, Fault},
        header::{BlockHeader, HEADER_SIZE},
        heap::Heap,
        readiness::Readiness,
    },
    config::MIN_ALIGN,
    heap_cell::{CellState, HeapCell},
    trace,
    util::{
        cold,
        num::{align_up, is_aligned},
    },
};

/// Where a block came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Bootstrap,
    Heap,
}

/// A snapshot of the facade's own state (the heap's internals are its own
/// business)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacadeStats {
    pub bootstrap_used: usize,
    pub bootstrap_capacity: usize,
    pub bootstrap_allocations: usize,
    pub heap_initialized: bool,
}

/// Routes allocation requests to a [`BootstrapRegion`] of `C` bytes while
/// `ready` says the heap isn't ready, and to the lazily built `H` once it is.
///
/// Pointers are never migrated between the two. Bootstrap blocks are never
/// reclaimed: `release()` on one is a no-op, and `usable_size()` on one
/// reports the size it was allocated with.
pub struct Facade<H, R, const C: usize>
where
    H: 'static,
{
    heap: HeapCell<H>,
    bootstrap: BootstrapRegion<C>,
    ready: R,
    /// Set by `lock_hook()` only if it actually locked the heap
    fork_locked: AtomicBool,
}

impl<H, R, const C: usize> Facade<H, R, C>
where
    H: Heap + Send,
    R: Readiness,
{
    /// `init` builds the heap, at most once, the first time it is needed.
    pub const fn new(init: fn() -> H, ready: R) -> Self {
        Self {
            heap: HeapCell::new(init),
            bootstrap: BootstrapRegion::new(),
            ready,
            fork_locked: AtomicBool::new(false),
        }
    }

    /// The heap singleton, built on first use. Same instance for every
    /// caller on every thread.
    pub fn heap(&self) -> &H {
        self.heap.get()
    }

    /// Decide, once per request, where it goes. Allocations made by the heap
    /// constructor itself go to the bootstrap region, everybody else waits
    /// for the heap.
    fn route(&self) -> Origin {
        if self.ready.is_ready() && !self.heap.is_initializing_on_current_thread() {
            Origin::Heap
        } else {
            Origin::Bootstrap
        }
    }

    /// Carve `size` bytes at `align` out of the bootstrap region. No header,
    /// the region keeps its own size records.
    fn bootstrap_block(&self, align: usize, size: usize) -> *mut u8 {
        trace!("bootstrap allocate(", size, ")");
        match self.bootstrap.allocate_aligned(align, size) {
            Ok(data) => data.as_ptr(),
            Err(e) => fatal(e.into()),
        }
    }

    /// Get a heap block with room for the header and `size` bytes at `align`
    fn heap_block(&self, align: usize, size: usize) -> *mut u8 {
        let Some(block_size) = BlockHeader::aligned_block_size(size, align) else {
            fatal(Fault::SizeOverflow { size });
        };
        let start = self.heap().malloc(block_size);
        if start.is_null() {
            fatal(Fault::BackendAllocationFailure { size: block_size });
        }
        debug_assert!(is_aligned(start, MIN_ALIGN));
        let data = align_up(start as usize + HEADER_SIZE, align);
        let offset = data - start as usize;
        // SAFETY: `aligned_block_size()` leaves room for the worst-case
        // padding, so `[data - HEADER_SIZE, data + size)` is inside the block
        unsafe {
            let data = start.add(offset);
            BlockHeader::write(data, BlockHeader { offset, size });
            debug_assert!(is_aligned(data, align));
            data
        }
    }

    fn block(&self, align: usize, size: usize) -> *mut u8 {
        match self.route() {
            Origin::Heap => self.heap_block(align, size),
            Origin::Bootstrap => self.bootstrap_block(align, size),
        }
    }

    /// Allocate `size` bytes, `MIN_ALIGN`-aligned and uninitialized. Never
    /// returns null: a heap that can't deliver, or a full bootstrap region,
    /// terminates the process.
    #[inline]
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.block(MIN_ALIGN, size)
    }

    /// Allocate `size` bytes aligned to `alignment`. Returns null only when
    /// `alignment` is not a power of two (`memalign()` says `EINVAL`), and
    /// otherwise fails the way [`Facade::allocate()`] does.
    pub fn aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8 {
        if !alignment.is_power_of_two() {
            return cold(ptr::null_mut);
        }
        self.block(alignment.max(MIN_ALIGN), size)
    }

    /// Did `ptr` come from the bootstrap region?
    pub fn is_bootstrap_pointer(&self, ptr: *mut u8) -> bool {
        self.bootstrap.contains(ptr)
    }

    /// Give a block back. Null is ignored, and so are bootstrap blocks,
    /// which are never reclaimed.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this facade
    pub unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if self.is_bootstrap_pointer(ptr) {
            trace!("release(", ptr, "): bootstrap block, ignored");
            return;
        }
        // SAFETY: caller guarantees this is one of ours, and it isn't a
        // bootstrap block, so it lives in a heap block
        unsafe {
            let header = BlockHeader::read(ptr);
            self.heap().free(header.block_start(ptr));
        }
    }

    /// Bytes usable at `ptr`, at least what was asked for. Zero for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this facade
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        if self.is_bootstrap_pointer(ptr) {
            // SAFETY: caller guarantees this is one of ours
            return unsafe { self.bootstrap.recorded_size(ptr) };
        }
        // SAFETY: caller guarantees this is one of ours, and it is a heap
        // block, so it has a header
        unsafe {
            let header = BlockHeader::read(ptr);
            self.heap().usable_size(header.block_start(ptr)) - header.offset
        }
    }

    /// `calloc()`: `count * size` zeroed bytes, null if the product
    /// overflows.
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return cold(ptr::null_mut);
        };
        let data = self.allocate(total);
        // SAFETY: `allocate()` gave us `total` writable bytes
        unsafe { data.write_bytes(0, total) };
        data
    }

    /// `realloc()`. A null `ptr` is a plain allocation. Heap blocks that
    /// already have room are returned as they are, everything else (bootstrap
    /// blocks included) is moved to a fresh block and the old one released.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this facade. It must not be
    /// used again unless it is what gets returned.
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(size);
        }
        // SAFETY: caller guarantees `ptr` is live and ours
        let usable = unsafe { self.usable_size(ptr) };
        if usable >= size && !self.is_bootstrap_pointer(ptr) {
            // SAFETY: still the same live block, the header sits in front
            unsafe {
                let header = BlockHeader::read(ptr);
                BlockHeader::write(ptr, BlockHeader { size, ..header });
            }
            return ptr;
        }
        let data = self.allocate(size);
        // SAFETY: both blocks are live and distinct, and both have at least
        // `min(usable, size)` bytes
        unsafe {
            ptr::copy_nonoverlapping(ptr, data, usable.min(size));
            self.release(ptr);
        }
        data
    }

    /// Called right before `fork()`: hold the heap's internal locks so no
    /// other thread is halfway through changing it when the address space is
    /// copied. Nothing to hold if the heap hasn't been built.
    pub fn lock_hook(&self) {
        trace!("lock_hook()");
        if let Some(heap) = self.heap.get_if_init() {
            heap.lock();
            self.fork_locked.store(true, Ordering::Release);
        }
    }

    /// Called right after `fork()`, in both parent and child. Only undoes
    /// what `lock_hook()` did: a heap built in between was never locked.
    pub fn unlock_hook(&self) {
        trace!("unlock_hook()");
        if !self.fork_locked.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(heap) = self.heap.get_if_init() {
            // SAFETY: `fork_locked` says `lock_hook()` took the lock, and
            // nobody else releases it
            unsafe { heap.unlock() };
        }
    }

    pub fn stats(&self) -> FacadeStats {
        FacadeStats {
            bootstrap_used: self.bootstrap.used(),
            bootstrap_capacity: self.bootstrap.capacity(),
            bootstrap_allocations: self.bootstrap.nr_allocations(),
            heap_initialized: self.heap.state() == CellState::Init,
        }
    }
}

unsafe impl<H, R, const C: usize> GlobalAlloc for Facade<H, R, C>
where
    H: Heap + Send,
    R: Readiness,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= MIN_ALIGN {
            self.allocate(layout.size())
        } else {
            cold(|| self.aligned_allocate(layout.align(), layout.size()))
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _: Layout) {
        // SAFETY: the caller is required to give a pointer to an allocation
        // made by this allocator
        unsafe { self.release(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= MIN_ALIGN {
            // SAFETY: identical contract to caller
            unsafe { self.reallocate(ptr, new_size) }
        } else {
            let data = self.aligned_allocate(layout.align(), new_size);
            // SAFETY: `GlobalAlloc::realloc()` contract, `ptr` holds
            // `layout.size()` bytes
            unsafe {
                ptr::copy_nonoverlapping(ptr, data, layout.size().min(new_size));
                self.release(ptr);
            }
            data
        }
    }
}

#[cfg(feature = "nightly")]
unsafe impl<H, R, const C: usize> std::alloc::Allocator for Facade<H, R, C>
where
    H: Heap + Send,
    R: Readiness,
{
    fn allocate(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, std::alloc::AllocError> {
        // SAFETY: `GlobalAlloc::alloc()` has no requirements we don't meet
        // here (zero-sized layouts are fine for this allocator)
        let data = unsafe { GlobalAlloc::alloc(self, layout) };
        let slice = ptr::slice_from_raw_parts_mut(data, layout.size());
        ptr::NonNull::new(slice).ok_or(std::alloc::AllocError)
    }

    unsafe fn deallocate(&self, ptr: ptr::NonNull<u8>, _: Layout) {
        // SAFETY: identical contract to caller, which is described in
        // `Allocator` docs
        unsafe { self.release(ptr.as_ptr()) }
    }
}
