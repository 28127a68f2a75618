//! The allocator of last resort, used before the heap is ready.
//!
//! Everything about this has to work from the very first instruction that
//! needs memory, so there is no lazily initialized state in here: the buffer
//! is static storage (`.bss` for the process-wide region) and the cursor is a
//! plain atomic.

use std::{
    cell::UnsafeCell,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam::utils::CachePadded;

use crate::{
    alloc::fault::BootstrapExhausted,
    config::MIN_ALIGN,
    util::num::{align_up, round_up},
};

#[repr(C, align(16))]
struct Buf<const C: usize>([u8; C]);

/// A fixed-capacity, never-freed bump region of `C` bytes.
///
/// ```plaintext
/// +------------------+-------------------+--------------------------+
/// | carved           | carved            | free                     |  buf
/// +------------------+-------------------+--------------------------+
/// | size |           | size |            |                          |  shadow
/// +------------------+-------------------+--------------------------+
/// 0                                      ^ cursor                   C
/// ```
///
/// Each request carves `[cursor, cursor + n)` where `n` is the request
/// rounded up to [`MIN_ALIGN`] (and at least [`MIN_ALIGN`], so a zero-sized
/// request still gets its own address). Nothing is ever handed back.
///
/// The requested size of each block is recorded in `shadow`, at the same
/// offset as the pointer handed out, so bookkeeping never eats into the `C`
/// bytes of capacity. The shadow is `.bss` like the buffer, and only the
/// pages that get a record are ever touched.
pub struct BootstrapRegion<const C: usize> {
    buf: UnsafeCell<Buf<C>>,
    shadow: UnsafeCell<Buf<C>>,
    cursor: CachePadded<AtomicUsize>,
    nr_allocations: AtomicUsize,
}

// SAFETY: The only access to `buf` (and `shadow`) is through pointers to
// disjoint ranges, and the ranges are handed out by an atomic CAS on
// `cursor`.
unsafe impl<const C: usize> Sync for BootstrapRegion<C> {}

impl<const C: usize> BootstrapRegion<C> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new(Buf([0; C])),
            shadow: UnsafeCell::new(Buf([0; C])),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            nr_allocations: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.buf.get() as *mut u8
    }

    /// Where the size record for the pointer at `offset` lives
    fn record(&self, offset: usize) -> *mut usize {
        (self.shadow.get() as *mut u8).wrapping_add(offset) as *mut usize
    }

    /// Bytes a request of `size` at `align` takes out of the region. Past
    /// `MIN_ALIGN` the worst-case padding is carved too, the cursor is only
    /// ever `MIN_ALIGN`-aligned.
    fn carve_size(size: usize, align: usize) -> Option<usize> {
        round_up(size.max(MIN_ALIGN), MIN_ALIGN)?.checked_add(align - MIN_ALIGN)
    }

    /// Carve out room for `size` bytes. The memory is uninitialized as far as
    /// the caller is concerned, [`MIN_ALIGN`]-aligned, and disjoint from every
    /// other pointer this region has returned.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, BootstrapExhausted> {
        self.allocate_aligned(MIN_ALIGN, size)
    }

    /// [`BootstrapRegion::allocate()`] with the pointer aligned to `align`,
    /// which must be a power of two.
    ///
    /// The capacity check runs on the candidate cursor *before* it is
    /// published, so a failed request leaves the cursor untouched and never
    /// produces a pointer past the end of the buffer.
    pub fn allocate_aligned(
        &self,
        align: usize,
        size: usize,
    ) -> Result<NonNull<u8>, BootstrapExhausted> {
        debug_assert!(align.is_power_of_two());
        let align = align.max(MIN_ALIGN);
        let Some(n) = Self::carve_size(size, align) else {
            return Err(BootstrapExhausted {
                requested: usize::MAX,
                cursor: self.used(),
                capacity: C,
            });
        };

        let mut cursor = self.cursor.load(Ordering::Relaxed);
        loop {
            let next = match cursor.checked_add(n) {
                Some(next) if next <= C => next,
                _ => {
                    return Err(BootstrapExhausted {
                        requested: n,
                        cursor,
                        capacity: C,
                    })
                }
            };
            match self.cursor.compare_exchange_weak(
                cursor,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cursor = actual,
            }
        }
        self.nr_allocations.fetch_add(1, Ordering::Relaxed);

        let start = self.base() as usize + cursor;
        let offset = align_up(start, align) - self.base() as usize;
        // SAFETY: the padding is at most `align - MIN_ALIGN` and the rest of
        // the carve is at least `MIN_ALIGN`, so both the pointer and its
        // `usize` record stay inside our `[cursor, cursor + n)`
        unsafe {
            self.record(offset).write(size);
            Ok(NonNull::new_unchecked(self.base().add(offset)))
        }
    }

    /// The size `ptr` was allocated with.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this region
    pub unsafe fn recorded_size(&self, ptr: *const u8) -> usize {
        debug_assert!(self.contains(ptr));
        let offset = ptr as usize - self.base() as usize;
        // SAFETY: written by `allocate_aligned()` before `ptr` was handed out
        unsafe { self.record(offset).read() }
    }

    /// Did `ptr` come out of this region? (address-range check only)
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + C
    }

    /// Bytes carved so far
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub const fn capacity(&self) -> usize {
        C
    }

    pub fn nr_allocations(&self) -> usize {
        self.nr_allocations.load(Ordering::Relaxed)
    }
}

impl<const C: usize> Default for BootstrapRegion<C> {
    fn default() -> Self {
        Self::new()
    }
}
