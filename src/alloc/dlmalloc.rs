use std::{cell::UnsafeCell, mem};

use dlmalloc::Dlmalloc;

use crate::{alloc::heap::Heap, config::MIN_ALIGN, sync::FutexLock, util::cold};

// https://gee.cs.oswego.edu/dl/html/malloc.html

/// Room in front of every block for its total size. `dlmalloc()` wants the
/// size back on `free()`, and we need it for `usable_size()`. Kept at
/// `MIN_ALIGN` so the pointer we return stays aligned.
const SIZE_PREFIX: usize = MIN_ALIGN;

/// The default [`Heap`]: `dlmalloc()` (on top of `mmap()`) behind a single
/// futex lock.
///
/// ```plaintext
/// +--------------------+
/// | dlmalloc header    |
/// +--------------------+
/// | total size         | SIZE_PREFIX bytes
/// +--------------------+ <- pointer handed out
/// | requested size     |
/// .                    .
/// ```
pub struct DlHeap {
    lock: FutexLock,
    dlmalloc: UnsafeCell<Dlmalloc>,
}

// SAFETY: `dlmalloc` is only ever touched while `lock` is held
unsafe impl Sync for DlHeap {}
unsafe impl Send for DlHeap {}

impl DlHeap {
    pub const fn new() -> Self {
        Self {
            lock: FutexLock::new(),
            dlmalloc: UnsafeCell::new(Dlmalloc::new()),
        }
    }

    /// Where the size prefix of `ptr` lives
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this heap
    unsafe fn prefix(ptr: *mut u8) -> *mut usize {
        unsafe { ptr.sub(SIZE_PREFIX) as *mut usize }
    }
}

impl Default for DlHeap {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY:
// - `dlmalloc()` returns `MIN_ALIGN`-aligned chunks when asked to, and we
//   offset by exactly `MIN_ALIGN`
// - every `dlmalloc` call happens under `self.lock`, and `lock()` takes it
unsafe impl Heap for DlHeap {
    fn malloc(&self, size: usize) -> *mut u8 {
        let Some(total) = size.checked_add(SIZE_PREFIX) else {
            return cold(std::ptr::null_mut);
        };
        let data = {
            let _guard = self.lock.guard();
            // SAFETY: we hold the lock, so nobody else has the `Dlmalloc`
            unsafe { (*self.dlmalloc.get()).malloc(total, MIN_ALIGN) }
        };
        if data.is_null() {
            return cold(std::ptr::null_mut);
        }
        // SAFETY: the chunk is at least `total >= SIZE_PREFIX` bytes and
        // `MIN_ALIGN`-aligned, so there's room for an aligned `usize` at the
        // front and the returned pointer is in bounds.
        unsafe {
            (data as *mut usize).write(total);
            data.add(SIZE_PREFIX)
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: identical contract to caller
        let prefix = unsafe { Self::prefix(ptr) };
        let total = unsafe { prefix.read() };
        let _guard = self.lock.guard();
        // SAFETY: `prefix` is the start of the chunk `malloc()` got back from
        // `dlmalloc()`, with the same size and alignment
        unsafe { (*self.dlmalloc.get()).free(prefix as *mut u8, total, MIN_ALIGN) }
    }

    unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        // SAFETY: identical contract to caller
        unsafe { Self::prefix(ptr).read() - SIZE_PREFIX }
    }

    fn lock(&self) {
        self.lock.lock();
    }

    unsafe fn unlock(&self) {
        // SAFETY: caller pairs this with `lock()`
        unsafe { self.lock.unlock() }
    }
}

const _: () = assert!(SIZE_PREFIX >= mem::size_of::<usize>());

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    use super::DlHeap;
    use crate::{alloc::heap::Heap, config::MIN_ALIGN, util::num::is_aligned};

    #[test]
    fn malloc_free_round_trip() {
        let heap = DlHeap::new();
        let mut blocks = Vec::new();
        for size in [0, 1, 15, 16, 17, 1000, 1 << 20] {
            let p = heap.malloc(size);
            assert!(!p.is_null());
            assert!(is_aligned(p, MIN_ALIGN));
            assert!(unsafe { heap.usable_size(p) } >= size);
            unsafe { p.write_bytes(0xab, size) };
            blocks.push(p);
        }
        for p in blocks {
            unsafe { heap.free(p) };
        }
    }

    #[test]
    fn impossible_sizes_return_null() {
        let heap = DlHeap::new();
        assert!(heap.malloc(usize::MAX).is_null());
        assert!(heap.malloc(usize::MAX - 4096).is_null());
    }

    #[test]
    fn lock_blocks_malloc_until_unlock() {
        let heap = DlHeap::new();
        let done = AtomicBool::new(false);
        heap.lock();
        thread::scope(|s| {
            s.spawn(|| {
                let p = heap.malloc(64);
                assert!(!p.is_null());
                done.store(true, Ordering::SeqCst);
                unsafe { heap.free(p) };
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));
            unsafe { heap.unlock() };
        });
        assert!(done.load(Ordering::SeqCst));
    }
}
