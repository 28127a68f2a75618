/// The heap backend the facade routes to once it is ready. The facade knows
/// nothing about how a `Heap` manages its memory or its own locking.
///
/// # Safety
///
/// - `malloc()` must return either null or a pointer to at least `size`
///   writable bytes, aligned to at least [`MIN_ALIGN`], not overlapping any
///   other live block.
/// - `usable_size()` must report at least the size that was asked for.
/// - After `lock()` returns, no other thread may be inside (or get inside)
///   `malloc()`/`free()` until `unlock()`.
///
/// [`MIN_ALIGN`]: crate::config::MIN_ALIGN
pub unsafe trait Heap: Sync {
    /// Allocate `size` bytes, null if that is not possible
    fn malloc(&self, size: usize) -> *mut u8;

    /// # Safety
    ///
    /// `ptr` must have come from `self.malloc()` and not been freed since
    unsafe fn free(&self, ptr: *mut u8);

    /// # Safety
    ///
    /// Same as [`Heap::free()`]
    unsafe fn usable_size(&self, ptr: *mut u8) -> usize;

    /// Hold every internal lock, so that the address space can be duplicated
    /// without another thread being mid-mutation. A heap with no internal
    /// locking leaves this as a no-op.
    fn lock(&self) {}

    /// Release everything `lock()` took
    ///
    /// # Safety
    ///
    /// Must pair with a previous `lock()` (possibly in the parent process)
    unsafe fn unlock(&self) {}
}
