//! The C ABI of the process-wide facade. Whatever intercepts the platform's
//! `malloc()` family (symbol interposition, `--wrap`, a shim library) calls
//! these.

use libc::{c_void, size_t};

use crate::alloc::global::FACADE;

#[no_mangle]
pub extern "C" fn hopeful_malloc(size: size_t) -> *mut c_void {
    FACADE.allocate(size) as _
}

/// # Safety
///
/// `ptr` must be null or come from one of the `hopeful_*` allocation
/// functions, and must not have been freed already
#[no_mangle]
pub unsafe extern "C" fn hopeful_free(ptr: *mut c_void) {
    unsafe { FACADE.release(ptr as _) }
}

#[no_mangle]
pub extern "C" fn hopeful_memalign(alignment: size_t, size: size_t) -> *mut c_void {
    FACADE.aligned_allocate(alignment, size) as _
}

/// # Safety
///
/// Same as [`hopeful_free()`]
#[no_mangle]
pub unsafe extern "C" fn hopeful_malloc_usable_size(ptr: *mut c_void) -> size_t {
    unsafe { FACADE.usable_size(ptr as _) }
}

#[no_mangle]
pub extern "C" fn hopeful_calloc(count: size_t, size: size_t) -> *mut c_void {
    FACADE.allocate_zeroed(count, size) as _
}

/// # Safety
///
/// Same as [`hopeful_free()`]
#[no_mangle]
pub unsafe extern "C" fn hopeful_realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    unsafe { FACADE.reallocate(ptr as _, size) as _ }
}

/// Call right before `fork()`
#[no_mangle]
pub extern "C" fn hopeful_malloc_lock() {
    FACADE.lock_hook();
}

/// Call right after `fork()`, in the parent and in the child
#[no_mangle]
pub extern "C" fn hopeful_malloc_unlock() {
    FACADE.unlock_hook();
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;
    use crate::util::num::is_aligned;

    #[test]
    fn c_entry_points_round_trip() {
        unsafe {
            let p = hopeful_malloc(40);
            assert!(!p.is_null());
            assert!(hopeful_malloc_usable_size(p) >= 40);
            let p = hopeful_realloc(p, 4000);
            assert!(hopeful_malloc_usable_size(p) >= 4000);
            hopeful_free(p);

            let z = hopeful_calloc(10, 10) as *mut u8;
            assert!(std::slice::from_raw_parts(z, 100).iter().all(|&b| b == 0));
            hopeful_free(z as _);

            let a = hopeful_memalign(1 << 12, 10);
            assert!(is_aligned(a, 1 << 12));
            hopeful_free(a);
            assert!(hopeful_memalign(3, 10).is_null());

            hopeful_free(ptr::null_mut());
            assert_eq!(hopeful_malloc_usable_size(ptr::null_mut()), 0);
        }
    }

    #[test]
    fn lock_unlock_pair() {
        hopeful_malloc_lock();
        hopeful_malloc_unlock();
        let p = hopeful_malloc(1);
        unsafe { hopeful_free(p) };
    }
}
