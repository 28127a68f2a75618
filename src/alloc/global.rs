//! The process-wide facade, and the bits that wire it into a process:
//! `#[global_allocator]` support, the readiness flag and the fork hooks.
//!
//! Nothing here runs by itself. Whoever embeds the allocator calls
//! [`install_fork_hooks()`] and, once the process is far enough along,
//! [`mark_ready()`].

use std::{
    alloc::{GlobalAlloc, Layout},
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    alloc::{dlmalloc::DlHeap, facade::Facade, readiness::ReadyFlag},
    config::BOOTSTRAP_CAPACITY,
    trace,
};

/// Flipped once the process is far enough along that the heap may be built.
/// Until then everything is served from the bootstrap region.
pub static HEAP_READY: ReadyFlag = ReadyFlag::new();

pub type GlobalFacade = Facade<DlHeap, &'static ReadyFlag, BOOTSTRAP_CAPACITY>;

/// The one facade for the whole process
pub static FACADE: GlobalFacade = Facade::new(DlHeap::new, &HEAP_READY);

/// Let the heap take requests from now on
pub fn mark_ready() {
    trace!("mark_ready()");
    HEAP_READY.set_ready();
}

extern "C" fn prepare_fork() {
    FACADE.lock_hook();
}

extern "C" fn after_fork() {
    FACADE.unlock_hook();
}

static FORK_HOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Register the facade's lock/unlock hooks around every `fork()`: lock in the
/// prepare handler, unlock in both the parent and the child handler. Only
/// registers once, however many times it is called.
pub fn install_fork_hooks() -> io::Result<()> {
    if FORK_HOOKS_INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    // SAFETY: the handlers are plain `extern "C"` functions with static
    // lifetime, and they don't unwind
    let rc = unsafe { libc::pthread_atfork(Some(prepare_fork), Some(after_fork), Some(after_fork)) };
    if rc != 0 {
        FORK_HOOKS_INSTALLED.store(false, Ordering::Release);
        return Err(io::Error::from_raw_os_error(rc));
    }
    trace!("fork hooks installed");
    Ok(())
}

/// Use the process-wide facade as the Rust global allocator:
///
/// ```no_run
/// #[global_allocator]
/// static GLOBAL: hopeful::HopefulAlloc = hopeful::HopefulAlloc;
///
/// fn main() {
///     hopeful::install_fork_hooks().unwrap();
///     hopeful::mark_ready();
/// }
/// ```
pub struct HopefulAlloc;

unsafe impl GlobalAlloc for HopefulAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: identical contract to caller
        unsafe { FACADE.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: identical contract to caller
        unsafe { FACADE.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: identical contract to caller
        unsafe { FACADE.realloc(ptr, layout, new_size) }
    }
}
