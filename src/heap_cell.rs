use std::{
    cell::UnsafeCell,
    mem::{self, MaybeUninit},
    sync::atomic::{AtomicUsize, Ordering},
};

use linux_futex::{Futex, Private};

use crate::{
    alloc::fault::{fatal, Fault},
    trace,
    util::cold,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CellState {
    /// Signifies this cell is uninitialized
    Uninit = 0,
    /// Signifies this cell is mid initialization. This is only really useful
    /// when checking the state from inside the initializer...
    Initializing = 1,
    /// Signifies this cell is initialized
    Init = 2,
}

impl CellState {
    fn from_u32(state: u32) -> Self {
        match state {
            0 => CellState::Uninit,
            1 => CellState::Initializing,
            2 => CellState::Init,
            state => fatal(Fault::CorruptCellState { state }),
        }
    }
}

/// Takes the process down if dropped, which only happens if `init` unwinds
/// past it. Waiters would otherwise sleep on `Initializing` forever.
struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        fatal(Fault::HeapConstructorPanicked);
    }
}

fn current_thread_id() -> usize {
    // SAFETY: `pthread_self()` has no preconditions and does not allocate
    unsafe { libc::pthread_self() as usize }
}

/// Static storage for exactly one `T`, built by `init` the first time
/// anybody asks for it and never dropped.
///
/// Construction happens in place, inside the cell, so building the heap
/// does not itself need a working allocator. Unlike `std::sync::OnceLock`
/// you can poll the state (including mid-init), and ask whether the current
/// thread is the one running `init`.
pub struct HeapCell<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
    state: Futex<Private>,
    /// `pthread_self()` of the thread running `init`, 0 otherwise
    initializer: AtomicUsize,
    init: fn() -> T,
}

// SAFETY: `cell` is written exactly once, by the thread that wins the
// `Uninit -> Initializing` CAS, and only read after `Init` is published with
// release ordering. After that it is only handed out as `&T`.
unsafe impl<T> Sync for HeapCell<T> where T: Sync + Send {}

impl<T> HeapCell<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            cell: UnsafeCell::new(MaybeUninit::uninit()),
            state: Futex::new(CellState::Uninit as u32),
            initializer: AtomicUsize::new(0),
            init,
        }
    }

    pub fn state(&self) -> CellState {
        CellState::from_u32(self.state.value.load(Ordering::Acquire))
    }

    /// Is the current thread inside `init` right now? If it is, anything it
    /// asks of this cell would wait on itself forever.
    pub fn is_initializing_on_current_thread(&self) -> bool {
        self.state() == CellState::Initializing
            && self.initializer.load(Ordering::Acquire) == current_thread_id()
    }

    /// # Safety
    ///
    /// The cell must be [`CellState::Init`]
    pub unsafe fn assume_init(&self) -> &T {
        unsafe { (*self.cell.get()).assume_init_ref() }
    }

    /// The value, if it has been built already. Never builds it.
    pub fn get_if_init(&self) -> Option<&T> {
        if self.state() == CellState::Init {
            // SAFETY: just checked, and `Init` is never left
            Some(unsafe { self.assume_init() })
        } else {
            None
        }
    }

    /// The value, building it first if nobody has yet. Every call, on every
    /// thread, returns the same instance, and `init` runs exactly once.
    ///
    /// Calling this from inside `init` deadlocks, check
    /// [`HeapCell::is_initializing_on_current_thread()`] first. If `init`
    /// panics the process aborts.
    pub fn get(&self) -> &T {
        if let Some(value) = self.get_if_init() {
            return value;
        }
        cold(|| self.initialize());
        // SAFETY: `initialize()` only returns once the state is `Init`
        unsafe { self.assume_init() }
    }

    fn initialize(&self) {
        let won = self
            .state
            .value
            .compare_exchange(
                CellState::Uninit as u32,
                CellState::Initializing as u32,
                Ordering::Acquire,
                Ordering::Acquire,
            )
            .is_ok();

        if won {
            trace!("constructing heap");
            self.initializer
                .store(current_thread_id(), Ordering::Release);
            let guard = AbortOnUnwind;
            let value = (self.init)();
            mem::forget(guard);
            // SAFETY: we won the CAS, so we are the only writer and nobody
            // reads until we publish `Init` below
            unsafe { (*self.cell.get()).write(value) };
            self.initializer.store(0, Ordering::Release);
            self.state
                .value
                .store(CellState::Init as u32, Ordering::Release);
            self.state.wake(i32::MAX);
            trace!("heap ready");
            return;
        }

        // Somebody else is building it, sleep until they publish
        while self.state.value.load(Ordering::Acquire) != CellState::Init as u32 {
            _ = self.state.wait(CellState::Initializing as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use super::{CellState, HeapCell};
    use crate::util::testing::aborts_in_child;

    static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

    fn slow_counted() -> usize {
        CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        42
    }

    static SHARED: HeapCell<usize> = HeapCell::new(slow_counted);

    #[test]
    fn every_thread_sees_one_instance() {
        let addrs: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| SHARED.get() as *const usize as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(addrs[0], SHARED.get() as *const usize as usize);
        assert_eq!(*SHARED.get(), 42);
        assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst), 1);
        assert_eq!(SHARED.state(), CellState::Init);
    }

    #[test]
    fn get_if_init_never_builds() {
        static CELL: HeapCell<u64> = HeapCell::new(|| 7);
        assert_eq!(CELL.state(), CellState::Uninit);
        assert!(CELL.get_if_init().is_none());
        assert_eq!(CELL.state(), CellState::Uninit);
        assert_eq!(*CELL.get(), 7);
        assert_eq!(CELL.get_if_init(), Some(&7));
    }

    static SAW_OWN_INIT: AtomicBool = AtomicBool::new(false);

    fn peeks_at_itself() -> u8 {
        SAW_OWN_INIT.store(SELF_AWARE.is_initializing_on_current_thread(), Ordering::SeqCst);
        assert_eq!(SELF_AWARE.state(), CellState::Initializing);
        1
    }

    static SELF_AWARE: HeapCell<u8> = HeapCell::new(peeks_at_itself);

    #[test]
    fn initializer_can_tell_it_is_initializing() {
        assert!(!SELF_AWARE.is_initializing_on_current_thread());
        SELF_AWARE.get();
        assert!(SAW_OWN_INIT.load(Ordering::SeqCst));
        assert!(!SELF_AWARE.is_initializing_on_current_thread());
    }

    fn panics() -> u32 {
        panic!("no heap for you")
    }

    #[test]
    fn panicking_initializer_aborts() {
        static CELL: HeapCell<u32> = HeapCell::new(panics);
        assert!(aborts_in_child(|| {
            CELL.get();
        }));
        assert_eq!(CELL.state(), CellState::Uninit);
    }

    #[test]
    fn corrupt_state_word_aborts() {
        static CELL: HeapCell<u32> = HeapCell::new(|| 3);
        assert!(aborts_in_child(|| {
            CELL.state.value.store(7, Ordering::SeqCst);
            CELL.get_if_init();
        }));
        assert_eq!(CELL.get_if_init(), None);
        assert_eq!(*CELL.get(), 3);
    }
}
