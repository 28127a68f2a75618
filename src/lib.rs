//! A global allocator facade that can be installed before its heap exists.
//!
//! Requests that arrive before the heap reports ready (static initializers
//! of other libraries, say) are carved out of a fixed bootstrap region, and
//! everything after goes to a lazily built heap singleton. Anything that
//! can't be satisfied is fatal: the process aborts rather than handing a
//! null pointer to code that won't check for it.
//!
//! ```no_run
//! #[global_allocator]
//! static GLOBAL: hopeful::HopefulAlloc = hopeful::HopefulAlloc;
//!
//! fn main() {}
//! ```

#![cfg_attr(feature = "nightly", feature(allocator_api))]

pub mod alloc;
pub mod config;
pub mod externc;
pub mod heap_cell;
pub mod sync;
pub mod util;

pub use alloc::{
    bootstrap::BootstrapRegion,
    dlmalloc::DlHeap,
    facade::{Facade, FacadeStats},
    fault::{fatal, BootstrapExhausted, Fault},
    global::{install_fork_hooks, mark_ready, GlobalFacade, HopefulAlloc, FACADE, HEAP_READY},
    heap::Heap,
    readiness::{AlwaysReady, NeverReady, ReadyFlag, Readiness},
};
pub use heap_cell::{CellState, HeapCell};
