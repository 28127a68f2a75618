//! The fatal allocator fault path.
//!
//! Nothing in here returns. A caller of `malloc()` is not going to check for
//! null, so once the facade cannot hand out memory it can trust, the process
//! stops instead. There is no unwinding either: `abort()` can't be caught.

use std::fmt;

use crate::{put, putln};

/// The bootstrap region could not fit a request. The region's cursor is left
/// where it was.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootstrapExhausted {
    /// Bytes the request would have consumed (after rounding)
    pub requested: usize,
    /// Where the cursor was when the request failed
    pub cursor: usize,
    pub capacity: usize,
}

impl fmt::Display for BootstrapExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bootstrap region exhausted (requested {} bytes at cursor {}, capacity {})",
            self.requested, self.cursor, self.capacity
        )
    }
}

impl std::error::Error for BootstrapExhausted {}

/// Everything that takes the process down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Cumulative demand before the heap was ready outgrew the bootstrap
    /// region
    BootstrapExhausted(BootstrapExhausted),
    /// The ready heap returned null
    BackendAllocationFailure { size: usize },
    /// `size` plus the block header does not fit in a `usize`
    SizeOverflow { size: usize },
    /// The heap constructor unwound, so the heap will never exist
    HeapConstructorPanicked,
    /// The heap cell's state word holds something that isn't a state
    CorruptCellState { state: u32 },
}

impl From<BootstrapExhausted> for Fault {
    fn from(e: BootstrapExhausted) -> Self {
        Fault::BootstrapExhausted(e)
    }
}

impl Fault {
    /// Write the reason to stderr. `Display` would be nicer, but `fmt` may
    /// allocate and the allocator is exactly what is broken right now.
    fn report(&self) {
        put!("hopeful: INTERNAL FAILURE: ");
        match *self {
            Fault::BootstrapExhausted(BootstrapExhausted {
                requested,
                cursor,
                capacity,
            }) => putln!(
                "bootstrap region exhausted (requested ",
                requested,
                " bytes at cursor ",
                cursor,
                ", capacity ",
                capacity,
                ")"
            ),
            Fault::BackendAllocationFailure { size } => {
                putln!("heap returned null for ", size, " bytes")
            }
            Fault::SizeOverflow { size } => {
                putln!("allocation size ", size, " overflows")
            }
            Fault::HeapConstructorPanicked => putln!("heap constructor panicked"),
            Fault::CorruptCellState { state } => {
                putln!("heap cell state word is ", state as usize)
            }
        }
    }
}

/// Report `fault` and terminate the process immediately
#[cold]
#[inline(never)]
pub fn fatal(fault: Fault) -> ! {
    fault.report();
    // SAFETY: `abort()` has no preconditions
    unsafe { libc::abort() }
}

#[cfg(test)]
mod tests {
    use super::{BootstrapExhausted, Fault};

    #[test]
    fn bootstrap_exhaustion_converts_into_a_fault() {
        let e = BootstrapExhausted {
            requested: 304,
            cursor: 800,
            capacity: 1024,
        };
        assert_eq!(Fault::from(e), Fault::BootstrapExhausted(e));
        assert_eq!(
            e.to_string(),
            "bootstrap region exhausted (requested 304 bytes at cursor 800, capacity 1024)"
        );
    }
}
