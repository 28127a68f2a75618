//! "Is the heap ready to take requests?" The answer belongs to whoever owns
//! the heap backend, the facade only ever reads it.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait Readiness: Sync {
    fn is_ready(&self) -> bool;
}

/// A flag flipped by the heap's owner
pub struct ReadyFlag(AtomicBool);

impl ReadyFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn set_not_ready(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness for ReadyFlag {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The heap is usable from the very start
pub struct AlwaysReady;

impl Readiness for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Every request is served from the bootstrap region
pub struct NeverReady;

impl Readiness for NeverReady {
    fn is_ready(&self) -> bool {
        false
    }
}

impl Readiness for fn() -> bool {
    fn is_ready(&self) -> bool {
        self()
    }
}

impl<R> Readiness for &R
where
    R: Readiness,
{
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::{AlwaysReady, NeverReady, ReadyFlag, Readiness};

    #[test]
    fn flag_starts_not_ready_and_flips() {
        let flag = ReadyFlag::new();
        assert!(!flag.is_ready());
        flag.set_ready();
        assert!((&flag).is_ready());
        flag.set_not_ready();
        assert!(!flag.is_ready());
    }

    #[test]
    fn fixed_answers() {
        assert!(AlwaysReady.is_ready());
        assert!(!NeverReady.is_ready());
        let f: fn() -> bool = || true;
        assert!(f.is_ready());
    }
}
