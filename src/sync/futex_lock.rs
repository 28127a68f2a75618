use std::sync::atomic::{fence, Ordering};

use linux_futex::{Futex, Private};

/// This futex represents a lock and is unlocked
const FUTEX_UNLOCKED: u32 = 0;

/// This futex represents a lock and is locked, with nobody waiting on it
const FUTEX_LOCKED: u32 = 1;

/// This futex represents a lock and is locked, and somebody may be asleep on
/// it, so `unlock()` has to wake them
const FUTEX_CONTENDED: u32 = 2;

/// A raw lock on a single futex word. Unlike `std::sync::Mutex`, there is no
/// owner and no guard is required to release it, which is what lets the fork
/// hooks take the lock in one call and release it in another (in the child,
/// even).
///
/// Never allocates.
pub struct FutexLock {
    word: Futex<Private>,
}

impl FutexLock {
    pub const fn new() -> Self {
        Self {
            word: Futex::new(FUTEX_UNLOCKED),
        }
    }

    /// Attempt to take the lock without waiting. It is **not sound** to
    /// assume you have the lock unless `true` is returned.
    pub fn try_lock(&self) -> bool {
        if self
            .word
            .value
            .compare_exchange(
                FUTEX_UNLOCKED,
                FUTEX_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Take the lock, sleeping on the futex while somebody else holds it.
    /// Taking the lock twice on the same thread deadlocks.
    pub fn lock(&self) {
        // Fast path should stay in userspace!
        if self.try_lock() {
            return;
        }
        // Mark the word contended before sleeping, so whoever holds the lock
        // knows to wake us. `wait()` returns straight away if the word has
        // changed under us.
        while self.word.value.swap(FUTEX_CONTENDED, Ordering::Acquire) != FUTEX_UNLOCKED {
            _ = self.word.wait(FUTEX_CONTENDED);
        }
        fence(Ordering::Acquire);
    }

    /// # Safety
    ///
    /// The lock must be held, by this thread or (after `fork()`) by the thread
    /// this one was forked from.
    pub unsafe fn unlock(&self) {
        fence(Ordering::Release);
        if self.word.value.swap(FUTEX_UNLOCKED, Ordering::Release) == FUTEX_CONTENDED {
            self.word.wake(1);
        }
    }

    /// Take the lock and release it when the guard is dropped
    pub fn guard(&self) -> FutexLockGuard<'_> {
        self.lock();
        FutexLockGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.word.value.load(Ordering::Acquire) != FUTEX_UNLOCKED
    }
}

impl Default for FutexLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for [`FutexLock`]. `Drop` impl releases the lock
pub struct FutexLockGuard<'a> {
    lock: &'a FutexLock,
}

impl Drop for FutexLockGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: a guard only exists while its lock is held
        unsafe { self.lock.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use super::FutexLock;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = FutexLock::new();
        assert!(lock.try_lock());
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = FutexLock::new();
        {
            let _guard = lock.guard();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn lock_can_be_released_from_another_call_site() {
        let lock = FutexLock::new();
        let entered = AtomicBool::new(false);
        lock.lock();
        thread::scope(|s| {
            s.spawn(|| {
                let _guard = lock.guard();
                entered.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!entered.load(Ordering::SeqCst));
            unsafe { lock.unlock() };
        });
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn lock_is_mutually_exclusive() {
        let lock = FutexLock::new();
        let inside = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let _guard = lock.guard();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(total.load(Ordering::Relaxed), 8000);
    }
}
