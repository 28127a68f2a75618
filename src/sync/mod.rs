mod futex_lock;

pub use futex_lock::{FutexLock, FutexLockGuard};
