pub mod num;
pub mod print;

/// Call `f` on a path the optimizer should keep out of the way
#[cold]
#[inline(never)]
pub fn cold<R, F: FnOnce() -> R>(f: F) -> R {
    f()
}

#[cfg(test)]
pub mod testing;
