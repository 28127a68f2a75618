/// Round up `n` to the nearest `to`, `None` on overflow
pub fn round_up(n: usize, to: usize) -> Option<usize> {
    Some(to * n.checked_add(to - 1)?.checked_div(to)?)
}

/// Round `addr` up to `align`, which must be a power of two
pub const fn align_up(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

/// Is `ptr` a multiple of `align` (a power of two)?
pub fn is_aligned<T>(ptr: *mut T, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    ptr as usize & (align - 1) == 0
}
