//! Printing that never touches the allocator. Everything here ends up in a
//! single `write(2)` on stderr per piece, so it is fine to call from inside
//! `allocate()` or while the backend lock is held.

use std::ffi::CStr;

const STDERR: libc::c_int = 2;

const HEX_LEN: usize = 2 + 2 * std::mem::size_of::<usize>();

fn write_all(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a live slice, and `write()` only reads from it.
        let n = unsafe { libc::write(STDERR, bytes.as_ptr() as _, bytes.len()) };
        if n <= 0 {
            // Nowhere to report this, stderr is gone
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// Something that can be written by [`put!`] without allocating
pub trait Put {
    fn put(self);
}

impl Put for &str {
    fn put(self) {
        write_all(self.as_bytes());
    }
}

impl Put for &CStr {
    fn put(self) {
        write_all(self.to_bytes());
    }
}

/// Format `n` in decimal into the tail of `buf`
fn decimal(mut n: usize, buf: &mut [u8; 20]) -> &[u8] {
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[i..]
}

/// Format `n` as `0x...` into the tail of `buf`
fn hex(mut n: usize, buf: &mut [u8; HEX_LEN]) -> &[u8] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = DIGITS[n & 0xf];
        n >>= 4;
        if n == 0 {
            break;
        }
    }
    buf[i - 1] = b'x';
    buf[i - 2] = b'0';
    &buf[i - 2..]
}

impl Put for usize {
    fn put(self) {
        write_all(decimal(self, &mut [0; 20]));
    }
}

impl Put for bool {
    fn put(self) {
        write_all(if self { b"true".as_slice() } else { b"false" });
    }
}

impl<T> Put for *mut T {
    fn put(self) {
        write_all(hex(self as *const u8 as usize, &mut [0; HEX_LEN]));
    }
}

impl<T> Put for *const T {
    fn put(self) {
        write_all(hex(self as *const u8 as usize, &mut [0; HEX_LEN]));
    }
}

/// Write each argument to stderr, without allocating
#[macro_export]
macro_rules! put {
    ($($arg:expr),* $(,)?) => {{
        $( $crate::util::print::Put::put($arg); )*
    }};
}

/// [`put!`] followed by a newline
#[macro_export]
macro_rules! putln {
    ($($arg:expr),* $(,)?) => {{
        $crate::put!($($arg,)* "\n");
    }};
}

/// [`putln!`] when built with the `trace` feature, nothing otherwise. The
/// arguments are still type checked either way.
#[macro_export]
macro_rules! trace {
    ($($arg:expr),* $(,)?) => {{
        if cfg!(feature = "trace") {
            $crate::putln!("hopeful: ", $($arg,)*);
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::{decimal, hex, HEX_LEN};

    #[test]
    fn decimal_formats_without_allocating() {
        assert_eq!(decimal(0, &mut [0; 20]), b"0");
        assert_eq!(decimal(1024, &mut [0; 20]), b"1024");
        assert_eq!(decimal(usize::MAX, &mut [0; 20]), usize::MAX.to_string().as_bytes());
    }

    #[test]
    fn hex_formats_pointers() {
        assert_eq!(hex(0, &mut [0; HEX_LEN]), b"0x0");
        assert_eq!(hex(0xdead_beef, &mut [0; HEX_LEN]), b"0xdeadbeef");
        assert_eq!(hex(usize::MAX, &mut [0; HEX_LEN]), format!("{:#x}", usize::MAX).as_bytes());
    }
}
