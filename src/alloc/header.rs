use std::mem;

use crate::config::MIN_ALIGN;

/// Bookkeeping in front of every pointer the facade hands out from the heap.
/// Bootstrap blocks don't get one, the region records their size itself.
///
/// ```plaintext
/// +--------------------+ <- block start
/// | padding...         |
/// | BlockHeader        | offset bytes, in total
/// +--------------------+ <- pointer handed out (aligned)
/// | requested size     | size bytes
/// .                    .
/// ```
///
/// For plain allocations there is no padding and `offset` is just the header.
/// `aligned_allocate()` pads until the pointer is aligned, and `offset` is
/// how `release()`/`usable_size()` find their way back to the block start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct BlockHeader {
    /// Bytes from the start of the underlying block to the user pointer
    pub offset: usize,
    /// The exact requested size of this allocation
    pub size: usize,
}

pub const HEADER_SIZE: usize = MIN_ALIGN;

const _: () = assert!(mem::size_of::<BlockHeader>() <= HEADER_SIZE);
const _: () = assert!(HEADER_SIZE % mem::align_of::<BlockHeader>() == 0);

impl BlockHeader {
    /// Bytes needed from the backing allocator so that an `align`-aligned
    /// pointer with `size` bytes after it fits, given that the block itself
    /// starts `MIN_ALIGN`-aligned.
    pub fn aligned_block_size(size: usize, align: usize) -> Option<usize> {
        size.checked_add(HEADER_SIZE)?
            .checked_add(align.saturating_sub(MIN_ALIGN))
    }

    /// # Safety
    ///
    /// - `data` must be at least `HEADER_SIZE` bytes into its block, and
    ///   `HEADER_SIZE`-aligned
    pub unsafe fn write(data: *mut u8, header: BlockHeader) {
        unsafe { (data.sub(HEADER_SIZE) as *mut BlockHeader).write(header) }
    }

    /// # Safety
    ///
    /// - `data` must have had a header written by [`BlockHeader::write()`]
    pub unsafe fn read(data: *mut u8) -> BlockHeader {
        let header = unsafe { (data.sub(HEADER_SIZE) as *const BlockHeader).read() };
        debug_assert!(header.offset >= HEADER_SIZE);
        header
    }

    /// Where the underlying block for `data` starts
    pub fn block_start(&self, data: *mut u8) -> *mut u8 {
        data.wrapping_sub(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockHeader, HEADER_SIZE};
    use crate::{config::MIN_ALIGN, util::num::align_up};

    #[test]
    fn aligned_block_always_fits() {
        for align in (0..13).map(|shift| 1usize << shift) {
            for size in [0, 1, 31, 4096] {
                let block = BlockHeader::aligned_block_size(size, align).unwrap();
                // Worst case for a MIN_ALIGN-aligned block start
                for start in (0..align.max(MIN_ALIGN)).step_by(MIN_ALIGN) {
                    let data = align_up(start + HEADER_SIZE, align.max(MIN_ALIGN));
                    assert!(data + size <= start + block);
                }
            }
        }
    }

    #[test]
    fn header_round_trips_through_memory() {
        let mut block = [0u128; 4];
        let start = block.as_mut_ptr() as *mut u8;
        let data = start.wrapping_add(2 * HEADER_SIZE);
        let header = BlockHeader {
            offset: 2 * HEADER_SIZE,
            size: 12,
        };
        unsafe { BlockHeader::write(data, header) };
        assert_eq!(unsafe { BlockHeader::read(data) }, header);
        assert_eq!(header.block_start(data), start);
    }

    #[test]
    fn sizes_overflow_cleanly() {
        assert_eq!(BlockHeader::aligned_block_size(usize::MAX, MIN_ALIGN), None);
        assert_eq!(BlockHeader::aligned_block_size(usize::MAX - HEADER_SIZE, 64), None);
    }
}
