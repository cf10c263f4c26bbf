use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockHeader, BlockOffset},
    config::{ALIGNMENT, MIN_ALLOCATION_SIZE},
    pool::POOL_HEADER_SIZE,
};

/// Bounds-checked view over the raw bytes of one pool reservation.
///
/// Blocks never hold raw pointers to each other, only [`BlockOffset`]s, and
/// every offset goes through here before it is dereferenced. An offset that
/// is misaligned or would put a header past the end of the reservation means
/// the heap is corrupted, and that is fatal.
///
/// ```text
/// base                                                         base + len
/// +-----------+--------+---------+--------+---------+--------+---------+
/// | Node<Pool>| Header | Payload | Header | Payload | Header | Payload |
/// +-----------+--------+---------+--------+---------+--------+---------+
///             ^ POOL_HEADER_SIZE ^ BlockOffset + BLOCK_HEADER_SIZE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    /// Start of the reservation, as returned by the OS.
    base: NonNull<u8>,
    /// Size of the whole reservation.
    len: usize,
}

impl Region {
    pub const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Offset of the first block, right after the pool header.
    #[inline]
    pub fn first_block(&self) -> BlockOffset {
        self.offset(POOL_HEADER_SIZE)
    }

    /// Builds an offset known to be valid for this region.
    #[inline]
    pub fn offset(&self, offset: usize) -> BlockOffset {
        match BlockOffset::new(offset) {
            Some(offset) if self.is_valid(offset) => offset,
            _ => invalid(self, offset),
        }
    }

    /// Whether a block header (plus the smallest payload) fits at `offset`.
    #[inline]
    pub fn is_valid(&self, offset: BlockOffset) -> bool {
        let offset = offset.get();

        offset >= POOL_HEADER_SIZE
            && offset % ALIGNMENT == 0
            && offset
                .checked_add(BLOCK_HEADER_SIZE + MIN_ALLOCATION_SIZE)
                .is_some_and(|end| end <= self.len)
    }

    /// Header of the block at `offset`.
    #[inline]
    pub fn header(&self, offset: BlockOffset) -> NonNull<BlockHeader> {
        if !self.is_valid(offset) {
            invalid(self, offset.get());
        }

        unsafe { self.base.add(offset.get()).cast() }
    }

    /// First payload byte of the block at `offset`.
    #[inline]
    pub fn payload(&self, offset: BlockOffset) -> NonNull<u8> {
        unsafe { self.header(offset).cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Whether `ptr` points inside this reservation.
    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;

        addr >= start && addr - start < self.len
    }

    /// Maps a payload pointer back to the offset of its header. Returns `None`
    /// if `ptr` cannot be the payload of any block in this region.
    pub fn block_of_payload(&self, ptr: NonNull<u8>) -> Option<BlockOffset> {
        if !self.contains(ptr) {
            return None;
        }

        let offset = (ptr.as_ptr() as usize - self.base.as_ptr() as usize)
            .checked_sub(BLOCK_HEADER_SIZE)?;

        BlockOffset::new(offset).filter(|offset| self.is_valid(*offset))
    }
}

#[cold]
#[track_caller]
fn invalid(region: &Region, offset: usize) -> ! {
    panic!(
        "block offset {offset:#x} is outside pool {:p} ({} bytes)",
        region.base, region.len
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Aligned stand-in for a reservation.
    #[repr(C, align(4096))]
    struct Backing([u8; 4096]);

    fn region(backing: &mut Backing) -> Region {
        Region::new(NonNull::from(&mut backing.0).cast(), 4096)
    }

    #[test]
    fn first_block_follows_pool_header() {
        let mut backing = Backing([0; 4096]);
        let region = region(&mut backing);

        assert_eq!(POOL_HEADER_SIZE, region.first_block().get());
        assert_eq!(0, POOL_HEADER_SIZE % ALIGNMENT);
    }

    #[test]
    fn validity() {
        let mut backing = Backing([0; 4096]);
        let region = region(&mut backing);

        let valid = |offset| BlockOffset::new(offset).is_some_and(|o| region.is_valid(o));

        assert!(valid(POOL_HEADER_SIZE));
        assert!(valid(POOL_HEADER_SIZE + ALIGNMENT));
        assert!(!valid(POOL_HEADER_SIZE + 1));
        assert!(!valid(POOL_HEADER_SIZE - ALIGNMENT));
        assert!(valid(4096 - BLOCK_HEADER_SIZE - MIN_ALLOCATION_SIZE));
        assert!(!valid(4096 - BLOCK_HEADER_SIZE));
    }

    #[test]
    fn payload_round_trip() {
        let mut backing = Backing([0; 4096]);
        let region = region(&mut backing);

        let offset = region.offset(POOL_HEADER_SIZE + 2 * ALIGNMENT);
        let payload = region.payload(offset);

        assert_eq!(0, payload.as_ptr() as usize % ALIGNMENT);
        assert_eq!(Some(offset), region.block_of_payload(payload));
        assert_eq!(None, region.block_of_payload(unsafe { payload.add(1) }));
        assert_eq!(None, region.block_of_payload(region.base()));
    }

    #[test]
    #[should_panic(expected = "outside pool")]
    fn offset_past_the_end_is_fatal() {
        let mut backing = Backing([0; 4096]);
        let region = region(&mut backing);

        region.offset(4096);
    }
}
