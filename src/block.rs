use std::{num::NonZeroUsize, ptr::NonNull};

use bitflags::bitflags;

use crate::{config::ALIGNMENT, list::Node, pool::Pool};

/// Header size of a block. The header is aligned to [`ALIGNMENT`] so its size
/// is already a multiple of it and the payload right after it is aligned too.
pub(crate) const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(BLOCK_HEADER_SIZE % ALIGNMENT == 0);

/// Position of a block header, in bytes from the start of the reservation of
/// the pool that owns it. The pool header always sits at offset zero, so a
/// block offset is never zero and `Option<BlockOffset>` costs nothing extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BlockOffset(NonZeroUsize);

impl BlockOffset {
    #[inline]
    pub const fn new(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// Offset of the first byte after the payload of a block of `size` bytes.
    #[inline]
    pub const fn end(self, size: usize) -> usize {
        self.get() + BLOCK_HEADER_SIZE + size
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BlockFlags: u64 {
        /// Block is handed out to a caller.
        const OCCUPIED = 1 << 0;
        /// Block may be merged with its neighbours. Only blocks of dedicated
        /// large pools lack it.
        const COALESCABLE = 1 << 1;
    }
}

/// Placed at the front of every block, free or occupied.
///
/// `left` and `right` thread every block of a pool in address order, which is
/// what lets a freed block find the neighbours it can merge with.
///
/// ```text
/// +---------------------+ <------+
/// |        flags        |        |
/// +---------------------+        |
/// |     left, right     |        | -> Header (BLOCK_HEADER_SIZE)
/// +---------------------+        |
/// |   pool  |   size    |        |
/// +---------------------+ <------+ <- pointer handed to the caller
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes
/// +---------------------+ <------+ <- next block header (`right`)
/// ```
#[repr(C, align(32))]
pub(crate) struct BlockHeader {
    pub flags: BlockFlags,
    /// Block right before this one in memory.
    pub left: Option<BlockOffset>,
    /// Block right after this one in memory.
    pub right: Option<BlockOffset>,
    /// Pool which the block belongs to.
    pub pool: NonNull<Node<Pool>>,
    /// Payload size, header excluded.
    pub size: usize,
}

impl BlockHeader {
    /// A free, coalescable block with no neighbours.
    pub fn free(pool: NonNull<Node<Pool>>, size: usize) -> Self {
        Self {
            flags: BlockFlags::COALESCABLE,
            left: None,
            right: None,
            pool,
            size,
        }
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.flags.contains(BlockFlags::OCCUPIED)
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        !self.is_occupied()
    }

    #[inline]
    pub fn is_coalescable(&self) -> bool {
        self.flags.contains(BlockFlags::COALESCABLE)
    }

    /// Free and allowed to merge.
    #[inline]
    pub fn can_merge(&self) -> bool {
        self.is_free() && self.is_coalescable()
    }
}
