use std::{marker::PhantomData, ptr::NonNull};

use log::trace;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockFlags, BlockHeader, BlockOffset},
    config::MIN_ALLOCATION_SIZE,
    error::AllocError,
    freelist::FreeList,
    list::Node,
    region::Region,
    utils::round_to_alignment,
};

/// This is the overhead size introduced by the [`Pool`] header in bytes. The
/// header is stored as a [`Node<Pool>`] at the very start of the reservation,
/// and the first block starts at the next aligned offset.
pub(crate) const POOL_HEADER_SIZE: usize = round_to_alignment(size_of::<Node<Pool>>());

/// Smallest remainder worth splitting off a block as a new free block.
const MIN_SPLIT: usize = BLOCK_HEADER_SIZE + MIN_ALLOCATION_SIZE;

/// Pool descriptor: one contiguous reservation obtained from the OS, split
/// into blocks.
///
/// We cannot assume reservations are adjacent, so pools are kept in a
/// [`crate::list::List`] while the blocks inside each pool are threaded by
/// their `left`/`right` offsets.
///
/// ```text
/// +---------------------------------------------+      +----------------------------------------------+
/// |      | +-------+    +-------+    +-------+  |      |      | +-------+    +-------+    +--------+  |
/// | Pool | | Block | <> | Free  | <> | Block |  | ---> | Pool | | Block | <> | Block | <> |  Free  |  |
/// |      | +-------+    +-------+    +-------+  |      |      | +-------+    +-------+    +--------+  |
/// +---------------------------------------------+      +----------------------------------------------+
///                                                                                       ^ tail
/// ```
///
/// The `tail` is the last block of the chain while that block is free. A pool
/// whose last block is occupied is tail-exhausted: fast searches skip it until
/// a release coalesces a free block back into the end of the pool.
pub(crate) struct Pool {
    region: Region,
    /// Bytes claimed by block headers and occupied payloads.
    occupancy: usize,
    /// Dedicated pool of a single large, non-coalescable allocation.
    is_large: bool,
    free_list: FreeList,
    tail: Option<BlockOffset>,
}

impl Pool {
    pub fn new(region: Region, is_large: bool) -> Self {
        Self {
            region,
            occupancy: 0,
            is_large,
            free_list: FreeList::new(),
            tail: None,
        }
    }

    /// Writes the initial free block spanning the whole usable region.
    ///
    /// **SAFETY**: `owner` must be the node this pool lives in, at the start
    /// of `self.region`, and the region must not contain blocks yet.
    pub unsafe fn format(&mut self, owner: NonNull<Node<Pool>>) {
        let first = self.region.first_block();
        let mut header = BlockHeader::free(owner, self.region_size() - BLOCK_HEADER_SIZE);

        if self.is_large {
            header.flags.remove(BlockFlags::COALESCABLE);
        }

        unsafe {
            self.region.header(first).write(header);
            self.free_list.push(&self.region, first);
        }

        self.occupancy = BLOCK_HEADER_SIZE;
        self.tail = Some(first);
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Bytes available to blocks, headers included.
    #[inline]
    pub fn region_size(&self) -> usize {
        self.region.len() - POOL_HEADER_SIZE
    }

    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Sum of the free payloads. Not necessarily contiguous.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.region_size() - self.occupancy
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        self.is_large
    }

    /// Every block has been released and coalesced into a single one.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy == BLOCK_HEADER_SIZE
    }

    #[inline]
    pub fn is_tail_exhausted(&self) -> bool {
        self.tail.is_none()
    }

    /// The tail block, if it can hold `size` bytes.
    pub fn tail_fit(&self, size: usize) -> Option<BlockOffset> {
        let tail = self.tail?;
        let tail_size = unsafe { self.region.header(tail).as_ref().size };

        (tail_size >= size).then_some(tail)
    }

    /// The smallest free block that can hold `size` bytes.
    pub fn best_fit(&self, size: usize) -> Option<BlockOffset> {
        if self.free_bytes() < size {
            return None;
        }

        self.free_list.best_fit(&self.region, size)
    }

    /// Splits the free `block` into an occupied prefix of `size` bytes and a
    /// free suffix with the rest. When the rest could not hold a block on its
    /// own, the whole block is handed out instead. Returns the payload of the
    /// occupied block.
    ///
    /// **SAFETY**: `block` must be a block of this pool and `size` a multiple
    /// of the alignment.
    pub unsafe fn carve(&mut self, block: BlockOffset, size: usize) -> NonNull<u8> {
        let region = self.region;
        let header = unsafe { region.header(block).as_mut() };

        assert!(
            header.is_free() && header.size >= size,
            "block {block:?} chosen for {size} bytes cannot hold them"
        );

        unsafe { self.free_list.remove(&region, block) };

        let remainder = header.size - size;

        if !self.is_large && remainder >= MIN_SPLIT {
            let suffix = region.offset(block.end(size));

            unsafe {
                region.header(suffix).write(BlockHeader {
                    left: Some(block),
                    right: header.right,
                    ..BlockHeader::free(header.pool, remainder - BLOCK_HEADER_SIZE)
                });

                if let Some(right) = header.right {
                    region.header(right).as_mut().left = Some(suffix);
                }

                self.free_list.push(&region, suffix);
            }

            header.right = Some(suffix);
            header.size = size;

            if self.tail == Some(block) {
                self.tail = Some(suffix);
            }

            self.occupancy += size + BLOCK_HEADER_SIZE;
        } else {
            if self.tail == Some(block) {
                self.tail = None;
            }

            self.occupancy += header.size;
        }

        header.flags.insert(BlockFlags::OCCUPIED);

        trace!(
            "carved {} bytes at {:#x} from pool {:p}, occupancy {}",
            header.size,
            block.get(),
            region.base(),
            self.occupancy
        );

        region.payload(block)
    }

    /// Marks the occupied `block` free and merges it with its free
    /// neighbours. Returns the block that holds the freed space afterwards,
    /// which is `block` itself or its left neighbour.
    ///
    /// **SAFETY**: `block` must be a block of this pool.
    pub unsafe fn release(&mut self, block: BlockOffset) -> Result<BlockOffset, AllocError> {
        let region = self.region;
        let header = unsafe { region.header(block).as_mut() };

        if header.is_free() {
            return Err(AllocError::DoubleFree {
                addr: region.payload(block).as_ptr() as usize,
            });
        }

        header.flags.remove(BlockFlags::OCCUPIED);
        self.occupancy -= header.size;

        let merged = if header.is_coalescable() {
            unsafe {
                self.merge_with_right(block);
                self.merge_with_left(block)
            }
        } else {
            block
        };

        // A merge into the left neighbour keeps that neighbour's list entry.
        if merged == block {
            unsafe { self.free_list.push(&region, block) };
        }

        let merged_header = unsafe { region.header(merged).as_ref() };

        if merged_header.right.is_none() {
            self.tail = Some(merged);
        }

        trace!(
            "released {:#x} into {:#x} ({} bytes) in pool {:p}, occupancy {}",
            block.get(),
            merged.get(),
            merged_header.size,
            region.base(),
            self.occupancy
        );

        Ok(merged)
    }

    /// Absorbs the right neighbour of `block` if it is free.
    unsafe fn merge_with_right(&mut self, block: BlockOffset) {
        let region = self.region;
        let header = unsafe { region.header(block).as_mut() };

        let Some(right) = header.right else {
            return;
        };

        let (right_size, right_right) = {
            let right_header = unsafe { region.header(right).as_ref() };

            if !right_header.can_merge() {
                return;
            }

            (right_header.size, right_header.right)
        };

        unsafe { self.free_list.remove(&region, right) };

        // We need to cover the header and the actual content of the block.
        header.size += BLOCK_HEADER_SIZE + right_size;
        header.right = right_right;

        if let Some(next) = right_right {
            unsafe { region.header(next).as_mut().left = Some(block) };
        }

        self.occupancy -= BLOCK_HEADER_SIZE;
    }

    /// Lets the left neighbour of `block` absorb it if that neighbour is
    /// free. Returns whichever block now starts the free span.
    unsafe fn merge_with_left(&mut self, block: BlockOffset) -> BlockOffset {
        let region = self.region;
        let (left, size, right) = {
            let header = unsafe { region.header(block).as_ref() };

            match header.left {
                Some(left) => (left, header.size, header.right),
                None => return block,
            }
        };

        let left_header = unsafe { region.header(left).as_mut() };

        if !left_header.can_merge() {
            return block;
        }

        left_header.size += BLOCK_HEADER_SIZE + size;
        left_header.right = right;

        if let Some(next) = right {
            unsafe { region.header(next).as_mut().left = Some(left) };
        }

        self.occupancy -= BLOCK_HEADER_SIZE;

        left
    }

    /// Walks every block of the pool checking the adjacency chain, the free
    /// list, the tail and the occupancy counter.
    pub fn verify(&self, owner: NonNull<Node<Pool>>) -> Result<(), AllocError> {
        let region = self.region;
        let corrupted = |reason| AllocError::Corruption {
            pool: region.base().as_ptr() as usize,
            reason,
        };

        let mut cursor = Some(region.first_block());
        let mut expected_offset = POOL_HEADER_SIZE;
        let mut expected_left = None;
        let mut last = None;
        let mut previous_mergeable = false;
        let mut claimed = 0;
        let mut free_blocks = 0;

        while let Some(block) = cursor {
            if block.get() != expected_offset {
                return Err(corrupted("blocks are not contiguous"));
            }

            if !region.is_valid(block) {
                return Err(corrupted("block lies outside of the pool"));
            }

            let header = unsafe { region.header(block).as_ref() };

            if header.left != expected_left {
                return Err(corrupted("left link does not point to the previous block"));
            }

            if header.pool != owner {
                return Err(corrupted("block belongs to another pool"));
            }

            claimed += BLOCK_HEADER_SIZE;

            if header.is_free() {
                if previous_mergeable && header.can_merge() {
                    return Err(corrupted("adjacent free blocks were not coalesced"));
                }

                free_blocks += 1;
            } else {
                claimed += header.size;
            }

            previous_mergeable = header.can_merge();
            expected_offset = block
                .get()
                .checked_add(BLOCK_HEADER_SIZE + header.size)
                .ok_or(corrupted("block size overflows"))?;
            expected_left = Some(block);
            last = Some((block, header.is_free()));
            cursor = header.right;
        }

        if expected_offset != region.len() {
            return Err(corrupted("block chain does not cover the pool"));
        }

        if claimed != self.occupancy {
            return Err(corrupted("occupancy does not match the blocks"));
        }

        let listed = self.free_list.iter(region).take(free_blocks + 1);
        let mut listed_count = 0;

        for block in listed {
            if unsafe { region.header(block).as_ref() }.is_occupied() {
                return Err(corrupted("occupied block on the free list"));
            }

            listed_count += 1;
        }

        if listed_count != free_blocks || self.free_list.len() != free_blocks {
            return Err(corrupted("free list does not match the free blocks"));
        }

        let expected_tail = last.and_then(|(block, free)| free.then_some(block));

        if self.tail != expected_tail {
            return Err(corrupted("tail is not the last free block"));
        }

        Ok(())
    }
}

/// Read-only view of a pool, for diagnostics and tests.
#[derive(Clone, Copy)]
pub struct PoolView<'a> {
    pool: &'a Pool,
}

impl<'a> PoolView<'a> {
    pub(crate) fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// Start of the OS reservation.
    pub fn base(&self) -> NonNull<u8> {
        self.pool.region.base()
    }

    /// Size of the OS reservation.
    pub fn reserved(&self) -> usize {
        self.pool.region.len()
    }

    /// Bytes after the pool header, where blocks live.
    pub fn region_size(&self) -> usize {
        self.pool.region_size()
    }

    /// Bytes claimed by block headers and live allocations.
    pub fn occupancy(&self) -> usize {
        self.pool.occupancy
    }

    pub fn free_bytes(&self) -> usize {
        self.pool.free_bytes()
    }

    pub fn is_large(&self) -> bool {
        self.pool.is_large
    }

    pub fn is_tail_exhausted(&self) -> bool {
        self.pool.is_tail_exhausted()
    }

    pub fn free_blocks(&self) -> usize {
        self.pool.free_list.len()
    }

    /// Blocks in address order.
    pub fn blocks(&self) -> Blocks<'a> {
        Blocks {
            region: self.pool.region,
            current: Some(self.pool.region.first_block()),
            marker: PhantomData,
        }
    }
}

/// A block as seen from outside the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address, what `alloc` returned for it.
    pub addr: NonNull<u8>,
    /// Payload size.
    pub size: usize,
    pub occupied: bool,
    pub coalescable: bool,
}

pub struct Blocks<'a> {
    region: Region,
    current: Option<BlockOffset>,
    marker: PhantomData<&'a Pool>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        let header = unsafe { self.region.header(block).as_ref() };
        self.current = header.right;

        Some(BlockInfo {
            addr: self.region.payload(block),
            size: header.size,
            occupied: header.is_occupied(),
            coalescable: header.is_coalescable(),
        })
    }
}
