use std::ptr::NonNull;

use crate::{block::BlockOffset, config::MIN_ALLOCATION_SIZE, region::Region};

/// Links of a free block inside its pool's free list.
///
/// We use the payload of every free block as storage for these since, as the
/// block is actually free, the only part of it that we need is its header:
///
/// ```text
/// +------------------------+ <--------+
/// |      BlockHeader       |          |-------> Block Header
/// +------------------------+ <--------+
/// |   FreeLinks.prev       |
/// |   FreeLinks.next       |
/// +------------------------+
/// |      Free Payload      |
/// |        (unused)        |
/// +------------------------+
/// ```
#[repr(C)]
struct FreeLinks {
    prev: Option<BlockOffset>,
    next: Option<BlockOffset>,
}

const _: () = assert!(size_of::<FreeLinks>() <= MIN_ALLOCATION_SIZE);

/// Doubly linked list of the free blocks of one pool.
///
/// The list only stores offsets; the links live inside the blocks, so
/// inserting and removing never needs memory of its own. Blocks are pushed at
/// the front.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<BlockOffset>,
    len: usize,
}

pub(crate) struct Iter {
    region: Region,
    current: Option<BlockOffset>,
}

#[inline]
fn links(region: &Region, block: BlockOffset) -> NonNull<FreeLinks> {
    region.payload(block).cast()
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pushes the free `block` at the front of the list.
    ///
    /// **SAFETY**: `block` must be a free block of `region` not already in
    /// the list.
    pub unsafe fn push(&mut self, region: &Region, block: BlockOffset) {
        unsafe {
            links(region, block).write(FreeLinks {
                prev: None,
                next: self.head,
            });

            if let Some(head) = self.head {
                links(region, head).as_mut().prev = Some(block);
            }
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` from the list.
    ///
    /// **SAFETY**: `block` must currently be in the list.
    pub unsafe fn remove(&mut self, region: &Region, block: BlockOffset) {
        unsafe {
            let FreeLinks { prev, next } = links(region, block).read();

            match prev {
                Some(prev) => links(region, prev).as_mut().next = next,
                None => self.head = next,
            }

            if let Some(next) = next {
                links(region, next).as_mut().prev = prev;
            }
        }

        self.len -= 1;
    }

    /// Returns the smallest block of at least `size` bytes. An exact fit
    /// stops the search right away.
    pub fn best_fit(&self, region: &Region, size: usize) -> Option<BlockOffset> {
        let mut best: Option<(BlockOffset, usize)> = None;

        for block in self.iter(*region) {
            let block_size = unsafe { region.header(block).as_ref().size };

            if block_size == size {
                return Some(block);
            }

            if block_size > size && best.is_none_or(|(_, best_size)| block_size < best_size) {
                best = Some((block, block_size));
            }
        }

        best.map(|(block, _)| block)
    }

    pub fn iter(&self, region: Region) -> Iter {
        Iter {
            region,
            current: self.head,
        }
    }
}

impl Iterator for Iter {
    type Item = BlockOffset;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        self.current = unsafe { links(&self.region, block).as_ref().next };

        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BLOCK_HEADER_SIZE, BlockHeader},
        pool::POOL_HEADER_SIZE,
    };

    #[repr(C, align(4096))]
    struct Backing([u8; 4096]);

    /// Writes free headers of the given payload sizes back to back.
    fn blocks(backing: &mut Backing, sizes: &[usize]) -> (Region, Vec<BlockOffset>) {
        let region = Region::new(NonNull::from(&mut backing.0).cast(), 4096);
        let mut offset = POOL_HEADER_SIZE;
        let mut offsets = Vec::new();

        for &size in sizes {
            let block = region.offset(offset);
            unsafe { region.header(block).write(BlockHeader::free(NonNull::dangling(), size)) };
            offsets.push(block);
            offset = block.end(size);
        }

        (region, offsets)
    }

    #[test]
    fn push_and_remove() {
        let mut backing = Backing([0; 4096]);
        let (region, offsets) = blocks(&mut backing, &[32, 64, 96]);
        let mut list = FreeList::new();

        assert_eq!(0, list.len());

        unsafe {
            for block in &offsets {
                list.push(&region, *block);
            }
        }

        let order: Vec<_> = list.iter(region).collect();
        assert_eq!(vec![offsets[2], offsets[1], offsets[0]], order);
        assert_eq!(3, list.len());

        unsafe {
            list.remove(&region, offsets[1]);
            assert_eq!(vec![offsets[2], offsets[0]], list.iter(region).collect::<Vec<_>>());

            list.remove(&region, offsets[2]);
            assert_eq!(vec![offsets[0]], list.iter(region).collect::<Vec<_>>());

            list.remove(&region, offsets[0]);
        }

        assert_eq!(0, list.len());
        assert_eq!(None, list.iter(region).next());
    }

    #[test]
    fn best_fit_prefers_smallest_and_exact() {
        let mut backing = Backing([0; 4096]);
        let (region, offsets) = blocks(&mut backing, &[256, 64, 128, 96]);
        let mut list = FreeList::new();

        unsafe {
            for block in &offsets {
                list.push(&region, *block);
            }
        }

        assert_eq!(Some(offsets[1]), list.best_fit(&region, 32));
        assert_eq!(Some(offsets[3]), list.best_fit(&region, 65));
        assert_eq!(Some(offsets[2]), list.best_fit(&region, 128));
        assert_eq!(Some(offsets[0]), list.best_fit(&region, 200));
        assert_eq!(None, list.best_fit(&region, 256 + BLOCK_HEADER_SIZE));
    }
}
