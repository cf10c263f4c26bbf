//! Helper functions for the allocator. These don't belong to any concrete
//! structure: they turn requested byte counts into the sizes the pools and
//! blocks actually work with.

use crate::config::{ALIGNMENT, MIN_ALLOCATION_SIZE, MIN_GRANULES_PER_POOL};

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used both for block sizes (multiples of [`ALIGNMENT`]) and for
/// headers placed at the start of a region.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
#[inline]
pub const fn round_to_alignment(size: usize) -> usize {
    align(size, ALIGNMENT)
}

/// Number of bytes to reserve from the OS so that `requested` bytes fit.
///
/// The result is a whole number of allocation granules and never less than
/// [`MIN_GRANULES_PER_POOL`] of them.
pub const fn minimum_pool_size(requested: usize, granularity: usize) -> usize {
    let mut granules = requested.div_ceil(granularity);
    if granules < MIN_GRANULES_PER_POOL {
        granules = MIN_GRANULES_PER_POOL;
    }

    granules * granularity
}

/// Clamps a payload request up to [`MIN_ALLOCATION_SIZE`].
#[inline]
pub const fn minimum_alloc_size(requested: usize) -> usize {
    if requested > MIN_ALLOCATION_SIZE {
        requested
    } else {
        MIN_ALLOCATION_SIZE
    }
}

/// Payload size actually carved for a request of `requested` bytes.
#[inline]
pub const fn block_size_for(requested: usize) -> usize {
    round_to_alignment(minimum_alloc_size(requested))
}
