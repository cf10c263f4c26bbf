//! Tunables of the allocator.
//!
//! The sizing constants are fixed at compile time since the header layout and
//! offset arithmetic depend on them. Search behaviour and pool management are
//! chosen per instance through [`AllocatorConfig`].

/// Alignment of every header and every payload handed out: four 64-bit words.
pub const ALIGNMENT: usize = size_of::<u64>() * 4;

/// Smallest payload a block can have. Free blocks store their free list links
/// in the payload, so this must hold two offsets.
pub const MIN_ALLOCATION_SIZE: usize = size_of::<u64>() * 4;

/// A pool never reserves fewer OS allocation granules than this.
pub const MIN_GRANULES_PER_POOL: usize = 4;

/// Size reserved by the first, lazily created pool.
pub const DEFAULT_INITIAL_POOL_SIZE: usize = kilobytes(256);

/// Requests of at least this many bytes get a dedicated pool.
pub const DEFAULT_LARGE_ALLOCATION_THRESHOLD: usize = megabytes(1);

#[inline]
pub const fn bytes(n: usize) -> usize {
    n
}

#[inline]
pub const fn kilobytes(n: usize) -> usize {
    1024 * bytes(n)
}

#[inline]
pub const fn megabytes(n: usize) -> usize {
    1024 * kilobytes(n)
}

#[inline]
pub const fn gigabytes(n: usize) -> usize {
    1024 * megabytes(n)
}

#[inline]
pub const fn terabytes(n: usize) -> usize {
    1024 * gigabytes(n)
}

/// How the allocator picks a free block for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Only look at the free block at the end of each pool. Pools whose end is
    /// occupied are skipped, which keeps the search short at the price of
    /// leaving holes unused until they coalesce back into the tail.
    Fast,
    /// Search each pool with enough free space for the smallest free block
    /// that fits. Pools whose end is occupied are only searched after all
    /// the others failed.
    #[default]
    Best,
}

/// Runtime configuration of a [`crate::PoolAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Block search strategy.
    pub fit_policy: FitPolicy,
    /// Bytes reserved for the first pool and the minimum for every later one.
    pub initial_pool_size: usize,
    /// Requests at or above this size get their own pool. `None` disables
    /// dedicated pools.
    pub large_allocation_threshold: Option<usize>,
    /// Return a pool to the OS once every block in it is free again. The
    /// first pool is always kept.
    pub release_empty_pools: bool,
    /// Bounds check freed pointers against every pool instead of trusting
    /// the block header in front of them.
    pub validate_frees: bool,
}

impl AllocatorConfig {
    pub const fn new() -> Self {
        Self {
            fit_policy: FitPolicy::Best,
            initial_pool_size: DEFAULT_INITIAL_POOL_SIZE,
            large_allocation_threshold: Some(DEFAULT_LARGE_ALLOCATION_THRESHOLD),
            release_empty_pools: false,
            validate_frees: cfg!(debug_assertions),
        }
    }

    /// Favours allocation speed: tail-only search, no pointer validation.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            fit_policy: FitPolicy::Fast,
            validate_frees: false,
            ..Self::new()
        }
    }

    /// Favours memory footprint: best-fit search and empty pools go back to
    /// the OS.
    #[must_use]
    pub const fn compact() -> Self {
        Self {
            fit_policy: FitPolicy::Best,
            release_empty_pools: true,
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn with_fit_policy(mut self, fit_policy: FitPolicy) -> Self {
        self.fit_policy = fit_policy;
        self
    }

    #[must_use]
    pub const fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    #[must_use]
    pub const fn with_large_allocation_threshold(mut self, threshold: Option<usize>) -> Self {
        self.large_allocation_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_release_empty_pools(mut self, release: bool) -> Self {
        self.release_empty_pools = release;
        self
    }

    #[must_use]
    pub const fn with_validate_frees(mut self, validate: bool) -> Self {
        self.validate_frees = validate;
        self
    }

    /// Whether a request of `size` payload bytes goes to a dedicated pool.
    #[inline]
    pub(crate) const fn is_large(&self, size: usize) -> bool {
        match self.large_allocation_threshold {
            Some(threshold) => size >= threshold,
            None => false,
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
