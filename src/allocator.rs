use std::{marker::PhantomData, ptr::NonNull};

use log::{debug, error, trace};

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockOffset},
    config::{ALIGNMENT, AllocatorConfig, FitPolicy},
    error::AllocError,
    kernel::{Kernel, PlatformMemory},
    list::{List, Node},
    pool::{POOL_HEADER_SIZE, Pool, PoolView},
    region::Region,
    utils::{block_size_for, minimum_pool_size},
};

/// Largest request we accept. Anything bigger cannot be described by a
/// [`std::alloc::Layout`] once our headers are added.
const MAX_REQUEST: usize = isize::MAX as usize - POOL_HEADER_SIZE - BLOCK_HEADER_SIZE - ALIGNMENT;

/// Where a request is going to be carved from.
#[derive(Debug, Clone, Copy)]
struct PoolFit {
    pool: NonNull<Node<Pool>>,
    block: BlockOffset,
}

/// Totals over every pool of an allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub pools: usize,
    /// Bytes obtained from the OS, pool headers included.
    pub reserved_bytes: usize,
    /// Bytes claimed by block headers and live allocations.
    pub occupied_bytes: usize,
    /// Bytes of free payload, contiguous or not.
    pub free_bytes: usize,
}

/// General purpose allocator over pools of OS virtual memory.
///
/// Every pool is one reservation from `M`, with the pool header at the
/// front followed by the blocks. Pools are appended in creation order, so
/// the first node of the list is the head pool and the last one the tail
/// pool.
///
/// The allocator is single threaded: it can be moved to another thread but
/// callers sharing it must serialise every call themselves.
///
/// ```
/// use sfalloc::PoolAllocator;
///
/// let mut allocator = PoolAllocator::new();
///
/// let ptr = allocator.alloc(64);
/// unsafe {
///     ptr.as_ptr().write_bytes(0xAA, 64);
///     allocator.free(ptr);
/// }
/// ```
pub struct PoolAllocator<M: PlatformMemory = Kernel> {
    /// Linked list of allocator memory pools
    pools: List<Pool>,
    config: AllocatorConfig,
    marker: PhantomData<fn() -> M>,
}

// The allocator exclusively owns its pools, nothing else points into them.
unsafe impl<M: PlatformMemory> Send for PoolAllocator<M> {}

impl PoolAllocator<Kernel> {
    /// Allocator with the default configuration. Nothing is reserved until
    /// the first allocation or an explicit [`PoolAllocator::init`].
    pub const fn new() -> Self {
        Self::with_config(AllocatorConfig::new())
    }

    pub const fn with_config(config: AllocatorConfig) -> Self {
        Self::with_backend(config)
    }
}

impl Default for PoolAllocator<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PlatformMemory> PoolAllocator<M> {
    /// Allocator reserving its pools through `M` instead of the OS backend.
    pub const fn with_backend(config: AllocatorConfig) -> Self {
        Self {
            pools: List::new(),
            config,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Creates the first pool with room for at least `reserve_size` bytes.
    /// Does nothing if a pool already exists.
    pub fn try_init(&mut self, reserve_size: usize) -> Result<(), AllocError> {
        if !self.pools.is_empty() {
            return Ok(());
        }

        let pool = self.create_pool(reserve_size, false)?;
        debug!("initialised allocator with pool {:p}", pool);

        Ok(())
    }

    /// Same as [`PoolAllocator::try_init`] but a failed reservation is fatal.
    pub fn init(&mut self, reserve_size: usize) {
        if let Err(err) = self.try_init(reserve_size) {
            fatal(err);
        }
    }

    /// Allocates at least `size` bytes aligned to [`ALIGNMENT`]. Zero-sized
    /// requests get the minimum block size.
    pub fn try_alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size > MAX_REQUEST {
            return Err(AllocError::SizeOverflow { requested: size });
        }

        let size = block_size_for(size);

        if self.pools.is_empty() {
            self.try_init(self.config.initial_pool_size)?;
        }

        if self.config.is_large(size) {
            return self.alloc_large(size);
        }

        let fit = match self.find_fit(size) {
            Some(fit) => fit,
            None => self.grow(size)?,
        };

        Ok(unsafe { (*fit.pool.as_ptr()).data.carve(fit.block, size) })
    }

    /// Same as [`PoolAllocator::try_alloc`] but failing is fatal. Never
    /// returns null.
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.try_alloc(size).unwrap_or_else(|err| fatal(err))
    }

    /// Releases an allocation, merging it with the free blocks around it.
    ///
    /// With [`AllocatorConfig::validate_frees`] the pointer is checked against
    /// every pool first, so most foreign pointers are reported instead of
    /// corrupting the heap. Without it the pointer still has to lie inside a
    /// live pool. Releasing a block twice is reported as
    /// [`AllocError::DoubleFree`] while its pool is live, and as
    /// [`AllocError::ForeignPointer`] once the pool went back to the OS.
    ///
    /// # Safety
    ///
    /// Unless frees are validated, `ptr` must have been returned by this
    /// allocator. In any case the memory must not be used afterwards.
    pub unsafe fn try_free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let (node, block) = if self.config.validate_frees {
            self.locate(ptr)?
        } else {
            self.owner_of(ptr)?
        };

        let pool = unsafe { &mut (*node.as_ptr()).data };

        if pool.is_large() {
            unsafe { self.release_pool(node) };
            return Ok(());
        }

        unsafe { pool.release(block)? };

        if self.config.release_empty_pools && pool.is_empty() && self.pools.first() != Some(node) {
            unsafe { self.release_pool(node) };
        }

        Ok(())
    }

    /// Same as [`PoolAllocator::try_free`] but any error is fatal.
    ///
    /// # Safety
    ///
    /// See [`PoolAllocator::try_free`].
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        if let Err(err) = unsafe { self.try_free(ptr) } {
            fatal(err);
        }
    }

    /// Payload size of the live allocation at `ptr`, which can be larger than
    /// what was requested. `None` if `ptr` is not a live allocation.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let (node, block) = self.locate(ptr).ok()?;
        let header = unsafe { node.as_ref().data.region().header(block).as_ref() };

        header.is_occupied().then_some(header.size)
    }

    /// Returns every pool to the OS. The allocator can be used again
    /// afterwards and will lazily create a new first pool.
    pub fn teardown(&mut self) {
        while let Some(node) = self.pools.last() {
            unsafe { self.release_pool(node) };
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Pools in creation order.
    pub fn pools(&self) -> impl Iterator<Item = PoolView<'_>> {
        self.pools.iter().map(PoolView::new)
    }

    /// The first pool created, if any.
    pub fn head_pool(&self) -> Option<PoolView<'_>> {
        self.pools
            .first()
            .map(|node| PoolView::new(unsafe { &(*node.as_ptr()).data }))
    }

    /// The most recently created pool, if any.
    pub fn tail_pool(&self) -> Option<PoolView<'_>> {
        self.pools
            .last()
            .map(|node| PoolView::new(unsafe { &(*node.as_ptr()).data }))
    }

    pub fn stats(&self) -> AllocatorStats {
        self.pools.iter().fold(AllocatorStats::default(), |stats, pool| AllocatorStats {
            pools: stats.pools + 1,
            reserved_bytes: stats.reserved_bytes + pool.region().len(),
            occupied_bytes: stats.occupied_bytes + pool.occupancy(),
            free_bytes: stats.free_bytes + pool.free_bytes(),
        })
    }

    /// Checks the pool list and every pool's blocks for inconsistencies.
    pub fn verify(&self) -> Result<(), AllocError> {
        let mut previous = None;
        let mut count = 0;

        for node in self.pools.nodes() {
            let (prev, pool) = unsafe {
                let node = node.as_ref();
                (node.prev, &node.data)
            };

            if prev != previous {
                return Err(AllocError::Corruption {
                    pool: node.as_ptr() as usize,
                    reason: "pool list links are inconsistent",
                });
            }

            pool.verify(node)?;

            previous = Some(node);
            count += 1;
        }

        if count != self.pools.len() || previous != self.pools.last() {
            return Err(AllocError::Corruption {
                pool: previous.map_or(0, |node| node.as_ptr() as usize),
                reason: "pool list length does not match its nodes",
            });
        }

        Ok(())
    }

    /// Reserves a region from the OS and writes a formatted pool into it,
    /// appended at the end of the pool list.
    fn create_pool(&mut self, requested: usize, is_large: bool) -> Result<NonNull<Node<Pool>>, AllocError> {
        let size = minimum_pool_size(requested, M::granularity());

        let addr = unsafe { M::request_memory(size) }.ok_or(AllocError::ReservationFailed { size })?;

        assert!(
            addr.as_ptr() as usize % ALIGNMENT == 0,
            "OS returned misaligned region {addr:p}"
        );

        let node = unsafe {
            let node = self.pools.append(Pool::new(Region::new(addr, size), is_large), addr);
            (*node.as_ptr()).data.format(node);
            node
        };

        debug!(
            "created {}pool {:p} of {} bytes for a request of {} bytes ({} pools)",
            if is_large { "large " } else { "" },
            addr,
            size,
            requested,
            self.pools.len()
        );

        Ok(node)
    }

    /// Unlinks a pool and gives its region back to the OS.
    unsafe fn release_pool(&mut self, node: NonNull<Node<Pool>>) {
        let region = unsafe { node.as_ref().data.region() };

        unsafe {
            self.pools.remove(node);
            M::return_memory(region.base(), region.len());
        }

        debug!(
            "released pool {:p} of {} bytes ({} pools left)",
            region.base(),
            region.len(),
            self.pools.len()
        );
    }

    fn find_fit(&self, size: usize) -> Option<PoolFit> {
        let fit = match self.config.fit_policy {
            FitPolicy::Fast => self.fast_fit(size),
            FitPolicy::Best => self.best_fit(size),
        };

        if let Some(fit) = fit {
            trace!("{size} bytes fit in pool {:p} at {:#x}", fit.pool, fit.block.get());
        }

        fit
    }

    /// First pool whose tail can hold `size` bytes.
    fn fast_fit(&self, size: usize) -> Option<PoolFit> {
        self.pools.nodes().find_map(|node| {
            let pool = unsafe { &node.as_ref().data };

            if pool.is_large() {
                return None;
            }

            pool.tail_fit(size).map(|block| PoolFit { pool: node, block })
        })
    }

    /// Smallest free block in the first pool able to hold `size` bytes.
    /// Tail-exhausted pools are likely fragmented, so they are only searched
    /// once every other pool failed.
    fn best_fit(&self, size: usize) -> Option<PoolFit> {
        let search = |exhausted: bool| {
            self.pools.nodes().find_map(|node| {
                let pool = unsafe { &node.as_ref().data };

                if pool.is_large() || pool.is_tail_exhausted() != exhausted {
                    return None;
                }

                pool.best_fit(size).map(|block| PoolFit { pool: node, block })
            })
        };

        search(false).or_else(|| search(true))
    }

    /// Appends a pool big enough for `size` bytes and picks its only block.
    fn grow(&mut self, size: usize) -> Result<PoolFit, AllocError> {
        let needed = POOL_HEADER_SIZE + BLOCK_HEADER_SIZE + size;
        let node = self.create_pool(needed.max(self.config.initial_pool_size), false)?;

        let block = unsafe { node.as_ref().data.tail_fit(size) }.expect("new pool holds the request");

        Ok(PoolFit { pool: node, block })
    }

    /// Gives a request its own pool. The block is never merged and freeing
    /// it releases the whole pool.
    fn alloc_large(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let node = self.create_pool(POOL_HEADER_SIZE + BLOCK_HEADER_SIZE + size, true)?;
        let pool = unsafe { &mut (*node.as_ptr()).data };
        let block = pool.region().first_block();

        Ok(unsafe { pool.carve(block, size) })
    }

    /// Finds the pool and block of `ptr` by bounds checking it against every
    /// pool. The header found must point back to that pool.
    fn locate(&self, ptr: NonNull<u8>) -> Result<(NonNull<Node<Pool>>, BlockOffset), AllocError> {
        let foreign = AllocError::ForeignPointer {
            addr: ptr.as_ptr() as usize,
        };

        for node in self.pools.nodes() {
            let region = unsafe { node.as_ref().data.region() };

            if !region.contains(ptr) {
                continue;
            }

            let block = region.block_of_payload(ptr).ok_or(foreign)?;
            let header = unsafe { region.header(block).as_ref() };

            if header.pool != node {
                return Err(foreign);
            }

            return Ok((node, block));
        }

        Err(foreign)
    }

    /// Finds the live pool containing `ptr` and trusts that a header sits
    /// right before it. Pointers into released pools are reported as foreign.
    fn owner_of(&self, ptr: NonNull<u8>) -> Result<(NonNull<Node<Pool>>, BlockOffset), AllocError> {
        let node = self
            .pools
            .nodes()
            .find(|node| unsafe { node.as_ref().data.region().contains(ptr) })
            .ok_or(AllocError::ForeignPointer {
                addr: ptr.as_ptr() as usize,
            })?;

        let region = unsafe { node.as_ref().data.region() };
        let offset = (ptr.as_ptr() as usize - region.base().as_ptr() as usize).wrapping_sub(BLOCK_HEADER_SIZE);

        Ok((node, region.offset(offset)))
    }
}

impl<M: PlatformMemory> Drop for PoolAllocator<M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cold]
#[track_caller]
fn fatal(err: AllocError) -> ! {
    error!("fatal allocator error: {err}");
    panic!("fatal allocator error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::kilobytes;
    use std::cell::Cell;

    thread_local! {
        /// Regions currently handed out by [`Counted`] on this thread.
        static LIVE: Cell<usize> = const { Cell::new(0) };
    }

    /// System memory that keeps track of outstanding regions.
    struct Counted;

    impl PlatformMemory for Counted {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            LIVE.with(|live| live.set(live.get() + 1));
            unsafe { Kernel::request_memory(len) }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            LIVE.with(|live| live.set(live.get() - 1));
            unsafe { Kernel::return_memory(addr, len) }
        }

        fn granularity() -> usize {
            Kernel::granularity()
        }
    }

    /// An address space that is already exhausted.
    struct Exhausted;

    impl PlatformMemory for Exhausted {
        unsafe fn request_memory(_len: usize) -> Option<NonNull<u8>> {
            None
        }

        unsafe fn return_memory(_addr: NonNull<u8>, _len: usize) {}

        fn granularity() -> usize {
            4096
        }
    }

    fn live() -> usize {
        LIVE.with(Cell::get)
    }

    fn allocator(config: AllocatorConfig) -> PoolAllocator<Counted> {
        PoolAllocator::with_backend(config)
    }

    /// Size of the free block at the end of the tail pool.
    fn tail_free(allocator: &PoolAllocator<Counted>) -> usize {
        let last = allocator.tail_pool().unwrap().blocks().last().unwrap();
        assert!(!last.occupied);
        last.size
    }

    #[test]
    fn nothing_is_reserved_until_first_use() {
        let mut allocator = allocator(AllocatorConfig::new());
        assert_eq!(0, allocator.pool_count());
        assert!(allocator.head_pool().is_none() && allocator.tail_pool().is_none());

        allocator.alloc(1);

        assert_eq!(1, allocator.pool_count());
        assert_eq!(1, live());
        assert_eq!(
            minimum_pool_size(allocator.config().initial_pool_size, Counted::granularity()),
            allocator.head_pool().unwrap().reserved()
        );
    }

    #[test]
    fn drop_returns_every_pool() {
        {
            let mut allocator = allocator(AllocatorConfig::new().with_initial_pool_size(kilobytes(16)));
            for _ in 0..8 {
                allocator.alloc(kilobytes(8));
            }
            assert!(allocator.pool_count() > 1);
            assert_eq!(allocator.pool_count(), live());
        }

        assert_eq!(0, live());
    }

    #[test]
    fn teardown_leaves_a_usable_allocator() {
        let mut allocator = allocator(AllocatorConfig::new());
        allocator.alloc(64);
        allocator.teardown();

        assert_eq!(0, allocator.pool_count());
        assert_eq!(0, live());

        allocator.alloc(64);
        assert_eq!(1, allocator.pool_count());
        allocator.verify().unwrap();
    }

    #[test]
    fn fast_fit_skips_holes() {
        let mut allocator = allocator(AllocatorConfig::fast());
        let a = allocator.alloc(64);
        let b = allocator.alloc(64);

        unsafe { allocator.free(a) };
        let c = allocator.alloc(64);

        assert!(c > b);
        allocator.verify().unwrap();
    }

    #[test]
    fn best_fit_reuses_holes() {
        let mut allocator = allocator(AllocatorConfig::new());
        let a = allocator.alloc(64);
        let _b = allocator.alloc(64);

        unsafe { allocator.free(a) };

        assert_eq!(a, allocator.alloc(64));
        allocator.verify().unwrap();
    }

    #[test]
    fn fast_fit_grows_past_tail_exhausted_pools() {
        let mut allocator = allocator(AllocatorConfig::fast());
        let a = allocator.alloc(64);
        allocator.alloc(tail_free(&allocator));

        assert!(allocator.head_pool().unwrap().is_tail_exhausted());

        unsafe { allocator.free(a) };
        assert!(allocator.head_pool().unwrap().is_tail_exhausted());

        let c = allocator.alloc(64);

        assert_eq!(2, allocator.pool_count());
        assert_ne!(a, c);
        assert_eq!(allocator.tail_pool().unwrap().blocks().next().unwrap().addr, c);
        allocator.verify().unwrap();
    }

    #[test]
    fn best_fit_searches_tail_exhausted_pools_before_growing() {
        let mut allocator = allocator(AllocatorConfig::new());
        let a = allocator.alloc(64);
        allocator.alloc(tail_free(&allocator));
        unsafe { allocator.free(a) };

        assert_eq!(a, allocator.alloc(64));
        assert_eq!(1, allocator.pool_count());
    }

    #[test]
    fn best_fit_prefers_pools_with_a_tail() {
        let config = AllocatorConfig::new().with_initial_pool_size(kilobytes(16));
        let mut allocator = allocator(config);

        // Exhaust the head pool's tail, leaving a hole at its start.
        let a = allocator.alloc(64);
        allocator.alloc(tail_free(&allocator));
        unsafe { allocator.free(a) };

        // Too big for the hole, so a second pool with a tail is created.
        let b = allocator.alloc(128);
        assert_eq!(2, allocator.pool_count());

        // The hole would be an exact fit, but the pool with a tail goes first.
        let c = allocator.alloc(64);
        assert_eq!(c.as_ptr() as usize, b.as_ptr() as usize + 128 + BLOCK_HEADER_SIZE);
        assert!(allocator.head_pool().unwrap().blocks().next().is_some_and(|block| !block.occupied));
    }

    #[test]
    fn large_allocations_get_their_own_pool() {
        let config = AllocatorConfig::new().with_large_allocation_threshold(Some(kilobytes(64)));
        let mut allocator = allocator(config);

        allocator.alloc(64);
        let big = allocator.alloc(kilobytes(100));

        assert_eq!(2, allocator.pool_count());
        let tail = allocator.tail_pool().unwrap();
        assert!(tail.is_large());
        assert_eq!(Some(tail.region_size() - BLOCK_HEADER_SIZE), allocator.usable_size(big));

        // Large pools are never searched.
        allocator.alloc(64);
        assert_eq!(2, allocator.pool_count());

        unsafe { allocator.free(big) };

        assert_eq!(1, allocator.pool_count());
        assert_eq!(1, live());
        assert!(!allocator.tail_pool().unwrap().is_large());
        allocator.verify().unwrap();
    }

    #[test]
    fn empty_pools_are_released_when_configured() {
        let config = AllocatorConfig::compact().with_initial_pool_size(kilobytes(16));
        let mut allocator = allocator(config);

        let a = allocator.alloc(kilobytes(12));
        let b = allocator.alloc(kilobytes(12));
        assert_eq!(2, allocator.pool_count());

        unsafe { allocator.free(b) };
        assert_eq!(1, allocator.pool_count());

        // The head pool stays.
        unsafe { allocator.free(a) };
        assert_eq!(1, allocator.pool_count());
        assert_eq!(1, live());
    }

    #[test]
    fn empty_pools_are_kept_by_default() {
        let mut allocator = allocator(AllocatorConfig::new().with_initial_pool_size(kilobytes(16)));

        allocator.alloc(kilobytes(12));
        let b = allocator.alloc(kilobytes(12));
        unsafe { allocator.free(b) };

        assert_eq!(2, allocator.pool_count());
    }

    #[test]
    fn stats_add_up() {
        let mut allocator = allocator(AllocatorConfig::new());
        allocator.alloc(100);
        allocator.alloc(200);

        let stats = allocator.stats();
        let pool = allocator.head_pool().unwrap();

        assert_eq!(1, stats.pools);
        assert_eq!(pool.reserved(), stats.reserved_bytes);
        assert_eq!(3 * BLOCK_HEADER_SIZE + 128 + 224, stats.occupied_bytes);
        assert_eq!(pool.region_size(), stats.occupied_bytes + stats.free_bytes);
    }

    #[test]
    fn exhausted_address_space_is_reported() {
        let mut allocator = PoolAllocator::<Exhausted>::with_backend(AllocatorConfig::new());

        assert_eq!(
            Err(AllocError::ReservationFailed {
                size: minimum_pool_size(AllocatorConfig::new().initial_pool_size, 4096)
            }),
            allocator.try_alloc(8)
        );
        assert_eq!(0, allocator.pool_count());
    }

    #[test]
    #[should_panic(expected = "fatal allocator error")]
    fn exhausted_address_space_is_fatal() {
        let mut allocator = PoolAllocator::<Exhausted>::with_backend(AllocatorConfig::new());
        allocator.alloc(8);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let mut allocator = allocator(AllocatorConfig::new());

        assert_eq!(
            Err(AllocError::SizeOverflow { requested: usize::MAX }),
            allocator.try_alloc(usize::MAX)
        );
        assert_eq!(0, live());
    }

    #[test]
    fn unvalidated_frees_trust_the_header() {
        let mut allocator = allocator(AllocatorConfig::fast());
        let a = allocator.alloc(64);
        let _b = allocator.alloc(64);

        unsafe {
            allocator.try_free(a).unwrap();
            assert_eq!(Err(AllocError::DoubleFree { addr: a.as_ptr() as usize }), allocator.try_free(a));
        }

        allocator.verify().unwrap();
    }

    #[test]
    fn freeing_into_a_released_pool_is_reported() {
        let config = AllocatorConfig::fast().with_large_allocation_threshold(Some(kilobytes(64)));
        let mut allocator = allocator(config);
        allocator.alloc(64);

        let big = allocator.alloc(kilobytes(100));
        let addr = big.as_ptr() as usize;

        unsafe {
            allocator.try_free(big).unwrap();
            assert_eq!(Err(AllocError::ForeignPointer { addr }), allocator.try_free(big));
        }

        assert_eq!(1, allocator.pool_count());
        allocator.verify().unwrap();
    }

    #[test]
    fn freeing_into_a_released_empty_pool_is_reported() {
        let config = AllocatorConfig::compact()
            .with_validate_frees(false)
            .with_initial_pool_size(kilobytes(16));
        let mut allocator = allocator(config);

        allocator.alloc(kilobytes(12));
        let b = allocator.alloc(kilobytes(12));
        assert_eq!(2, allocator.pool_count());

        unsafe {
            allocator.try_free(b).unwrap();
            assert!(matches!(allocator.try_free(b), Err(AllocError::ForeignPointer { .. })));
        }

        assert_eq!(1, live());
    }

    #[test]
    fn foreign_pointers_are_reported() {
        let mut allocator = allocator(AllocatorConfig::new().with_validate_frees(true));
        let a = allocator.alloc(64);

        let mut local = [0u8; 64];
        let foreign = NonNull::from(&mut local).cast::<u8>();

        unsafe {
            assert_eq!(
                Err(AllocError::ForeignPointer { addr: foreign.as_ptr() as usize }),
                allocator.try_free(foreign)
            );

            // Inside a pool, but not at the start of a payload.
            assert!(matches!(allocator.try_free(a.add(8)), Err(AllocError::ForeignPointer { .. })));
        }

        assert_eq!(Some(64), allocator.usable_size(a));
        assert_eq!(None, allocator.usable_size(foreign));
    }
}
