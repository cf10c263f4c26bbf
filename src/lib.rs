//! General purpose allocator that manages its own memory, obtained straight
//! from the OS virtual memory facility (`mmap` / `VirtualAlloc`) instead of
//! the platform allocator.
//!
//! Memory is reserved in pools. Each pool starts with its own header and is
//! split into blocks; every block, free or occupied, is preceded by a header
//! linking it to its neighbours in memory:
//!
//! ```text
//! +------------------------------------------------------------------+
//! |      | +--------+---------+   +--------+---------+   +--------+   |
//! | Pool | | Header | Payload |<->| Header | Payload |<->| Header |...|
//! |      | +--------+---------+   +--------+---------+   +--------+   |
//! +------------------------------------------------------------------+
//!                   ^ pointer handed out by `alloc`
//! ```
//!
//! Allocating carves the requested size off a free block. Freeing merges the
//! block with whichever neighbours are free, so the pool heals back into one
//! block once everything is released.
//!
//! ```
//! use sfalloc::{AllocatorConfig, FitPolicy, PoolAllocator, kilobytes};
//!
//! let mut allocator = PoolAllocator::with_config(
//!     AllocatorConfig::new().with_fit_policy(FitPolicy::Fast),
//! );
//! allocator.init(kilobytes(256));
//!
//! let a = allocator.alloc(100);
//! assert_eq!(0, a.as_ptr() as usize % sfalloc::ALIGNMENT);
//!
//! unsafe { allocator.free(a) };
//! allocator.verify().unwrap();
//! ```
//!
//! The allocator is single threaded. Share it behind a lock if needed.

mod allocator;
mod block;
pub mod config;
mod error;
mod freelist;
mod kernel;
mod list;
mod pool;
mod region;
pub mod utils;

pub use allocator::{AllocatorStats, PoolAllocator};
pub use config::{
    ALIGNMENT, AllocatorConfig, DEFAULT_INITIAL_POOL_SIZE, FitPolicy, MIN_ALLOCATION_SIZE, bytes,
    gigabytes, kilobytes, megabytes, terabytes,
};
pub use error::AllocError;
pub use kernel::{Kernel, PlatformMemory};
pub use pool::{BlockInfo, Blocks, PoolView};

/// Bytes every block header takes in front of its payload.
pub const BLOCK_HEADER_SIZE: usize = block::BLOCK_HEADER_SIZE;

/// Bytes the pool header takes at the start of every reservation.
pub const POOL_HEADER_SIZE: usize = pool::POOL_HEADER_SIZE;
