use std::ptr::NonNull;

use sfalloc::{AllocatorConfig, FitPolicy, PoolAllocator, kilobytes};

fn log_alloc(addr: NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn print_pools(allocator: &PoolAllocator) {
    for (i, pool) in allocator.pools().enumerate() {
        println!(
            "Pool {i} at {:?}: {} bytes reserved, {} occupied, {} free blocks",
            pool.base(),
            pool.reserved(),
            pool.occupancy(),
            pool.free_blocks()
        );
    }
}

fn main() {
    let mut allocator =
        PoolAllocator::with_config(AllocatorConfig::new().with_fit_policy(FitPolicy::Best));
    allocator.init(kilobytes(256));

    let addr1 = allocator.alloc(64);
    log_alloc(addr1, 64);

    let addr2 = allocator.alloc(128);
    log_alloc(addr2, 128);

    let addr3 = allocator.alloc(16);
    log_alloc(addr3, 16);

    print_pools(&allocator);

    unsafe { allocator.free(addr1) };

    let addr4 = allocator.alloc(64);
    if addr4 == addr1 {
        println!("Correctly reused at {addr4:?}");
    } else {
        println!("Not correctly reused. First was at {addr1:?} and now at {addr4:?}");
    }

    // Merge example: two neighbours fold back into one block.
    unsafe {
        allocator.free(addr4);
        allocator.free(addr2);
    }

    let merged = allocator.alloc(64 + 128 + sfalloc::BLOCK_HEADER_SIZE);
    println!("Merged block reused at {merged:?}, first block was at {addr1:?}");

    unsafe {
        allocator.free(merged);
        allocator.free(addr3);
    }

    print_pools(&allocator);
    allocator.verify().expect("heap is consistent");
}
