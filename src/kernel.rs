//! Virtual memory backend. This is the only place the allocator talks to the
//! operating system.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// OS allocation granularity. It never changes while the process runs, so it
/// is queried once and cached here. Zero means "not queried yet".
static GRANULARITY: AtomicUsize = AtomicUsize::new(0);

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
pub trait PlatformMemory {
    /// Request a zeroed, read-write memory region of `len` bytes. It returns
    /// a pointer to the start of the region or `None` if the underlying
    /// syscall fails.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of [`PlatformMemory::granularity`].
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the region of `len` bytes starting at `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe exactly one region obtained from
    /// [`PlatformMemory::request_memory`], and nothing may touch it afterwards.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);

    /// Size in bytes of the unit the OS reserves memory in.
    fn granularity() -> usize;
}

/// The platform backend: `mmap` on unix, `VirtualAlloc` on windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kernel;

/// Reads the cached granularity, asking the OS on first use.
#[inline]
fn cached_granularity(query: impl FnOnce() -> usize) -> usize {
    match GRANULARITY.load(Ordering::Relaxed) {
        0 => {
            let granularity = query();
            assert!(
                granularity.is_power_of_two(),
                "OS reported allocation granularity {granularity}"
            );
            GRANULARITY.store(granularity, Ordering::Relaxed);
            granularity
        }
        granularity => granularity,
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory, cached_granularity};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            let result = unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) };
            debug_assert_eq!(0, result, "munmap of {addr:p} ({len} bytes) failed");
        }

        fn granularity() -> usize {
            cached_granularity(|| unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize })
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory, cached_granularity};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            let result =
                unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE) };
            debug_assert!(result.is_ok(), "VirtualFree of {addr:p} failed");
        }

        fn granularity() -> usize {
            cached_granularity(|| unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwAllocationGranularity as usize
            })
        }
    }
}
