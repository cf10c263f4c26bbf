//! Errors reported by the fallible entry points of the allocator.
//!
//! The plain `init`/`alloc`/`free` calls treat all of these as fatal.

use thiserror::Error;

#[must_use = "errors should be handled"]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The OS refused to hand out the region. Either the request was malformed
    /// or the address space is exhausted.
    #[error("virtual memory reservation of {size} bytes failed")]
    ReservationFailed { size: usize },

    #[error("allocation of {requested} bytes overflows the address space")]
    SizeOverflow { requested: usize },

    #[error("pointer {addr:#x} was not handed out by this allocator")]
    ForeignPointer { addr: usize },

    #[error("block at {addr:#x} is already free")]
    DoubleFree { addr: usize },

    #[error("pool at {pool:#x} is corrupted: {reason}")]
    Corruption { pool: usize, reason: &'static str },
}

impl AllocError {
    /// Failures caused by the caller rather than the allocator or the OS.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::ForeignPointer { .. } | Self::DoubleFree { .. })
    }
}
