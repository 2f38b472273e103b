//! Monotonic identifier and port allocation.
//!
//! Meeting IDs and rendezvous ports are each handed out by their own
//! allocator; a value, once allocated, is never reused for the lifetime
//! of the directory process.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

/// Monotonic meeting-ID source.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first value is `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Hand out the next identifier. Unique across arbitrarily many
    /// concurrent callers.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Monotonic rendezvous/listen port source.
///
/// Every meeting gets its own port, and every mesh joiner another, so
/// peers sharing one IP address never collide.
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU16,
}

impl PortAllocator {
    /// Create an allocator whose first value is `base`.
    pub fn starting_at(base: u16) -> Self {
        Self {
            next: AtomicU16::new(base),
        }
    }

    /// Hand out the next port.
    pub fn allocate(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
