// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::sync::atomic::{
    fence,
    Ordering,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Cache-maintenance primitives for a platform whose DMA agents do not snoop the CPU cache.
///
/// The ring engine only sequences these calls; it never assumes anything about their cost or
/// granularity. Implementations operate on whole cache lines, so callers may pass unaligned
/// ranges.
pub trait CacheOps {
    /// Writes back any dirty cache lines covering `[addr, addr + len)` to memory.
    fn flush(&self, addr: *const u8, len: usize);

    /// Discards any cache lines covering `[addr, addr + len)` so the next read observes memory.
    fn invalidate(&self, addr: *const u8, len: usize);

    /// Store barrier: all prior stores are visible before any later store.
    fn wmb(&self);

    /// Full barrier.
    fn mb(&self);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Cache operations for cache-coherent hosts. Line maintenance is a no-op, but the ordering
/// barriers remain real: descriptor stores must still not be reordered past the ownership-bit
/// flip.
pub struct CoherentCache;

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl CacheOps for CoherentCache {
    fn flush(&self, _addr: *const u8, _len: usize) {}

    fn invalidate(&self, _addr: *const u8, _len: usize) {}

    fn wmb(&self) {
        fence(Ordering::Release);
    }

    fn mb(&self) {
        fence(Ordering::SeqCst);
    }
}
