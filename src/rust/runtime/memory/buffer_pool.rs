// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal,
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use ::std::{
    cell::{
        RefCell,
        UnsafeCell,
    },
    rc::Rc,
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Maximum number of blocks a single pool may carry. The free list is a fixed-capacity stack, so
/// returning a block can never allocate, even from interrupt/poll context.
pub const POOL_BLOCKS_MAX: usize = 512;

/// Seed value for pool membership tags. Tags only need to be distinct between live pools; they are
/// drawn from a process-wide counter starting here.
const POOL_TAG_BASE: u32 = 0x4450_0000;

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Next pool membership tag to hand out.
static NEXT_POOL_TAG: AtomicU32 = AtomicU32::new(POOL_TAG_BASE);

//======================================================================================================================
// Structures
//======================================================================================================================

/// A fixed-count, fixed-size pool of DMA-safe blocks.
///
/// All memory is allocated once at [`DmaPool::create`]; steady-state receive never allocates. Pool
/// exhaustion is reported through [`DmaPool::alloc`] returning `None` and is a drop condition for
/// the caller, never a blocking one.
///
/// Clones are handles to the same pool.
#[derive(Clone)]
pub struct DmaPool {
    inner: Rc<PoolInner>,
}

/// Shared pool state. [`DmaBuffer`] handles keep this alive until the last block is returned.
struct PoolInner {
    /// Backing storage for all blocks, one contiguous allocation.
    storage: UnsafeCell<Box<[u8]>>,
    /// Stack of free block indices.
    free: RefCell<ArrayVec<u16, POOL_BLOCKS_MAX>>,
    /// Size of each block, in bytes.
    block_size: usize,
    /// Total number of blocks.
    count: usize,
    /// Pool membership tag.
    tag: u32,
}

/// A block leased from a [`DmaPool`].
///
/// The handle carries a reference to its origin pool, so a buffer handed to an external
/// collaborator identifies and returns itself without the collaborator tracking pool identity:
/// dropping the handle pushes the block back onto the owning pool's free list.
pub struct DmaBuffer {
    pool: Rc<PoolInner>,
    index: u16,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl DmaPool {
    /// Creates a pool of `count` blocks of `block_size` bytes each, allocated up front.
    pub fn create(block_size: usize, count: usize) -> Result<Self, Fail> {
        if block_size == 0 {
            return Err(Fail::new(libc::EINVAL, "pool block size cannot be zero"));
        }
        if count == 0 || count > POOL_BLOCKS_MAX {
            return Err(Fail::new(libc::EINVAL, "pool block count out of range"));
        }

        let total: usize = block_size
            .checked_mul(count)
            .ok_or_else(|| Fail::new(libc::ENOMEM, "pool size overflows"))?;

        let storage: Box<[u8]> = vec![0u8; total].into_boxed_slice();

        let mut free: ArrayVec<u16, POOL_BLOCKS_MAX> = ArrayVec::new();
        for index in 0..count {
            free.push(index as u16);
        }

        let tag: u32 = NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed);
        trace!("created dma pool: tag={:#x}, block_size={}, count={}", tag, block_size, count);

        Ok(Self {
            inner: Rc::new(PoolInner {
                storage: UnsafeCell::new(storage),
                free: RefCell::new(free),
                block_size,
                count,
                tag,
            }),
        })
    }

    /// Takes a free block from the pool. Returns `None` when the pool is exhausted.
    pub fn alloc(&self) -> Option<DmaBuffer> {
        let index: u16 = self.inner.free.borrow_mut().pop()?;
        Some(DmaBuffer {
            pool: self.inner.clone(),
            index,
        })
    }

    /// Returns whether `buf` was leased from this pool.
    pub fn is_member(&self, buf: &DmaBuffer) -> bool {
        Rc::ptr_eq(&self.inner, &buf.pool)
    }

    /// Number of free blocks.
    pub fn free_count(&self) -> usize {
        self.inner.free.borrow().len()
    }

    /// Total number of blocks in the pool.
    pub fn block_count(&self) -> usize {
        self.inner.count
    }

    /// Size of each block, in bytes.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Pool membership tag.
    pub fn tag(&self) -> u32 {
        self.inner.tag
    }
}

impl DmaBuffer {
    /// Capacity of this block, in bytes.
    pub fn capacity(&self) -> usize {
        self.pool.block_size
    }

    /// Membership tag of the owning pool.
    pub fn pool_tag(&self) -> u32 {
        self.pool.tag
    }

    /// Returns whether this buffer was leased from `pool`.
    pub fn belongs_to(&self, pool: &DmaPool) -> bool {
        Rc::ptr_eq(&self.pool, &pool.inner)
    }

    /// Pointer to the start of the block's payload region.
    pub fn as_ptr(&self) -> *const u8 {
        // Safety: the pointer is only computed, not dereferenced, so no aliasing is at stake here.
        let base: *const u8 = unsafe { (*self.pool.storage.get()).as_ptr() };
        // Safety: index is always within the single contiguous storage allocation.
        unsafe { base.add(self.index as usize * self.pool.block_size) }
    }

    /// Mutable pointer to the start of the block's payload region.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_ptr() as *mut u8
    }

    /// Device bus address of the block's payload region.
    pub fn bus_addr(&self) -> u32 {
        pal::bus_addr(self.as_ptr())
    }

    /// The block's payload region.
    pub fn as_slice(&self) -> &[u8] {
        // Safety: each block index is leased to at most one live DmaBuffer, and the free list is
        // never handed out twice, so this handle has exclusive access to its block's bytes.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.pool.block_size) }
    }

    /// The block's payload region, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len: usize = self.pool.block_size;
        // Safety: see [Self::as_slice]; the handle is the unique owner of its block.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), len) }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // The free list is bounded by the block count, so this push cannot fail unless a block is
        // returned twice, which the leasing discipline rules out.
        self.pool.free.borrow_mut().push(self.index);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
