// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::CacheOps,
    ring::{
        header::SharedDescriptorTable,
        slot::{
            RingSlot,
            SlotOwner,
        },
        stats::SharedRingStats,
    },
    runtime::{
        fail::Fail,
        limits,
        memory::{
            DmaBuffer,
            DmaPool,
        },
    },
};
use ::std::rc::Rc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Geometry of a receive ring within the shared descriptor table.
pub struct RxLayout {
    /// Number of packet-header slots.
    pub count: usize,
    /// Number of buffer descriptors, `>= count`.
    pub bd_count: usize,
    /// First packet-header index owned by the ring.
    pub ph_base: usize,
    /// First buffer-descriptor index owned by the ring.
    pub bd_base: usize,
}

/// The receive descriptor ring.
///
/// Every slot starts device-owned and bound to a pool buffer. Completion order is FIFO, so a
/// single `walk` cursor suffices. On every successful receive the bound buffer is swapped out,
/// never freed in place: a replacement is pool-allocated before the old one is detached, so the
/// ring is never left with a dangling slot however slow the stack is to return memory.
pub struct RxRing {
    /// Descriptor table shared with the transmit ring.
    table: SharedDescriptorTable,
    /// Platform cache maintenance.
    cache: Rc<dyn CacheOps>,
    /// Shared counters.
    stats: SharedRingStats,
    /// Pool backing the receive buffers.
    pool: DmaPool,
    /// Raw slot words, as walked by the switch core.
    slots: Box<[u32]>,
    /// Buffer bound to each slot.
    bound: Box<[Option<DmaBuffer>]>,
    /// First packet-header index owned by this ring.
    ph_base: usize,
    /// First buffer-descriptor index owned by this ring.
    bd_base: usize,
    /// Number of buffer descriptors, `>= slots.len()`.
    bd_count: usize,
    /// Next slot to inspect.
    walk: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RxRing {
    /// Creates a receive ring of `count` slots, each bound to a freshly pooled buffer and handed
    /// to the device, with `bd_count >= count` buffer descriptors. Fails atomically: buffers
    /// claimed before a failure return to the pool as the partial ring unwinds.
    pub fn create(
        table: SharedDescriptorTable,
        cache: Rc<dyn CacheOps>,
        stats: SharedRingStats,
        pool: DmaPool,
        layout: RxLayout,
    ) -> Result<Self, Fail> {
        let RxLayout {
            count,
            bd_count,
            ph_base,
            bd_base,
        } = layout;
        if count < 1 {
            return Err(Fail::new(libc::EINVAL, "receive ring needs at least one slot"));
        }
        if bd_count < count {
            return Err(Fail::new(
                libc::EINVAL,
                "receive buffer-descriptor ring cannot be shallower than the header ring",
            ));
        }

        let mut ring: Self = Self {
            table,
            cache,
            stats,
            pool,
            slots: vec![0u32; count].into_boxed_slice(),
            bound: (0..count).map(|_| None).collect(),
            ph_base,
            bd_base,
            bd_count,
            walk: 0,
        };

        for index in 0..count {
            let buffer: DmaBuffer = ring
                .pool
                .alloc()
                .ok_or_else(|| Fail::new(libc::ENOMEM, "pool too small to fill the receive ring"))?;
            ring.bind(index, buffer);
            ring.slots[index] = RingSlot {
                owner: SlotOwner::Cpu,
                is_last_slot: index == count - 1,
                ph_index: (ph_base + index) as u32,
            }
            .to_raw();
        }

        // Full write-back of descriptors and payload memory, then hand every slot over.
        {
            let table = ring.table.borrow();
            for (ptr, len) in table.full_range() {
                ring.cache.flush(ptr, len);
            }
        }
        for index in 0..count {
            if let Some(buffer) = ring.bound[index].as_ref() {
                ring.cache.flush(buffer.as_ptr(), buffer.capacity());
            }
            ring.hand_to_device(index);
        }

        Ok(ring)
    }

    /// Walks ready slots, delivering at most `budget` packets through `deliver` and rearming
    /// every visited slot. Stops early at the first device-owned slot. Never blocks and never
    /// allocates beyond the pre-filled pool; exhaustion and malformed lengths are drop-and-rearm
    /// conditions counted in the ring stats.
    pub fn poll(&mut self, budget: usize, mut deliver: impl FnMut(DmaBuffer, usize)) -> usize {
        let count: usize = self.slots.len();
        let mut delivered: usize = 0;

        for _ in 0..budget {
            let index: usize = self.walk;
            if self.slot_owner(index) == SlotOwner::Device {
                break;
            }

            let reported: usize = {
                let table = self.table.borrow();
                let (ptr, len) = table.ph_range(self.ph_base + index);
                self.cache.invalidate(ptr, len);
                let (ptr, len) = table.bd_range(self.bd_base + index);
                self.cache.invalidate(ptr, len);
                table.ph(self.ph_base + index).length as usize
            };

            let current: DmaBuffer = match self.bound[index].take() {
                Some(buffer) => buffer,
                None => {
                    // Should not happen: the ring never detaches without rebinding.
                    warn!("rx poll: slot {} ready with no bound buffer", index);
                    self.stats.borrow_mut().rx_unbound_slot += 1;
                    self.rearm(index);
                    self.walk = (self.walk + 1) % count;
                    continue;
                },
            };

            // Replacement comes first: without one, the packet is dropped and the old buffer
            // stays bound, keeping the ring healthy.
            match self.pool.alloc() {
                None => {
                    trace!("rx poll: pool exhausted, dropping packet on slot {}", index);
                    self.stats.borrow_mut().rx_drop_no_buffer += 1;
                    self.bound[index] = Some(current);
                    self.rearm(index);
                },
                Some(replacement) => {
                    if reported < limits::ETH_HEADER_SIZE || reported > current.capacity() {
                        // Malformed metadata is never forwarded upward; the replacement goes
                        // straight back to the pool and the original buffer stays bound.
                        debug!("rx poll: bad length {} on slot {}, dropping", reported, index);
                        self.stats.borrow_mut().rx_drop_bad_length += 1;
                        drop(replacement);
                        self.bound[index] = Some(current);
                        self.rearm(index);
                    } else {
                        self.bind(index, replacement);
                        self.rearm(index);

                        // The payload was written by the device; invalidate before the stack reads.
                        self.cache.invalidate(current.as_ptr(), reported);
                        {
                            let mut stats = self.stats.borrow_mut();
                            stats.rx_delivered += 1;
                            stats.rx_bytes += reported as u64;
                        }
                        deliver(current, reported);
                        delivered += 1;
                    }
                },
            }

            self.walk = (self.walk + 1) % count;
        }

        delivered
    }

    /// Bus address of the slot array; programmed into the receive header ring base register.
    pub fn header_base_addr(&self) -> u32 {
        crate::pal::bus_addr(self.slots.as_ptr() as *const u8)
    }

    /// Bus address of this ring's first buffer descriptor; programmed into the receive buffer
    /// ring base register.
    pub fn buffer_base_addr(&self) -> u32 {
        self.table.borrow().bd_bus_addr(self.bd_base)
    }

    /// Number of buffer descriptors backing this ring.
    pub fn bd_count(&self) -> usize {
        self.bd_count
    }

    /// Binds `buffer` to the slot's descriptor pair and resets the header for the device to fill.
    fn bind(&mut self, index: usize, buffer: DmaBuffer) {
        {
            let mut table = self.table.borrow_mut();
            let bd_index: usize = self.bd_base + index;

            let bd = table.bd_mut(bd_index);
            bd.data_addr = buffer.bus_addr();
            bd.capacity = buffer.capacity() as u16;
            bd.handle = buffer.pool_tag();

            let ph = table.ph_mut(self.ph_base + index);
            ph.reset();
            ph.bd_index = bd_index as u32;
        }
        self.bound[index] = Some(buffer);
    }

    /// Ownership hand-off to the device for one slot: write back the slot's descriptor lines,
    /// barrier, flip the ownership bit, write back the slot word, barrier.
    fn rearm(&mut self, index: usize) {
        {
            let table = self.table.borrow();
            let (ptr, len) = table.ph_range(self.ph_base + index);
            self.cache.flush(ptr, len);
            let (ptr, len) = table.bd_range(self.bd_base + index);
            self.cache.flush(ptr, len);
        }
        self.cache.wmb();
        self.slots[index] = RingSlot::from_raw(self.slots[index])
            .with_owner(SlotOwner::Device)
            .to_raw();
        self.cache.flush(&self.slots[index] as *const u32 as *const u8, 4);
        self.cache.wmb();
    }

    /// First-time hand-off at create; identical sequencing to [`Self::rearm`].
    fn hand_to_device(&mut self, index: usize) {
        self.rearm(index);
    }

    /// Reads a slot's current owner, invalidating its cache line first.
    fn slot_owner(&self, index: usize) -> SlotOwner {
        self.cache.invalidate(&self.slots[index] as *const u32 as *const u8, 4);
        RingSlot::from_raw(self.slots[index]).owner
    }
}

//======================================================================================================================
// Test Accessors
//======================================================================================================================

#[cfg(test)]
impl RxRing {
    /// Raw slot word, as the device would read it.
    pub(crate) fn slot_raw(&self, index: usize) -> u32 {
        self.slots[index]
    }

    /// Overwrites a raw slot word, as the device would on packet arrival.
    pub(crate) fn set_slot_raw(&mut self, index: usize, raw: u32) {
        self.slots[index] = raw;
    }

    /// Number of physical slots.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Packet-header table index for a slot.
    pub(crate) fn ph_index(&self, index: usize) -> usize {
        self.ph_base + index
    }
}
