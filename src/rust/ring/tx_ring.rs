// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::{
        self,
        CacheOps,
    },
    ring::{
        header::{
            PacketHeader,
            SharedDescriptorTable,
            PH_FLAG_OUTGOING,
        },
        slot::{
            RingSlot,
            SlotOwner,
        },
        stats::SharedRingStats,
    },
    runtime::{
        fail::Fail,
        limits,
    },
};
use ::std::rc::Rc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// One transmit request: the externally supplied payload plus its metadata and completion token.
///
/// The frame is the pending-completion token itself: it is parked in the ring's side table while
/// the slot is device-owned and released exactly once, either by reclaim or by a watchdog reset.
pub struct TxFrame {
    /// Payload bytes. Only the first `len` bytes are transmitted.
    pub payload: Box<[u8]>,
    /// Frame length, in bytes.
    pub len: u16,
    /// VLAN tag.
    pub vlan: u16,
    /// Destination port mask.
    pub port_mask: u8,
    /// Caller correlation token, handed back on release.
    pub token: u64,
}

/// The transmit descriptor ring.
///
/// `produce`/`consume` chase each other over `count` slot words; one sentinel slot always stays
/// unused so `produce == consume` unambiguously means empty. Slots transition
/// `Cpu -> (submit) -> Device -> (completion) -> Cpu` and nothing else; a device-owned slot is
/// never touched.
pub struct TxRing {
    /// Descriptor table shared with the receive ring.
    table: SharedDescriptorTable,
    /// Platform cache maintenance.
    cache: Rc<dyn CacheOps>,
    /// Shared counters.
    stats: SharedRingStats,
    /// Raw slot words, as walked by the switch core.
    slots: Box<[u32]>,
    /// Pending completion tokens, one per slot.
    pending: Box<[Option<TxFrame>]>,
    /// First packet-header index owned by this ring.
    ph_base: usize,
    /// First buffer-descriptor index owned by this ring.
    bd_base: usize,
    /// Next slot to fill.
    produce: usize,
    /// Next slot to reclaim.
    consume: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TxRing {
    /// Creates a transmit ring of `count` slots, all CPU-owned with zeroed descriptor pairs, and
    /// write-backs the descriptor memory so the device observes the initial state.
    pub fn create(
        table: SharedDescriptorTable,
        cache: Rc<dyn CacheOps>,
        stats: SharedRingStats,
        count: usize,
        ph_base: usize,
        bd_base: usize,
    ) -> Result<Self, Fail> {
        if count < 2 {
            return Err(Fail::new(libc::EINVAL, "transmit ring needs at least two slots"));
        }

        let mut ring: Self = Self {
            table,
            cache,
            stats,
            slots: vec![0u32; count].into_boxed_slice(),
            pending: (0..count).map(|_| None).collect(),
            ph_base,
            bd_base,
            produce: 0,
            consume: 0,
        };
        ring.init_descriptors();
        Ok(ring)
    }

    /// Submits one frame. On success, returns whether the ring was empty beforehand, in which
    /// case the caller must kick the device's fetch trigger. A saturated ring fails with `EAGAIN`
    /// and no side effects; the caller applies backpressure and retries after reclaim.
    pub fn submit(&mut self, frame: TxFrame) -> Result<bool, Fail> {
        if frame.len == 0 {
            return Err(Fail::new(libc::EINVAL, "cannot transmit an empty frame"));
        }
        if frame.len as usize > frame.payload.len() {
            return Err(Fail::new(libc::EINVAL, "frame length exceeds payload"));
        }
        if frame.len as usize > limits::ETH_FRAME_SIZE_MAX {
            return Err(Fail::new(libc::EMSGSIZE, "frame exceeds hardware frame-size ceiling"));
        }

        let count: usize = self.slots.len();
        let next: usize = (self.produce + 1) % count;
        if next == self.consume {
            self.stats.borrow_mut().tx_ring_full += 1;
            return Err(Fail::new(libc::EAGAIN, "transmit ring is full"));
        }

        let was_empty: bool = self.produce == self.consume;
        let index: usize = self.produce;

        // Short frames go out zero-padded to the link minimum; advertise the padded length.
        let wire_len: u16 = std::cmp::max(frame.len as usize, limits::ETH_ZLEN) as u16;

        {
            let mut table = self.table.borrow_mut();
            let ph_index: usize = self.ph_base + index;
            let bd_index: usize = self.bd_base + index;

            let bd = table.bd_mut(bd_index);
            bd.data_addr = pal::bus_addr(frame.payload.as_ptr());
            bd.capacity = frame.payload.len() as u16;
            bd.handle = frame.token as u32;

            let ph = table.ph_mut(ph_index);
            ph.length = wire_len;
            ph.flags = PH_FLAG_OUTGOING;
            ph.vlan = frame.vlan;
            ph.ports = PacketHeader::pack_ports(frame.port_mask, 0);
        }

        // The device reads the payload through memory, not through our cache.
        self.cache.flush(frame.payload.as_ptr(), frame.len as usize);

        trace!("tx submit: slot={}, len={}, token={:#x}", index, frame.len, frame.token);
        self.pending[index] = Some(frame);
        self.hand_to_device(index);
        self.produce = next;
        self.stats.borrow_mut().tx_submitted += 1;

        Ok(was_empty)
    }

    /// Reclaims completed slots in submission order, stopping at the first device-owned slot.
    /// Each completed frame's token is released exactly once through `release`. Returns the
    /// number of packets and bytes reclaimed.
    pub fn reclaim(&mut self, mut release: impl FnMut(TxFrame)) -> (usize, usize) {
        let count: usize = self.slots.len();
        let mut packets: usize = 0;
        let mut bytes: usize = 0;

        while self.consume != self.produce {
            let index: usize = self.consume;
            if self.slot_owner(index) == SlotOwner::Device {
                break;
            }

            let wire_len: usize = {
                let mut table = self.table.borrow_mut();
                let (ptr, len) = table.ph_range(self.ph_base + index);
                self.cache.invalidate(ptr, len);
                let (ptr, len) = table.bd_range(self.bd_base + index);
                self.cache.invalidate(ptr, len);

                table.bd_mut(self.bd_base + index).handle = 0;
                table.ph(self.ph_base + index).length as usize
            };

            // The slot may only be walked once per completion, so the token must be present.
            if let Some(frame) = self.pending[index].take() {
                trace!("tx reclaim: slot={}, token={:#x}", index, frame.token);
                release(frame);
                packets += 1;
                bytes += wire_len;
            } else {
                warn!("tx reclaim: slot {} completed with no pending frame", index);
            }

            self.consume = (self.consume + 1) % count;
        }

        if packets > 0 {
            let mut stats = self.stats.borrow_mut();
            stats.tx_completed += packets as u64;
            stats.tx_bytes += bytes as u64;
        }
        (packets, bytes)
    }

    /// Resets the ring after a stall. Outstanding tokens are force-released without waiting for
    /// the device, every slot returns to its post-create state, and the cursors return to zero.
    /// The caller must reprogram the device's transmit base register before restarting it.
    pub fn reset(&mut self, mut release: impl FnMut(TxFrame)) {
        let mut drained: usize = 0;
        for slot in self.pending.iter_mut() {
            if let Some(frame) = slot.take() {
                release(frame);
                drained += 1;
            }
        }
        if drained > 0 {
            warn!("tx reset: force-released {} in-flight frames", drained);
        }

        self.produce = 0;
        self.consume = 0;
        self.init_descriptors();
    }

    /// Number of slots a submit can still claim. One slot is the permanent sentinel.
    pub fn free_count(&self) -> usize {
        self.slots.len() - 1 - self.in_flight()
    }

    /// Number of submitted-but-unreclaimed slots.
    pub fn in_flight(&self) -> usize {
        let count: usize = self.slots.len();
        (self.produce + count - self.consume) % count
    }

    /// Whether no submissions are outstanding.
    pub fn is_empty(&self) -> bool {
        self.produce == self.consume
    }

    /// Bus address of the slot array; programmed into the transmit ring base register.
    pub fn base_addr(&self) -> u32 {
        pal::bus_addr(self.slots.as_ptr() as *const u8)
    }

    /// Puts every slot back to CPU-owned with a zeroed descriptor pair, re-links the PH/BD
    /// pairs, sets the wrap bit on the last slot, and write-backs all of it.
    fn init_descriptors(&mut self) {
        let count: usize = self.slots.len();
        {
            let mut table = self.table.borrow_mut();
            for index in 0..count {
                let ph_index: usize = self.ph_base + index;
                let bd_index: usize = self.bd_base + index;
                *table.ph_mut(ph_index) = PacketHeader {
                    bd_index: bd_index as u32,
                    ..PacketHeader::default()
                };
                *table.bd_mut(bd_index) = Default::default();

                self.slots[index] = RingSlot {
                    owner: SlotOwner::Cpu,
                    is_last_slot: index == count - 1,
                    ph_index: ph_index as u32,
                }
                .to_raw();
            }
            for (ptr, len) in table.full_range() {
                self.cache.flush(ptr, len);
            }
        }
        self.cache.flush(self.slots.as_ptr() as *const u8, self.slots.len() * 4);
        self.cache.wmb();
    }

    /// Ownership hand-off to the device for one slot: write back the slot's descriptor lines,
    /// barrier, flip the ownership bit, write back the slot word, barrier. Payload write-back is
    /// the submit path's job, while it still exclusively owns the buffer.
    fn hand_to_device(&mut self, index: usize) {
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

    /// Reads a slot's current owner, invalidating its cache line first: the device may have
    /// written the word back since we last looked.
    fn slot_owner(&self, index: usize) -> SlotOwner {
        self.cache.invalidate(&self.slots[index] as *const u32 as *const u8, 4);
        RingSlot::from_raw(self.slots[index]).owner
    }
}

//======================================================================================================================
// Test Accessors
//======================================================================================================================

#[cfg(test)]
impl TxRing {
    /// Raw slot word, as the device would read it.
    pub(crate) fn slot_raw(&self, index: usize) -> u32 {
        self.slots[index]
    }

    /// Overwrites a raw slot word, as the device would on completion.
    pub(crate) fn set_slot_raw(&mut self, index: usize, raw: u32) {
        self.slots[index] = raw;
    }

    /// Number of physical slots.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        TxFrame,
        TxRing,
    };
    use crate::{
        ensure_eq,
        pal::CoherentCache,
        ring::{
            header::DescriptorTable,
            slot::{
                RingSlot,
                SlotOwner,
            },
            stats::RingStats,
        },
        runtime::limits,
    };
    use ::anyhow::{
        ensure,
        Result,
    };
    use ::std::{
        cell::RefCell,
        rc::Rc,
    };

    /// Simulated device side of a transmit ring: completes device-owned slots in FIFO order.
    struct SimTxPeer {
        cursor: usize,
    }

    impl SimTxPeer {
        fn new() -> Self {
            Self { cursor: 0 }
        }

        /// Completes up to `n` slots, returning how many were device-owned.
        fn complete(&mut self, ring: &mut TxRing, n: usize) -> usize {
            let mut completed: usize = 0;
            for _ in 0..n {
                let raw: u32 = ring.slot_raw(self.cursor);
                let slot: RingSlot = RingSlot::from_raw(raw);
                if slot.owner != SlotOwner::Device {
                    break;
                }
                ring.set_slot_raw(self.cursor, slot.with_owner(SlotOwner::Cpu).to_raw());
                self.cursor = (self.cursor + 1) % ring.slot_count();
                completed += 1;
            }
            completed
        }
    }

    fn make_ring(count: usize) -> Result<TxRing> {
        let table = Rc::new(RefCell::new(DescriptorTable::new(count, 0, 0)?));
        let stats = Rc::new(RefCell::new(RingStats::default()));
        Ok(TxRing::create(table, Rc::new(CoherentCache), stats, count, 0, 0)?)
    }

    fn frame(len: u16, token: u64) -> TxFrame {
        TxFrame {
            payload: vec![0u8; len as usize].into_boxed_slice(),
            len,
            vlan: 0,
            port_mask: 0x01,
            token,
        }
    }

    #[test]
    fn submit_rejects_bad_frames() -> Result<()> {
        let mut ring: TxRing = make_ring(8)?;
        ensure_eq!(ring.submit(frame(0, 1)).unwrap_err().errno, libc::EINVAL);
        ensure_eq!(
            ring.submit(frame((limits::ETH_FRAME_SIZE_MAX + 1) as u16, 2)).unwrap_err().errno,
            libc::EMSGSIZE
        );
        let short_payload: TxFrame = TxFrame {
            payload: vec![0u8; 4].into_boxed_slice(),
            len: 10,
            vlan: 0,
            port_mask: 0,
            token: 3,
        };
        ensure_eq!(ring.submit(short_payload).unwrap_err().errno, libc::EINVAL);
        ensure_eq!(ring.in_flight(), 0);
        Ok(())
    }

    #[test]
    fn ring_saturation_and_refill() -> Result<()> {
        // Capacity 8 means 7 usable slots; the 8th submit must fail without side effects.
        let mut ring: TxRing = make_ring(8)?;
        let mut peer: SimTxPeer = SimTxPeer::new();

        for token in 0..7 {
            ensure!(ring.submit(frame(10, token)).is_ok());
        }
        ensure_eq!(ring.free_count(), 0);
        ensure_eq!(ring.submit(frame(10, 99)).unwrap_err().errno, libc::EAGAIN);

        ensure_eq!(peer.complete(&mut ring, 2), 2);
        let mut released: Vec<u64> = Vec::new();
        let (packets, _bytes) = ring.reclaim(|f| released.push(f.token));
        ensure_eq!(packets, 2);
        ensure_eq!(ring.free_count(), 2);

        ensure!(ring.submit(frame(10, 7)).is_ok());
        ensure!(ring.submit(frame(10, 8)).is_ok());
        ensure_eq!(ring.free_count(), 0);
        Ok(())
    }

    #[test]
    fn first_submit_reports_empty_transition() -> Result<()> {
        let mut ring: TxRing = make_ring(4)?;
        ensure_eq!(ring.submit(frame(64, 1))?, true);
        ensure_eq!(ring.submit(frame(64, 2))?, false);
        Ok(())
    }

    #[test]
    fn reclaim_is_fifo_and_stops_at_device_owned() -> Result<()> {
        let mut ring: TxRing = make_ring(8)?;
        let mut peer: SimTxPeer = SimTxPeer::new();

        for token in [0xA, 0xB, 0xC] {
            ring.submit(frame(100, token))?;
        }
        // Only the first two complete; the third stays with the device.
        peer.complete(&mut ring, 2);

        let mut released: Vec<u64> = Vec::new();
        let (packets, bytes) = ring.reclaim(|f| released.push(f.token));
        ensure_eq!(packets, 2);
        ensure_eq!(bytes, 200);
        ensure_eq!(released, vec![0xA, 0xB]);
        ensure_eq!(ring.in_flight(), 1);

        peer.complete(&mut ring, 1);
        ring.reclaim(|f| released.push(f.token));
        ensure_eq!(released, vec![0xA, 0xB, 0xC]);
        ensure!(ring.is_empty());
        Ok(())
    }

    #[test]
    fn short_frames_are_padded_to_link_minimum() -> Result<()> {
        let mut ring: TxRing = make_ring(4)?;
        let mut peer: SimTxPeer = SimTxPeer::new();

        ring.submit(frame(10, 1))?;
        peer.complete(&mut ring, 1);
        let (packets, bytes) = ring.reclaim(|_| ());
        ensure_eq!(packets, 1);
        ensure_eq!(bytes, limits::ETH_ZLEN);
        Ok(())
    }

    #[test]
    fn reset_releases_in_flight_exactly_once() -> Result<()> {
        let mut ring: TxRing = make_ring(8)?;
        for token in 0..5 {
            ring.submit(frame(80, token))?;
        }
        ensure_eq!(ring.in_flight(), 5);

        let mut released: Vec<u64> = Vec::new();
        ring.reset(|f| released.push(f.token));
        released.sort_unstable();
        ensure_eq!(released, vec![0, 1, 2, 3, 4]);

        // Post-reset state must match post-create state.
        ensure_eq!(ring.in_flight(), 0);
        ensure_eq!(ring.free_count(), 7);
        for index in 0..8 {
            let slot: RingSlot = RingSlot::from_raw(ring.slot_raw(index));
            ensure_eq!(slot.owner, SlotOwner::Cpu);
            ensure_eq!(slot.is_last_slot, index == 7);
        }

        // Nothing further to release; the ring accepts traffic again.
        let mut again: Vec<u64> = Vec::new();
        ring.reclaim(|f| again.push(f.token));
        ensure!(again.is_empty());
        ensure!(ring.submit(frame(64, 9)).is_ok());
        Ok(())
    }
}
