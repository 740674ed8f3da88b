// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod header;
pub mod rx_ring;
pub mod slot;
pub mod stats;
pub mod tx_ring;

pub use self::tx_ring::TxFrame;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::RingConfig,
    pal::CacheOps,
    ring::{
        header::{
            DescriptorTable,
            SharedDescriptorTable,
        },
        rx_ring::{
            RxLayout,
            RxRing,
        },
        stats::{
            RingStats,
            SharedRingStats,
        },
        tx_ring::TxRing,
    },
    runtime::{
        fail::Fail,
        memory::{
            DmaBuffer,
            DmaPool,
        },
    },
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The descriptor-ring engine for one transmit/receive ring pair.
///
/// One engine instance exists per physical ring pair; all hardware-facing state lives here rather
/// than in globals, and every entry point takes the instance explicitly. None of the operations
/// block: saturation and exhaustion surface as immediate results for the caller's backpressure
/// policy.
pub struct RingEngine {
    /// Contiguous packet-header and buffer-descriptor storage for both rings.
    pub(crate) table: SharedDescriptorTable,
    /// Transmit ring.
    pub(crate) tx: TxRing,
    /// Receive ring.
    pub(crate) rx: RxRing,
    /// Pool backing receive buffers.
    pool: DmaPool,
    /// Shared counters.
    stats: SharedRingStats,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RingEngine {
    /// Builds the descriptor table and both rings and hands the receive ring to the device.
    /// Fails atomically: on any sub-allocation failure the partially built state unwinds, with
    /// claimed pool buffers returning to the pool.
    pub fn create(config: &RingConfig, pool: DmaPool, cache: Rc<dyn CacheOps>) -> Result<Self, Fail> {
        config.validate()?;

        if pool.block_size() > u16::MAX as usize {
            return Err(Fail::new(libc::EINVAL, "pool blocks exceed the descriptor capacity field"));
        }
        if pool.block_count() < config.rx_ring_size {
            return Err(Fail::new(libc::ENOMEM, "pool too small to fill the receive ring"));
        }

        let table: SharedDescriptorTable = Rc::new(RefCell::new(DescriptorTable::new(
            config.tx_ring_size,
            config.rx_ring_size,
            config.rx_bd_ring_size,
        )?));
        let stats: SharedRingStats = Rc::new(RefCell::new(RingStats::default()));

        let tx: TxRing = TxRing::create(
            table.clone(),
            cache.clone(),
            stats.clone(),
            config.tx_ring_size,
            0,
            0,
        )?;
        let rx: RxRing = RxRing::create(
            table.clone(),
            cache,
            stats.clone(),
            pool.clone(),
            RxLayout {
                count: config.rx_ring_size,
                bd_count: config.rx_bd_ring_size,
                ph_base: config.tx_ring_size,
                bd_base: config.tx_ring_size,
            },
        )?;

        debug!(
            "ring engine created: tx={}, rx={}, rx_bd={}, buffer={}",
            config.tx_ring_size,
            config.rx_ring_size,
            config.rx_bd_ring_size,
            pool.block_size()
        );

        Ok(Self {
            table,
            tx,
            rx,
            pool,
            stats,
        })
    }

    /// Submits one frame for transmission. See [`TxRing::submit`].
    pub fn submit(&mut self, frame: TxFrame) -> Result<bool, Fail> {
        self.tx.submit(frame)
    }

    /// Reclaims completed transmit slots. See [`TxRing::reclaim`].
    pub fn reclaim(&mut self, release: impl FnMut(TxFrame)) -> (usize, usize) {
        self.tx.reclaim(release)
    }

    /// Polls the receive ring. See [`RxRing::poll`].
    pub fn poll(&mut self, budget: usize, deliver: impl FnMut(DmaBuffer, usize)) -> usize {
        self.rx.poll(budget, deliver)
    }

    /// Resets the transmit ring after a stall. See [`TxRing::reset`].
    pub fn tx_reset(&mut self, release: impl FnMut(TxFrame)) {
        self.tx.reset(release);
        self.stats.borrow_mut().watchdog_resets += 1;
    }

    /// Free transmit slots available to submit.
    pub fn free_count(&self) -> usize {
        self.tx.free_count()
    }

    /// Submitted-but-unreclaimed transmit slots.
    pub fn tx_in_flight(&self) -> usize {
        self.tx.in_flight()
    }

    /// Bus address for the transmit ring base register.
    pub fn tx_base_addr(&self) -> u32 {
        self.tx.base_addr()
    }

    /// Bus address for the receive header ring base register.
    pub fn rx_header_base_addr(&self) -> u32 {
        self.rx.header_base_addr()
    }

    /// Bus address for the receive buffer ring base register.
    pub fn rx_buffer_base_addr(&self) -> u32 {
        self.rx.buffer_base_addr()
    }

    /// The pool backing this engine's receive buffers.
    pub fn pool(&self) -> &DmaPool {
        &self.pool
    }

    /// Snapshot of the ring counters.
    pub fn stats(&self) -> RingStats {
        *self.stats.borrow()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::RingEngine;
    use crate::ring::slot::{
        RingSlot,
        SlotOwner,
    };

    /// Simulated switch core: walks both rings the way the hardware does, completing transmit
    /// slots in FIFO order and filling receive slots with reported lengths.
    pub(crate) struct SimSwitch {
        tx_cursor: usize,
        rx_cursor: usize,
    }

    impl SimSwitch {
        pub(crate) fn new() -> Self {
            Self {
                tx_cursor: 0,
                rx_cursor: 0,
            }
        }

        /// Completes up to `n` device-owned transmit slots, returning how many were completed.
        pub(crate) fn complete_tx(&mut self, engine: &mut RingEngine, n: usize) -> usize {
            let mut completed: usize = 0;
            for _ in 0..n {
                let raw: u32 = engine.tx.slot_raw(self.tx_cursor);
                let slot: RingSlot = RingSlot::from_raw(raw);
                if slot.owner != SlotOwner::Device {
                    break;
                }
                engine.tx.set_slot_raw(self.tx_cursor, slot.with_owner(SlotOwner::Cpu).to_raw());
                self.tx_cursor = (self.tx_cursor + 1) % engine.tx.slot_count();
                completed += 1;
            }
            completed
        }

        /// Produces one received packet of `len` bytes into the next device-owned receive slot.
        /// Returns false when the ring has no device-owned slot at the cursor (receive overrun).
        pub(crate) fn deliver_rx(&mut self, engine: &mut RingEngine, len: u16) -> bool {
            let index: usize = self.rx_cursor;
            let slot: RingSlot = RingSlot::from_raw(engine.rx.slot_raw(index));
            if slot.owner != SlotOwner::Device {
                return false;
            }
            let ph_index: usize = engine.rx.ph_index(index);
            engine.table.borrow_mut().ph_mut(ph_index).length = len;
            engine.rx.set_slot_raw(index, slot.with_owner(SlotOwner::Cpu).to_raw());
            self.rx_cursor = (self.rx_cursor + 1) % engine.rx.slot_count();
            true
        }
    }
}
