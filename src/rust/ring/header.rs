// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Packet header and buffer descriptor layouts.
//!
//! Layouts here mirror the switch core's fixed bit layout exactly; field widths and flag
//! positions are hardware contract constants. Software-side completion tokens never live inside
//! these structs — they sit in per-ring side tables keyed by slot index.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Direction flag in [`PacketHeader::flags`]: set for outgoing (transmit) packets.
pub const PH_FLAG_OUTGOING: u16 = 1 << 15;

/// Destination port mask field in [`PacketHeader::ports`].
pub const PH_PORTS_DST_MASK: u16 = 0x00FF;

/// Shift of the source port field in [`PacketHeader::ports`].
pub const PH_PORTS_SRC_SHIFT: u16 = 8;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Packet header descriptor: per-slot packet metadata, as laid out by the switch core.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PacketHeader {
    /// Frame length, in bytes. Written by software on transmit, by the core on receive.
    pub length: u16,
    /// Direction and status flags.
    pub flags: u16,
    /// VLAN tag.
    pub vlan: u16,
    /// Destination port mask (low byte) and source port (high byte).
    pub ports: u16,
    /// Offset of the paired buffer descriptor in the descriptor table.
    pub bd_index: u32,
}

/// Buffer descriptor: where the packet's bytes live.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct BufferDescriptor {
    /// Bus address of the data buffer.
    pub data_addr: u32,
    /// Capacity of the data buffer, in bytes.
    pub capacity: u16,
    /// Reserved by hardware.
    pub reserved: u16,
    /// Diagnostic handle; mirrors the low bits of the pending completion token.
    pub handle: u32,
}

/// All packet headers and buffer descriptors for one ring pair, in two contiguous allocations.
///
/// TX entries come first, then RX: the pools are disjoint but share the allocation for locality.
/// Both rings hold the table behind an `Rc<RefCell<_>>`.
pub struct DescriptorTable {
    ph: Box<[PacketHeader]>,
    bd: Box<[BufferDescriptor]>,
}

/// Shared handle to a [`DescriptorTable`].
pub type SharedDescriptorTable = Rc<RefCell<DescriptorTable>>;

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl PacketHeader {
    /// Packs a destination port mask and source port into the `ports` field encoding.
    pub fn pack_ports(dst_mask: u8, src_port: u8) -> u16 {
        (dst_mask as u16 & PH_PORTS_DST_MASK) | ((src_port as u16) << PH_PORTS_SRC_SHIFT)
    }

    /// Destination port mask of this packet.
    pub fn dst_port_mask(&self) -> u8 {
        (self.ports & PH_PORTS_DST_MASK) as u8
    }

    /// Source port of this packet.
    pub fn src_port(&self) -> u8 {
        (self.ports >> PH_PORTS_SRC_SHIFT) as u8
    }

    /// Clears the header back to its post-create state.
    pub fn reset(&mut self) {
        *self = Self {
            bd_index: self.bd_index,
            ..Self::default()
        };
    }
}

impl DescriptorTable {
    /// Allocates a zeroed table for `tx_count` transmit and `rx_count` receive packet headers,
    /// with `rx_bd_count` receive buffer descriptors (some hardware generations decouple header
    /// and payload ring depth, so `rx_bd_count >= rx_count`).
    pub fn new(tx_count: usize, rx_count: usize, rx_bd_count: usize) -> Result<Self, Fail> {
        if rx_bd_count < rx_count {
            return Err(Fail::new(
                libc::EINVAL,
                "receive buffer-descriptor ring cannot be shallower than the header ring",
            ));
        }
        Ok(Self {
            ph: vec![PacketHeader::default(); tx_count + rx_count].into_boxed_slice(),
            bd: vec![BufferDescriptor::default(); tx_count + rx_bd_count].into_boxed_slice(),
        })
    }

    /// Borrows the packet header at `index`.
    pub fn ph(&self, index: usize) -> &PacketHeader {
        &self.ph[index]
    }

    /// Mutably borrows the packet header at `index`.
    pub fn ph_mut(&mut self, index: usize) -> &mut PacketHeader {
        &mut self.ph[index]
    }

    /// Borrows the buffer descriptor at `index`.
    pub fn bd(&self, index: usize) -> &BufferDescriptor {
        &self.bd[index]
    }

    /// Mutably borrows the buffer descriptor at `index`.
    pub fn bd_mut(&mut self, index: usize) -> &mut BufferDescriptor {
        &mut self.bd[index]
    }

    /// Memory range of the packet header at `index`, for cache maintenance.
    pub fn ph_range(&self, index: usize) -> (*const u8, usize) {
        (
            &self.ph[index] as *const PacketHeader as *const u8,
            std::mem::size_of::<PacketHeader>(),
        )
    }

    /// Memory range of the buffer descriptor at `index`, for cache maintenance.
    pub fn bd_range(&self, index: usize) -> (*const u8, usize) {
        (
            &self.bd[index] as *const BufferDescriptor as *const u8,
            std::mem::size_of::<BufferDescriptor>(),
        )
    }

    /// Bus address of the buffer descriptor at `index`; programmed into the receive
    /// buffer-descriptor base register.
    pub fn bd_bus_addr(&self, index: usize) -> u32 {
        crate::pal::bus_addr(&self.bd[index] as *const BufferDescriptor as *const u8)
    }

    /// Memory range of the whole table, for the create-time full write-back.
    pub fn full_range(&self) -> [(*const u8, usize); 2] {
        [
            (
                self.ph.as_ptr() as *const u8,
                std::mem::size_of_val::<[PacketHeader]>(&self.ph),
            ),
            (
                self.bd.as_ptr() as *const u8,
                std::mem::size_of_val::<[BufferDescriptor]>(&self.bd),
            ),
        ]
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
