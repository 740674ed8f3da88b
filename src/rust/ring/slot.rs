// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Ring slot words.
//!
//! The switch core walks rings of 32-bit slot words, each packing a packet-header table offset
//! together with the ownership and wrap flags. The packed encoding exists only at this boundary;
//! engine logic works on the decoded [`RingSlot`] and [`SlotOwner`] types.

//======================================================================================================================
// Constants
//======================================================================================================================

/// Ownership bit. Set: the switch core owns the slot and its buffer. Clear: software owns them.
pub const SLOT_OWN_BIT: u32 = 1 << 31;

/// Wrap bit. Marks the last physical slot of a ring; both walkers loop back to index 0 here.
pub const SLOT_WRAP_BIT: u32 = 1 << 30;

/// Packet-header table offset field.
pub const SLOT_PH_MASK: u32 = 0x3FFF_FFFF;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Who may currently access a slot's descriptor and buffer.
///
/// This is the engine's single source of truth for slot readiness. There is no separate status
/// register to drift out of sync with; a slot observed [`SlotOwner::Device`] is never mutated by
/// software.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotOwner {
    /// Software may read and write the slot.
    Cpu,
    /// The switch core may read and write the slot.
    Device,
}

/// Decoded form of one ring slot word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingSlot {
    /// Current owner of the slot.
    pub owner: SlotOwner,
    /// Whether this is the last physical slot of its ring.
    pub is_last_slot: bool,
    /// Offset of the slot's packet header in the descriptor table.
    pub ph_index: u32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RingSlot {
    /// Decodes a raw slot word.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            owner: if raw & SLOT_OWN_BIT != 0 {
                SlotOwner::Device
            } else {
                SlotOwner::Cpu
            },
            is_last_slot: raw & SLOT_WRAP_BIT != 0,
            ph_index: raw & SLOT_PH_MASK,
        }
    }

    /// Encodes this slot into the raw word the switch core reads.
    pub fn to_raw(self) -> u32 {
        let mut raw: u32 = self.ph_index & SLOT_PH_MASK;
        if let SlotOwner::Device = self.owner {
            raw |= SLOT_OWN_BIT;
        }
        if self.is_last_slot {
            raw |= SLOT_WRAP_BIT;
        }
        raw
    }

    /// Returns a copy of this slot with a different owner.
    pub fn with_owner(self, owner: SlotOwner) -> Self {
        Self { owner, ..self }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        RingSlot,
        SlotOwner,
        SLOT_OWN_BIT,
        SLOT_PH_MASK,
        SLOT_WRAP_BIT,
    };
    use crate::ensure_eq;
    use ::anyhow::{
        ensure,
        Result,
    };

    #[test]
    fn bit_positions_match_hardware_contract() -> Result<()> {
        ensure_eq!(SLOT_OWN_BIT, 0x8000_0000);
        ensure_eq!(SLOT_WRAP_BIT, 0x4000_0000);
        ensure_eq!(SLOT_PH_MASK, 0x3FFF_FFFF);
        ensure_eq!(SLOT_OWN_BIT & SLOT_WRAP_BIT, 0);
        ensure_eq!((SLOT_OWN_BIT | SLOT_WRAP_BIT) & SLOT_PH_MASK, 0);
        Ok(())
    }

    #[test]
    fn encode_decode_round_trip() -> Result<()> {
        let slot: RingSlot = RingSlot {
            owner: SlotOwner::Device,
            is_last_slot: true,
            ph_index: 0x1234,
        };
        let raw: u32 = slot.to_raw();
        ensure!(raw & SLOT_OWN_BIT != 0);
        ensure!(raw & SLOT_WRAP_BIT != 0);
        ensure_eq!(raw & SLOT_PH_MASK, 0x1234);
        ensure_eq!(RingSlot::from_raw(raw), slot);
        Ok(())
    }

    #[test]
    fn owner_flip_preserves_wrap_and_offset() -> Result<()> {
        let slot: RingSlot = RingSlot {
            owner: SlotOwner::Cpu,
            is_last_slot: true,
            ph_index: 77,
        };
        let flipped: RingSlot = slot.with_owner(SlotOwner::Device);
        ensure_eq!(flipped.owner, SlotOwner::Device);
        ensure_eq!(flipped.is_last_slot, true);
        ensure_eq!(flipped.ph_index, 77);
        Ok(())
    }
}
