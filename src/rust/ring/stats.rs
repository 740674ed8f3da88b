// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Counters for the ring pair.
///
/// Every per-packet failure the engine absorbs locally (drop, backpressure, rearm) increments a
/// counter here, so a misbehaving link is observable without reverse-deriving hardware error
/// bits. The malformed-length counter in particular is the only production-visible signal for
/// that path.
#[derive(Clone, Copy, Debug, Default)]
pub struct RingStats {
    /// Frames accepted into the transmit ring.
    pub tx_submitted: u64,
    /// Transmit submissions rejected because the ring was saturated.
    pub tx_ring_full: u64,
    /// Frames the switch core finished transmitting.
    pub tx_completed: u64,
    /// Bytes across completed transmit frames.
    pub tx_bytes: u64,
    /// Frames handed up to the network stack.
    pub rx_delivered: u64,
    /// Bytes across delivered receive frames.
    pub rx_bytes: u64,
    /// Receive frames dropped because the buffer pool was exhausted.
    pub rx_drop_no_buffer: u64,
    /// Receive frames dropped because the reported length was malformed.
    pub rx_drop_bad_length: u64,
    /// Receive slots found ready with no bound buffer.
    pub rx_unbound_slot: u64,
    /// Transmit ring resets driven by the stall watchdog.
    pub watchdog_resets: u64,
}

/// Counters shared between the rings and the completion glue.
pub type SharedRingStats = Rc<RefCell<RingStats>>;
