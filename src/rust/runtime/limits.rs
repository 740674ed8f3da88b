// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Hardware contract constants for the switch core's frame handling. The
//! descriptor layout in [`crate::ring`] refers back to these rather than
//! scattering magic numbers.

/// Size of an Ethernet header, in bytes. Receive lengths below this cannot
/// describe a frame and are treated as malformed metadata.
pub const ETH_HEADER_SIZE: usize = 14;

/// Minimum on-wire frame size, excluding FCS. Shorter transmit payloads are
/// zero-padded by the switch core up to this length; the advertised
/// descriptor length is clamped accordingly.
pub const ETH_ZLEN: usize = 60;

/// Largest frame the switch core will move through a descriptor, in bytes.
/// Transmit requests above this are rejected outright.
pub const ETH_FRAME_SIZE_MAX: usize = 1536;

/// Default capacity of a receive buffer, in bytes. Sized to hold a maximum
/// frame plus the VLAN tag and trailing hardware status the switch core
/// appends on receive.
pub const RECVBUF_SIZE_DEFAULT: usize = 1700;
